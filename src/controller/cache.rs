//! # Cache Volume Planning
//!
//! Chooses between a persistent cache PVC and a size-capped EmptyDir for the
//! Kopia metadata cache. Allocation is done by the mover.

use crate::constants::{
    DEFAULT_ACCESS_MODE, DEFAULT_CACHE_EMPTY_DIR_LIMIT, DEFAULT_CACHE_PVC_CAPACITY,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Decision returned by [`plan_cache`]
#[derive(Debug, Clone, PartialEq)]
pub struct CachePlan {
    /// Provision a PVC (true) or use an EmptyDir (false)
    pub use_pvc: bool,
    /// PVC capacity when `use_pvc`, EmptyDir size limit otherwise
    pub size_limit: Quantity,
}

/// Plan the cache volume
///
/// Setting a storage class or access modes asks for a real PVC (1Gi unless a
/// capacity is given). Otherwise the cache is an EmptyDir capped at the
/// capacity, or at 8Gi when nothing is set.
#[must_use]
pub fn plan_cache(
    capacity: Option<&Quantity>,
    storage_class_name: Option<&str>,
    access_modes: &[String],
) -> CachePlan {
    let has_pvc_config =
        storage_class_name.is_some_and(|sc| !sc.is_empty()) || !access_modes.is_empty();

    if has_pvc_config {
        return CachePlan {
            use_pvc: true,
            size_limit: capacity
                .cloned()
                .unwrap_or_else(|| Quantity(DEFAULT_CACHE_PVC_CAPACITY.to_string())),
        };
    }

    CachePlan {
        use_pvc: false,
        size_limit: capacity
            .cloned()
            .unwrap_or_else(|| Quantity(DEFAULT_CACHE_EMPTY_DIR_LIMIT.to_string())),
    }
}

/// Access modes for the cache PVC
///
/// Explicit cache modes win, then the volume handler's modes, then the data
/// volume's own modes.
#[must_use]
pub fn resolve_cache_access_modes(
    explicit: &[String],
    handler: &[String],
    data_volume: &[String],
) -> Vec<String> {
    [explicit, handler, data_volume]
        .into_iter()
        .find(|modes| !modes.is_empty())
        .map_or_else(|| vec![DEFAULT_ACCESS_MODE.to_string()], <[String]>::to_vec)
}
