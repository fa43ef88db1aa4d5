//! # Repository Maintenance
//!
//! Decides when a backup should also run Kopia repository maintenance and
//! summarises the history of past maintenance Jobs for the source status.
//!
//! Maintenance piggybacks on the backup Job: when it is due the mover sets
//! `KOPIA_RUN_MAINTENANCE=true` and labels the Job. The mover Job has a fixed
//! name and is deleted after every reset, so a scan over labelled Jobs only
//! seeds the status; after that each finished run is folded in with
//! [`record_maintenance_run`].

use crate::crd::MaintenanceStatus;
use chrono::{DateTime, Duration, Months, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Whether maintenance is due
///
/// Never due without a positive interval; always due when it has never run.
#[must_use]
pub fn should_run_maintenance(
    interval_days: Option<i32>,
    last_maintenance: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(days) = interval_days.filter(|d| *d > 0) else {
        return false;
    };
    match last_maintenance {
        None => true,
        Some(last) => now > last + Duration::hours(i64::from(days) * 24),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct FinishedJob {
    outcome: Outcome,
    started: Option<DateTime<Utc>>,
    finished: DateTime<Utc>,
}

/// Summarise a set of maintenance Jobs, in any order
///
/// Jobs that have not finished are ignored. `configured` is left for the
/// caller to set.
#[must_use]
pub fn analyze_job_history(jobs: &[Job]) -> MaintenanceStatus {
    let mut finished: Vec<FinishedJob> = jobs.iter().filter_map(finished_job).collect();
    finished.sort_by(|a, b| b.finished.cmp(&a.finished));

    let last_of = |outcome: Outcome| {
        finished
            .iter()
            .find(|j| j.outcome == outcome)
            .map(|j| format_time(j.finished))
    };

    let failures_since_last_success = finished
        .iter()
        .take_while(|j| j.outcome == Outcome::Failed)
        .count();

    let last_maintenance_duration = finished.first().and_then(|j| {
        j.started
            .map(|start| format!("{}s", (j.finished - start).num_seconds().max(0)))
    });

    MaintenanceStatus {
        configured: false,
        last_successful_time: last_of(Outcome::Succeeded),
        last_failed_time: last_of(Outcome::Failed),
        failures_since_last_success: i32::try_from(failures_since_last_success)
            .unwrap_or(i32::MAX),
        last_maintenance_duration,
    }
}

fn finished_job(job: &Job) -> Option<FinishedJob> {
    let status = job.status.as_ref()?;
    let started = status.start_time.as_ref().and_then(time_to_chrono);
    let condition_time = |kind: &str| {
        status
            .conditions
            .as_ref()?
            .iter()
            .find(|c| c.type_ == kind && c.status == "True")
            .and_then(|c| c.last_transition_time.as_ref())
            .and_then(time_to_chrono)
    };

    if status.succeeded.unwrap_or(0) > 0 {
        let finished = status
            .completion_time
            .as_ref()
            .and_then(time_to_chrono)
            .or_else(|| condition_time("Complete"))?;
        return Some(FinishedJob {
            outcome: Outcome::Succeeded,
            started,
            finished,
        });
    }

    condition_time("Failed").map(|finished| FinishedJob {
        outcome: Outcome::Failed,
        started,
        finished,
    })
}

/// One finished maintenance-carrying Job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceRun {
    pub succeeded: bool,
    pub started: Option<DateTime<Utc>>,
    pub finished: DateTime<Utc>,
}

impl MaintenanceRun {
    /// Read start and end times from `job`, using `now` when it has no end time
    #[must_use]
    pub fn from_job(job: &Job, succeeded: bool, now: DateTime<Utc>) -> Self {
        let status = job.status.as_ref();
        let finished = status
            .and_then(|s| s.completion_time.as_ref())
            .and_then(time_to_chrono)
            .unwrap_or(now);
        Self {
            succeeded,
            started: status
                .and_then(|s| s.start_time.as_ref())
                .and_then(time_to_chrono),
            finished,
        }
    }
}

/// Fold a finished run into an existing maintenance status
pub fn record_maintenance_run(status: &mut MaintenanceStatus, run: MaintenanceRun) {
    let finished = format_time(run.finished);
    if run.succeeded {
        status.last_successful_time = Some(finished);
        status.failures_since_last_success = 0;
    } else {
        status.last_failed_time = Some(finished);
        status.failures_since_last_success =
            status.failures_since_last_success.saturating_add(1);
    }
    if let Some(started) = run.started {
        status.last_maintenance_duration =
            Some(format!("{}s", (run.finished - started).num_seconds().max(0)));
    }
}

/// Estimate the next maintenance run from a cron expression
///
/// Understands the shapes the operator exposes: daily (`M H * * *`), weekly
/// (`M H * * D`), monthly by day (`M H D * *`) and the `@daily`, `@weekly` and
/// `@monthly` aliases. Anything else is treated as daily. For display only.
#[must_use]
pub fn calculate_next_scheduled_time(cron: &str, last: DateTime<Utc>) -> DateTime<Utc> {
    match cron_shape(cron) {
        CronShape::Weekly => last + Duration::days(7),
        CronShape::Monthly => last
            .checked_add_months(Months::new(1))
            .unwrap_or_else(|| last + Duration::days(30)),
        CronShape::Daily => last + Duration::days(1),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CronShape {
    Daily,
    Weekly,
    Monthly,
}

fn cron_shape(cron: &str) -> CronShape {
    match cron.trim() {
        "@weekly" => return CronShape::Weekly,
        "@monthly" => return CronShape::Monthly,
        "@daily" | "@midnight" => return CronShape::Daily,
        _ => {}
    }

    let fields: Vec<&str> = cron.split_whitespace().collect();
    match fields.as_slice() {
        [_, _, "*", "*", "*"] => CronShape::Daily,
        [_, _, "*", "*", _] => CronShape::Weekly,
        [_, _, _, "*", "*"] => CronShape::Monthly,
        _ => CronShape::Daily,
    }
}

/// Convert a Kubernetes timestamp to chrono through its RFC3339 wire form
#[must_use]
pub fn time_to_chrono(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    parse_time(value.as_str()?)
}

/// Parse an RFC3339 status timestamp
#[must_use]
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Format a timestamp the way status fields store it
#[must_use]
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
