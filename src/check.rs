use crate::collectors::{collect_telemetry, TelemetryError, TelemetrySource};
use crate::config::Config;
use crate::diff::{DeviceChange, DiffEngine, DiffError, DiffOutcome};
use crate::metrics::{Metrics, MetricsError};
use crate::notify::{self, NotifyError, Notifier};
use crate::state::{should_persist, SystemSnapshot};
use crate::store::{self, StoreError};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Last second that RFC 3339 can express (9999-12-31T23:59:59Z).
const MAX_RFC3339_SECS: i64 = 253_402_300_799;

/// Errors that end a run before anything is reported or persisted.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("telemetry source unavailable: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Malformed(#[from] DiffError),
    #[error("persisted snapshot unusable: {0}")]
    PersistenceRead(StoreError),
}

#[derive(Debug)]
pub struct CheckPlan {
    pub outcome: DiffOutcome,
    pub persist: bool,
}

/// Pure part of a run: diff, stamp the new snapshot with `now` and apply the
/// write throttle against the previous timestamp.
pub fn plan_check(
    engine: &DiffEngine,
    previous: &SystemSnapshot,
    current: &[(String, Value)],
    now_unix: i64,
    min_hours: u64,
) -> Result<CheckPlan, DiffError> {
    let mut outcome = engine.compute(previous, current)?;
    outcome.snapshot.timestamp = now_unix;
    let persist = should_persist(previous.timestamp, now_unix, min_hours);
    Ok(CheckPlan { outcome, persist })
}

/// What happened after the plan was carried out. Notification and
/// persistence fail independently of each other.
#[derive(Debug)]
pub struct CheckSummary {
    pub any_change: bool,
    pub persisted: bool,
    pub notify_error: Option<NotifyError>,
    pub persist_error: Option<StoreError>,
}

impl CheckSummary {
    pub fn is_success(&self) -> bool {
        self.notify_error.is_none() && self.persist_error.is_none()
    }
}

pub async fn run_check<S: TelemetrySource>(
    cfg: &Config,
    source: &S,
    notifier: &Notifier,
    now_unix: i64,
) -> Result<CheckSummary, CheckError> {
    let persist_path = cfg.persist_path();
    let previous = store::load(&persist_path).map_err(CheckError::PersistenceRead)?;
    log_previous(&persist_path, &previous, now_unix);

    let current = collect_telemetry(source).await?;
    let fields = cfg.tracked_fields();
    let engine = DiffEngine::new(fields.clone());
    let plan = plan_check(&engine, &previous, &current, now_unix, cfg.min_hours)?;
    let outcome = &plan.outcome;

    info!(
        devices = current.len(),
        new = outcome.report.new_devices(),
        changed = outcome.report.changed_devices(),
        "diff complete"
    );
    for entry in &outcome.report.entries {
        match entry {
            DeviceChange::New { device } => info!(device = %device, "new device"),
            DeviceChange::Changed {
                device,
                previous,
                current,
                fields,
            } => warn!(
                device = %device,
                fields = fields.len(),
                previous = ?previous,
                current = ?current,
                "tracked counters changed"
            ),
        }
    }

    let host = notify::host_name();
    let notify_error = match notifier.notification(&host, &outcome.report, outcome.any_change) {
        Some(notification) => notifier.deliver(&notification).await.err(),
        None => None,
    };

    let mut persist_error = None;
    if plan.persist {
        match store::save(&persist_path, &outcome.snapshot) {
            Ok(()) => info!(path = %persist_path.display(), "snapshot written"),
            Err(err) => persist_error = Some(err),
        }
    } else {
        info!(min_hours = cfg.min_hours, "snapshot write throttled");
    }
    let persisted = plan.persist && persist_error.is_none();

    if let Some(metrics_path) = cfg.metrics_path() {
        let seen = current
            .iter()
            .filter_map(|(id, _)| outcome.snapshot.device(id).map(|d| (id.as_str(), d)));
        let written = Metrics::new()
            .map_err(MetricsError::from)
            .and_then(|metrics| {
                metrics.update_from_check(
                    &fields,
                    seen,
                    &outcome.report,
                    now_unix,
                    persisted,
                );
                metrics.write_textfile(&metrics_path)
            });
        if let Err(err) = written {
            warn!(path = %metrics_path.display(), error = %err, "metrics textfile not written");
        }
    }

    Ok(CheckSummary {
        any_change: outcome.any_change,
        persisted,
        notify_error,
        persist_error,
    })
}

fn log_previous(path: &Path, previous: &SystemSnapshot, now_unix: i64) {
    if previous.timestamp <= 0 {
        info!(path = %path.display(), "no previous snapshot, starting fresh");
        return;
    }

    let age = Duration::from_secs(now_unix.saturating_sub(previous.timestamp).max(0) as u64);
    info!(
        path = %path.display(),
        devices = previous.devices.len(),
        written_at = %written_at(previous.timestamp),
        age = %humantime::format_duration(age),
        "loaded previous snapshot"
    );
}

fn written_at(timestamp: i64) -> String {
    if !(0..=MAX_RFC3339_SECS).contains(&timestamp) {
        return timestamp.to_string();
    }
    humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(timestamp as u64))
        .to_string()
}
