pub mod nvme;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// The telemetry source could not be used at all. Nothing can be compared, so
/// a run that hits this stops without reporting.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` did not finish within {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("`{command}` exited with {status}: {stderr}")]
    Status {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` returned invalid JSON: {source}")]
    Parse {
        command: String,
        source: serde_json::Error,
    },
    #[error("`{command}` returned unexpected output: {reason}")]
    Shape { command: String, reason: String },
}

/// Where per-device health counters come from.
pub trait TelemetrySource {
    async fn list_devices(&self) -> Result<Vec<String>, TelemetryError>;

    /// Raw health response for one device. Narrowing to the tracked fields
    /// happens in the diff engine.
    async fn query_health(&self, device: &str) -> Result<Value, TelemetryError>;
}

/// Queries every listed device, keeping the order the source listed them in.
pub async fn collect_telemetry<S: TelemetrySource>(
    source: &S,
) -> Result<Vec<(String, Value)>, TelemetryError> {
    let devices = source.list_devices().await?;
    let mut out = Vec::with_capacity(devices.len());
    for device in devices {
        let health = source.query_health(&device).await?;
        debug!(device = %device, "collected health telemetry");
        out.push((device, health));
    }
    Ok(out)
}
