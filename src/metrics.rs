use crate::diff::ChangeReport;
use crate::state::{DeviceSnapshot, TrackedFields};
use crate::store::write_atomic;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to write metrics file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Per-run gauges, written out in the Prometheus text format so a textfile
/// collector can pick them up between runs.
pub struct Metrics {
    registry: Registry,
    pub nvme_smart_value: GaugeVec,
    pub nvme_devices: Gauge,
    pub nvme_devices_new: Gauge,
    pub nvme_devices_changed: Gauge,
    pub nvme_last_check_timestamp_seconds: Gauge,
    pub nvme_snapshot_persisted: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let nvme_smart_value = GaugeVec::new(
            opts!(
                "nvmewatch_smart_value",
                "Tracked SMART counter value by device and field"
            ),
            &["device", "field"],
        )?;
        let nvme_devices = Gauge::with_opts(opts!(
            "nvmewatch_devices",
            "Number of devices reported by the telemetry source"
        ))?;
        let nvme_devices_new = Gauge::with_opts(opts!(
            "nvmewatch_devices_new",
            "Devices seen for the first time in the last check"
        ))?;
        let nvme_devices_changed = Gauge::with_opts(opts!(
            "nvmewatch_devices_changed",
            "Devices with at least one changed counter in the last check"
        ))?;
        let nvme_last_check_timestamp_seconds = Gauge::with_opts(opts!(
            "nvmewatch_last_check_timestamp_seconds",
            "Unix time of the last completed check"
        ))?;
        let nvme_snapshot_persisted = Gauge::with_opts(opts!(
            "nvmewatch_snapshot_persisted",
            "1 if the last check rewrote the snapshot file, 0 if throttled or failed"
        ))?;

        register(&registry, &nvme_smart_value)?;
        register(&registry, &nvme_devices)?;
        register(&registry, &nvme_devices_new)?;
        register(&registry, &nvme_devices_changed)?;
        register(&registry, &nvme_last_check_timestamp_seconds)?;
        register(&registry, &nvme_snapshot_persisted)?;

        Ok(Self {
            registry,
            nvme_smart_value,
            nvme_devices,
            nvme_devices_new,
            nvme_devices_changed,
            nvme_last_check_timestamp_seconds,
            nvme_snapshot_persisted,
        })
    }

    /// Only fields in `fields` are exported. Carried-over device entries can
    /// still hold counters from an older tracked set.
    pub fn update_from_check<'a>(
        &self,
        fields: &TrackedFields,
        devices: impl IntoIterator<Item = (&'a str, &'a DeviceSnapshot)>,
        report: &ChangeReport,
        now_unix: i64,
        persisted: bool,
    ) {
        self.nvme_smart_value.reset();
        let mut count = 0_u32;
        for (device, snap) in devices {
            count += 1;
            for field in fields.iter() {
                let Some(value) = snap.get(field) else {
                    continue;
                };
                self.nvme_smart_value
                    .with_label_values(&[device, field])
                    .set(value as f64);
            }
        }

        self.nvme_devices.set(f64::from(count));
        self.nvme_devices_new.set(report.new_devices() as f64);
        self.nvme_devices_changed
            .set(report.changed_devices() as f64);
        self.nvme_last_check_timestamp_seconds.set(now_unix as f64);
        self.nvme_snapshot_persisted
            .set(if persisted { 1.0 } else { 0.0 });
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    pub fn write_textfile(&self, path: impl AsRef<Path>) -> Result<(), MetricsError> {
        let buf = self.encode_metrics()?;
        write_atomic(path.as_ref(), &buf).map_err(|source| MetricsError::Write {
            path: path.as_ref().display().to_string(),
            source,
        })
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
