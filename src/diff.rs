use crate::state::{DeviceSnapshot, SystemSnapshot, TrackedFields};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write as _;
use thiserror::Error;

pub const REPORT_HEADER: &str = "NVME data has updated:";

/// Raised when a device's telemetry cannot be compared safely. Nothing is
/// reported and nothing is persisted when this happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("malformed telemetry for {device}: response is not an object")]
    NotAnObject { device: String },
    #[error("malformed telemetry for {device}: missing field {field}")]
    MissingField { device: String, field: String },
    #[error("malformed telemetry for {device}: field {field} is not an integer ({value})")]
    InvalidValue {
        device: String,
        field: String,
        value: String,
    },
    #[error("malformed telemetry: device {device} reported more than once")]
    DuplicateDevice { device: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<i64>,
    pub new: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    New {
        device: String,
    },
    Changed {
        device: String,
        previous: DeviceSnapshot,
        current: DeviceSnapshot,
        fields: Vec<FieldChange>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub entries: Vec<DeviceChange>,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn new_devices(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DeviceChange::New { .. }))
            .count()
    }

    pub fn changed_devices(&self) -> usize {
        self.entries.len() - self.new_devices()
    }

    /// Header, then one section per entry in diff order. Changed fields are
    /// listed in tracked-field order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(REPORT_HEADER);
        out.push_str("\n\n");

        for entry in &self.entries {
            match entry {
                DeviceChange::New { device } => {
                    let _ = writeln!(out, "Found new device {}", device);
                }
                DeviceChange::Changed { device, fields, .. } => {
                    let _ = writeln!(out, "For device {}:", device);
                    for change in fields {
                        let old = change
                            .old
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "(none)".to_string());
                        let _ = writeln!(
                            out,
                            "{:<20} changed from {} to {}",
                            change.field, old, change.new
                        );
                    }
                    out.push('\n');
                }
            }
        }

        out
    }
}

#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// Previous snapshot with new and changed devices overwritten. The
    /// timestamp is carried over unchanged.
    pub snapshot: SystemSnapshot,
    pub report: ChangeReport,
    pub any_change: bool,
}

#[derive(Debug, Clone)]
pub struct DiffEngine {
    fields: TrackedFields,
}

impl DiffEngine {
    pub fn new(fields: TrackedFields) -> Self {
        Self { fields }
    }

    /// Reduces a raw health response to exactly the tracked fields.
    pub fn narrow(&self, device: &str, raw: &Value) -> Result<DeviceSnapshot, DiffError> {
        let Some(obj) = raw.as_object() else {
            return Err(DiffError::NotAnObject {
                device: device.to_string(),
            });
        };

        let mut snap = DeviceSnapshot::default();
        for field in self.fields.iter() {
            let value = obj.get(field).ok_or_else(|| DiffError::MissingField {
                device: device.to_string(),
                field: field.to_string(),
            })?;
            let int = value.as_i64().ok_or_else(|| DiffError::InvalidValue {
                device: device.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            })?;
            snap.insert(field, int);
        }
        Ok(snap)
    }

    /// Compares freshly queried devices against `previous`.
    ///
    /// Every device is narrowed before anything is compared, so a malformed
    /// response aborts without a partial report. Devices missing from
    /// `current` stay in the returned snapshot and are not reported.
    pub fn compute(
        &self,
        previous: &SystemSnapshot,
        current: &[(String, Value)],
    ) -> Result<DiffOutcome, DiffError> {
        let mut seen = HashSet::with_capacity(current.len());
        let mut narrowed = Vec::with_capacity(current.len());
        for (device, raw) in current {
            if !seen.insert(device.as_str()) {
                return Err(DiffError::DuplicateDevice {
                    device: device.clone(),
                });
            }
            narrowed.push((device, self.narrow(device, raw)?));
        }

        let mut snapshot = previous.clone();
        let mut report = ChangeReport::default();

        for (device, snap) in narrowed {
            match previous.device(device) {
                None => {
                    report.entries.push(DeviceChange::New {
                        device: device.clone(),
                    });
                    snapshot.devices.insert(device.clone(), snap);
                }
                Some(prev) => {
                    let fields = self.changed_fields(prev, &snap);
                    if fields.is_empty() {
                        continue;
                    }
                    report.entries.push(DeviceChange::Changed {
                        device: device.clone(),
                        previous: prev.clone(),
                        current: snap.clone(),
                        fields,
                    });
                    snapshot.devices.insert(device.clone(), snap);
                }
            }
        }

        let any_change = !report.is_empty();
        Ok(DiffOutcome {
            snapshot,
            report,
            any_change,
        })
    }

    fn changed_fields(&self, prev: &DeviceSnapshot, cur: &DeviceSnapshot) -> Vec<FieldChange> {
        self.fields
            .iter()
            .filter_map(|field| {
                let new = cur.get(field)?;
                let old = prev.get(field);
                (old != Some(new)).then(|| FieldChange {
                    field: field.to_string(),
                    old,
                    new,
                })
            })
            .collect()
    }
}
