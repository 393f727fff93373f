use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_TRACKED_FIELDS: [&str; 8] = [
    "avail_spare",
    "spare_thresh",
    "percent_used",
    "unsafe_shutdowns",
    "media_errors",
    "num_err_log_entries",
    "warning_temp_time",
    "critical_comp_time",
];

/// Ordered, immutable list of counters compared between runs.
///
/// Cloning is cheap; every device in a run is narrowed against the same list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFields(Arc<[String]>);

impl TrackedFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for TrackedFields {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_FIELDS)
    }
}

/// Tracked counter values for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSnapshot(BTreeMap<String, i64>);

impl DeviceSnapshot {
    pub fn get(&self, field: &str) -> Option<i64> {
        self.0.get(field).copied()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: i64) {
        self.0.insert(field.into(), value);
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for DeviceSnapshot {
    fn from_iter<T: IntoIterator<Item = (K, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Everything known about the host's devices at one point in time.
///
/// This is the persisted record: `{"when": <epoch secs>, "devices": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    #[serde(rename = "when")]
    pub timestamp: i64,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceSnapshot>,
}

impl SystemSnapshot {
    pub fn device(&self, id: &str) -> Option<&DeviceSnapshot> {
        self.devices.get(id)
    }
}

/// Write throttle: the snapshot is rewritten only when strictly more than
/// `min_hours` have passed since the last write.
pub fn should_persist(previous_timestamp: i64, new_timestamp: i64, min_hours: u64) -> bool {
    let min_secs = i64::try_from(min_hours)
        .unwrap_or(i64::MAX)
        .saturating_mul(3600);
    new_timestamp.saturating_sub(previous_timestamp) > min_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_is_strict_at_the_boundary() {
        assert!(should_persist(1000, 1000 + 3600 * 2 + 1, 2));
        assert!(!should_persist(1000, 1000 + 3600 * 2, 2));
    }

    #[test]
    fn zero_hours_always_persists_forward_in_time() {
        assert!(should_persist(0, 1, 0));
        assert!(should_persist(1_700_000_000, 1_700_000_001, 0));
        assert!(!should_persist(1_700_000_000, 1_700_000_000, 0));
    }

    #[test]
    fn huge_min_hours_does_not_overflow() {
        assert!(!should_persist(0, i64::MAX, u64::MAX));
    }

    #[test]
    fn default_snapshot_matches_first_run_state() {
        let snap = SystemSnapshot::default();
        assert_eq!(snap.timestamp, 0);
        assert!(snap.devices.is_empty());
    }

    #[test]
    fn snapshot_serializes_with_when_key() {
        let mut snap = SystemSnapshot {
            timestamp: 42,
            ..SystemSnapshot::default()
        };
        snap.devices.insert(
            "/dev/nvme0n1".to_string(),
            [("avail_spare", 100), ("media_errors", 0)]
                .into_iter()
                .collect(),
        );

        let json = serde_json::to_value(&snap).expect("serialize");
        assert_eq!(json["when"], 42);
        assert_eq!(json["devices"]["/dev/nvme0n1"]["avail_spare"], 100);

        let back: SystemSnapshot = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, snap);
    }

    #[test]
    fn default_field_set_keeps_declared_order() {
        let fields = TrackedFields::default();
        let names: Vec<&str> = fields.iter().collect();
        assert_eq!(names, DEFAULT_TRACKED_FIELDS);
    }
}
