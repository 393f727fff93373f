use crate::state::SystemSnapshot;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read snapshot {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to parse snapshot {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to write snapshot {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A missing file is a first run and yields the default snapshot. A file that
/// exists but cannot be read or parsed is an error, never a silent reset.
pub fn load(path: impl AsRef<Path>) -> Result<SystemSnapshot, StoreError> {
    let path_ref = path.as_ref();
    let path_display = path_ref.display().to_string();

    let text = match fs::read_to_string(path_ref) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(SystemSnapshot::default());
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: path_display,
                source,
            })
        }
    };

    serde_json::from_str(&text).map_err(|source| StoreError::Parse {
        path: path_display,
        source,
    })
}

/// Replaces the snapshot file as a whole: the new content goes to a temp file
/// next to the target, which is then renamed over it.
pub fn save(path: impl AsRef<Path>, snapshot: &SystemSnapshot) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(snapshot)?;
    write_atomic(path.as_ref(), &bytes).map_err(|source| StoreError::Write {
        path: path.as_ref().display().to_string(),
        source,
    })
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeviceSnapshot;

    fn sample() -> SystemSnapshot {
        let mut snap = SystemSnapshot {
            timestamp: 1_700_000_000,
            ..SystemSnapshot::default()
        };
        let dev: DeviceSnapshot = [
            ("avail_spare", 100),
            ("media_errors", 0),
            ("unsafe_shutdowns", 12),
        ]
        .into_iter()
        .collect();
        snap.devices.insert("/dev/nvme0n1".to_string(), dev);
        snap.devices
            .insert("/dev/nvme1n1".to_string(), DeviceSnapshot::default());
        snap
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snap = load(dir.path().join("absent.json")).expect("load");
        assert_eq!(snap, SystemSnapshot::default());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").expect("write");

        let err = load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"when": 5, "devices": {"/dev/nvme0n1": {"avail_spare": "x"}}}"#)
            .expect("write");

        assert!(matches!(load(&path), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let snap = sample();

        save(&path, &snap).expect("save");
        assert_eq!(load(&path).expect("load"), snap);
    }

    #[test]
    fn save_replaces_previous_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        save(&path, &sample()).expect("save");

        let smaller = SystemSnapshot {
            timestamp: 1,
            ..SystemSnapshot::default()
        };
        save(&path, &smaller).expect("save");

        assert_eq!(load(&path).expect("load"), smaller);
        let leftovers = fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn reads_file_written_by_older_checker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"when": 1690000000, "devices": {"/dev/nvme0n1": {"avail_spare": 100, "spare_thresh": 10}}}"#,
        )
        .expect("write");

        let snap = load(&path).expect("load");
        assert_eq!(snap.timestamp, 1_690_000_000);
        assert_eq!(
            snap.device("/dev/nvme0n1").and_then(|d| d.get("spare_thresh")),
            Some(10)
        );
    }
}
