use super::{TelemetryError, TelemetrySource};
use crate::config::TelemetryConfig;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::warn;

/// Telemetry from the `nvme` command line tool (nvme-cli).
#[derive(Debug, Clone)]
pub struct NvmeCli {
    bin: String,
    timeout_ms: u64,
}

impl NvmeCli {
    pub fn new(cfg: &TelemetryConfig) -> Self {
        Self {
            bin: cfg.nvme_bin.clone(),
            timeout_ms: cfg.timeout_ms,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(String, Vec<u8>), TelemetryError> {
        let command = format!("{} {}", self.bin, args.join(" "));
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).kill_on_drop(true);

        let output = match time::timeout(Duration::from_millis(self.timeout_ms), cmd.output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(TelemetryError::Spawn { command, source }),
            Err(_elapsed) => {
                warn!(command = %command, timeout_ms = self.timeout_ms, "nvme command timeout");
                return Err(TelemetryError::Timeout {
                    command,
                    timeout_ms: self.timeout_ms,
                });
            }
        };

        if !output.status.success() {
            return Err(TelemetryError::Status {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok((command, output.stdout))
    }
}

impl TelemetrySource for NvmeCli {
    async fn list_devices(&self) -> Result<Vec<String>, TelemetryError> {
        let (command, stdout) = self.run(&["list", "-o", "json"]).await?;
        parse_device_list(&command, &stdout)
    }

    async fn query_health(&self, device: &str) -> Result<Value, TelemetryError> {
        let (command, stdout) = self.run(&["smart-log", device, "-o", "json"]).await?;
        serde_json::from_slice(&stdout).map_err(|source| TelemetryError::Parse { command, source })
    }
}

/// Extracts `Devices[].DevicePath` from `nvme list -o json`.
///
/// Some nvme-cli versions print nothing at all when no controller is present;
/// that is read as an empty list.
fn parse_device_list(command: &str, stdout: &[u8]) -> Result<Vec<String>, TelemetryError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(stdout).map_err(|source| TelemetryError::Parse {
        command: command.to_string(),
        source,
    })?;

    let shape = |reason: String| TelemetryError::Shape {
        command: command.to_string(),
        reason,
    };

    let devices = value
        .get("Devices")
        .and_then(Value::as_array)
        .ok_or_else(|| shape("missing Devices array".to_string()))?;

    devices
        .iter()
        .enumerate()
        .map(|(i, dev)| {
            dev.get("DevicePath")
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .ok_or_else(|| shape(format!("Devices[{}] has no DevicePath", i)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_JSON: &str = r#"{
      "Devices" : [
        {
          "NameSpace" : 1,
          "DevicePath" : "/dev/nvme0n1",
          "Firmware" : "4B2QGXA7",
          "ModelNumber" : "Samsung SSD 980 PRO 1TB",
          "SerialNumber" : "S5GXNF0R000000",
          "UsedBytes" : 1000204886016,
          "PhysicalSize" : 1000204886016,
          "SectorSize" : 512
        },
        {
          "NameSpace" : 1,
          "DevicePath" : "/dev/nvme1n1",
          "ModelNumber" : "WD_BLACK SN850X 2000GB"
        }
      ]
    }"#;

    #[test]
    fn parses_device_paths_in_order() {
        let devices = parse_device_list("nvme list -o json", LIST_JSON.as_bytes()).expect("parse");
        assert_eq!(devices, vec!["/dev/nvme0n1", "/dev/nvme1n1"]);
    }

    #[test]
    fn empty_output_means_no_devices() {
        let devices = parse_device_list("nvme list -o json", b"  \n").expect("parse");
        assert!(devices.is_empty());
    }

    #[test]
    fn missing_devices_array_is_a_shape_error() {
        let err = parse_device_list("nvme list -o json", br#"{"Other": []}"#).unwrap_err();
        assert!(matches!(err, TelemetryError::Shape { .. }));
    }

    #[test]
    fn entry_without_path_is_a_shape_error() {
        let err =
            parse_device_list("nvme list -o json", br#"{"Devices": [{"NameSpace": 1}]}"#).unwrap_err();
        assert!(err.to_string().contains("Devices[0]"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_device_list("nvme list -o json", b"not json").unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let cli = NvmeCli::new(&TelemetryConfig {
            nvme_bin: "/nonexistent/nvme-cli-binary".to_string(),
            timeout_ms: 1000,
        });
        let err = cli.list_devices().await.unwrap_err();
        assert!(matches!(err, TelemetryError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_status_error() {
        let cli = NvmeCli::new(&TelemetryConfig {
            nvme_bin: "false".to_string(),
            timeout_ms: 5000,
        });
        let err = cli.query_health("/dev/nvme0n1").await.unwrap_err();
        assert!(matches!(err, TelemetryError::Status { .. }));
    }
}
