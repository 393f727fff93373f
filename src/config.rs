use crate::state::{TrackedFields, DEFAULT_TRACKED_FIELDS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_persist_file")]
    pub persist_file: String,
    #[serde(default)]
    pub min_hours: u64,
    #[serde(default)]
    pub from_addr: Option<String>,
    #[serde(default)]
    pub to_addr: Option<String>,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_tracked_fields")]
    pub tracked_fields: Vec<String>,
    #[serde(default)]
    pub metrics_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_nvme_bin")]
    pub nvme_bin: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persist_file: default_persist_file(),
            min_hours: 0,
            from_addr: None,
            to_addr: None,
            smtp: SmtpConfig::default(),
            telemetry: TelemetryConfig::default(),
            tracked_fields: default_tracked_fields(),
            metrics_file: None,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            nvme_bin: default_nvme_bin(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persist_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "persist_file must not be empty".to_string(),
            ));
        }
        if self.from_addr.is_some() && self.to_addr.is_none() {
            return Err(ConfigError::Validation(
                "to_addr is required when from_addr is set".to_string(),
            ));
        }
        if self.smtp.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "smtp.host must not be empty".to_string(),
            ));
        }
        if self.smtp.port == 0 {
            return Err(ConfigError::Validation(
                "smtp.port must be in 1..65535".to_string(),
            ));
        }
        if self.telemetry.nvme_bin.trim().is_empty() {
            return Err(ConfigError::Validation(
                "telemetry.nvme_bin must not be empty".to_string(),
            ));
        }
        if self.telemetry.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "telemetry.timeout_ms must be > 0".to_string(),
            ));
        }

        validate_tracked_fields(&self.tracked_fields)?;

        Ok(())
    }

    pub fn persist_path(&self) -> PathBuf {
        expand_home(&self.persist_file)
    }

    pub fn metrics_path(&self) -> Option<PathBuf> {
        self.metrics_file.as_deref().map(expand_home)
    }

    pub fn tracked_fields(&self) -> TrackedFields {
        TrackedFields::new(self.tracked_fields.iter().cloned())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_tracked_fields(fields: &[String]) -> Result<(), ConfigError> {
    if fields.is_empty() {
        return Err(ConfigError::Validation(
            "tracked_fields must list at least one field".to_string(),
        ));
    }
    let mut names = HashSet::new();
    for field in fields {
        if field.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tracked_fields[*] must not be empty".to_string(),
            ));
        }
        if !names.insert(field.as_str()) {
            return Err(ConfigError::Validation(format!(
                "tracked field '{}' is listed twice",
                field
            )));
        }
    }
    Ok(())
}

/// Expands a leading `~/` to `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn default_persist_file() -> String {
    "~/.nvmecheck.json".to_string()
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

const fn default_smtp_port() -> u16 {
    25
}

fn default_nvme_bin() -> String {
    "nvme".to_string()
}

const fn default_timeout_ms() -> u64 {
    30_000
}

fn default_tracked_fields() -> Vec<String> {
    DEFAULT_TRACKED_FIELDS.iter().map(|f| f.to_string()).collect()
}
