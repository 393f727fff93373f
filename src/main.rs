mod check;
mod collectors;
mod config;
mod diff;
mod metrics;
mod notify;
mod state;
mod store;

use check::run_check;
use clap::Parser;
use collectors::nvme::NvmeCli;
use config::{Config, ConfigError};
use notify::Notifier;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Compares NVMe SMART counters against the last run and reports changes.
/// Meant to be run from cron; overlapping runs against one persist file are
/// not supported.
#[derive(Parser, Debug)]
#[command(name = "nvmewatch")]
#[command(version)]
struct Cli {
    /// Optional YAML config; flags below override its values.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// File to persist state in
    #[arg(long)]
    persist_file: Option<String>,
    /// Only update persisted data if it is older than this many hours
    #[arg(long = "minhours")]
    min_hours: Option<u64>,
    /// From email address; without it the report goes to stdout
    #[arg(long = "fromaddr")]
    from_addr: Option<String>,
    /// To email address
    #[arg(long = "toaddr")]
    to_addr: Option<String>,
    #[arg(long)]
    smtp_host: Option<String>,
    #[arg(long)]
    smtp_port: Option<u16>,
    /// Write a Prometheus textfile with the current counters
    #[arg(long)]
    metrics_file: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let notifier = match Notifier::from_config(&cfg) {
        Ok(n) => n,
        Err(err) => {
            error!(error = %err, "failed to set up notification");
            std::process::exit(1);
        }
    };

    info!(
        persist_file = %cfg.persist_path().display(),
        min_hours = cfg.min_hours,
        email = matches!(notifier, Notifier::Email(_)),
        "starting nvmewatch"
    );

    let source = NvmeCli::new(&cfg.telemetry);
    let summary = match run_check(&cfg, &source, &notifier, now_unix()).await {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "check aborted, nothing reported or persisted");
            std::process::exit(1);
        }
    };

    if let Some(err) = &summary.notify_error {
        error!(error = %err, "failed to deliver report");
    }
    if let Some(err) = &summary.persist_error {
        error!(error = %err, "failed to persist snapshot");
    }
    if !summary.is_success() {
        std::process::exit(1);
    }

    info!(
        changed = summary.any_change,
        persisted = summary.persisted,
        "check finished"
    );
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    if let Some(path) = &cli.persist_file {
        cfg.persist_file = path.clone();
    }
    if let Some(hours) = cli.min_hours {
        cfg.min_hours = hours;
    }
    if cli.from_addr.is_some() {
        cfg.from_addr = cli.from_addr.clone();
    }
    if cli.to_addr.is_some() {
        cfg.to_addr = cli.to_addr.clone();
    }
    if let Some(host) = &cli.smtp_host {
        cfg.smtp.host = host.clone();
    }
    if let Some(port) = cli.smtp_port {
        cfg.smtp.port = port;
    }
    if cli.metrics_file.is_some() {
        cfg.metrics_file = cli.metrics_file.clone();
    }

    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_matches_legacy_flags() {
        let cli = Cli::try_parse_from([
            "nvmewatch",
            "--persist-file",
            "/tmp/state.json",
            "--minhours",
            "6",
            "--fromaddr",
            "nvme@example.org",
            "--toaddr",
            "ops@example.org",
        ])
        .expect("parse");

        let cfg = load_config(&cli).expect("config");
        assert_eq!(cfg.persist_file, "/tmp/state.json");
        assert_eq!(cfg.min_hours, 6);
        assert_eq!(cfg.from_addr.as_deref(), Some("nvme@example.org"));
        assert_eq!(cfg.to_addr.as_deref(), Some("ops@example.org"));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nvmewatch.yaml");
        std::fs::write(&path, "min_hours: 12\npersist_file: /var/lib/a.json\n").expect("write");

        let cli = Cli::try_parse_from([
            "nvmewatch",
            "--config",
            path.to_str().expect("utf8 path"),
            "--minhours",
            "1",
        ])
        .expect("parse");

        let cfg = load_config(&cli).expect("config");
        assert_eq!(cfg.min_hours, 1);
        assert_eq!(cfg.persist_file, "/var/lib/a.json");
    }

    #[test]
    fn sender_without_recipient_fails_validation() {
        let cli = Cli::try_parse_from(["nvmewatch", "--fromaddr", "nvme@example.org"])
            .expect("parse");
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["nvmewatch", "--config", "/nonexistent/nvmewatch.yaml"])
            .expect("parse");
        assert!(matches!(load_config(&cli), Err(ConfigError::Read { .. })));
    }
}
