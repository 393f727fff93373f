use crate::config::Config;
use crate::diff::ChangeReport;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sysinfo::{System, SystemExt};
use thiserror::Error;
use tracing::info;

pub const NO_CHANGES_BODY: &str = "No changes reported to any NVME counters";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid email address {addr}: {source}")]
    Address {
        addr: String,
        source: lettre::address::AddressError,
    },
    #[error("failed to build email: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("failed to send email via SMTP: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

pub fn subject(host: &str, any_change: bool) -> String {
    if any_change {
        format!("NVME report for {} (CONTAINS CHANGES)", host)
    } else {
        format!("NVME report for {}", host)
    }
}

pub fn host_name() -> String {
    System::new()
        .host_name()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

pub struct EmailNotifier {
    from: Mailbox,
    to: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

/// Delivery is picked from configuration once: email when a sender address is
/// configured, stdout otherwise.
pub enum Notifier {
    Email(EmailNotifier),
    Stdout,
}

impl Notifier {
    pub fn from_config(cfg: &Config) -> Result<Self, NotifyError> {
        let (Some(from), Some(to)) = (cfg.from_addr.as_deref(), cfg.to_addr.as_deref()) else {
            return Ok(Self::Stdout);
        };

        let from = parse_mailbox(from)?;
        let to = parse_mailbox(to)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.smtp.host)
            .port(cfg.smtp.port)
            .build();

        Ok(Self::Email(EmailNotifier {
            from,
            to,
            transport,
        }))
    }

    /// Email goes out on every run so silence means the job stopped running.
    /// Stdout only gets output when something changed.
    pub fn notification(
        &self,
        host: &str,
        report: &ChangeReport,
        any_change: bool,
    ) -> Option<Notification> {
        build_notification(matches!(self, Self::Email(_)), host, report, any_change)
    }

    pub async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self {
            Self::Stdout => {
                println!("{}", notification.body);
                Ok(())
            }
            Self::Email(email) => {
                let msg = Message::builder()
                    .from(email.from.clone())
                    .to(email.to.clone())
                    .subject(notification.subject.clone())
                    .header(ContentType::TEXT_PLAIN)
                    .body(notification.body.clone())?;
                email.transport.send(msg).await?;
                info!(to = %email.to, subject = %notification.subject, "report emailed");
                Ok(())
            }
        }
    }
}

fn build_notification(
    email: bool,
    host: &str,
    report: &ChangeReport,
    any_change: bool,
) -> Option<Notification> {
    match (email, any_change) {
        (_, true) => Some(Notification {
            subject: subject(host, true),
            body: report.render(),
        }),
        (true, false) => Some(Notification {
            subject: subject(host, false),
            body: NO_CHANGES_BODY.to_string(),
        }),
        (false, false) => None,
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.parse().map_err(|source| NotifyError::Address {
        addr: addr.to_string(),
        source,
    })
}
