//! Notifications sent after a result has been stored.
//!
//! Notifications are best-effort: the caller logs failures and moves on.

use std::{fmt, sync::Arc};

use clap::{Args, ValueEnum};

use crate::{prelude::*, secret::Secret};

pub mod smtp;

/// A message to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Subject line.
    pub subject: String,

    /// Plain-text body.
    pub body: String,
}

/// Interface to a notification transport. Sender and recipient are part of
/// the transport's configuration.
#[async_trait]
pub trait Notifier: fmt::Debug + Send + Sync + 'static {
    /// Deliver a notification.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// A notifier which only writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            subject = %notification.subject,
            body = %notification.body,
            "Notification"
        );
        Ok(())
    }
}

/// Our different notification transports.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum NotifierType {
    /// Email over SMTP with implicit TLS.
    #[default]
    Smtp,

    /// Log notifications instead of sending them.
    Log,
}

/// Notification options.
#[derive(Args, Clone, Debug)]
pub struct NotifyOpts {
    /// How to deliver notifications.
    #[clap(long, env = "NOTIFIER", value_enum, default_value_t = NotifierType::default())]
    pub notifier: NotifierType,

    /// SMTP server.
    #[clap(long, env = "SMTP_HOST", default_value = "smtp.gmail.com")]
    pub smtp_host: String,

    /// SMTP port. The connection uses TLS from the start (SMTPS).
    #[clap(long, env = "SMTP_PORT", default_value = "465")]
    pub smtp_port: u16,

    /// Email address to send from. Also used as the SMTP login.
    #[clap(long, env = "SENDER")]
    pub sender: Option<String>,

    /// Email address to notify.
    #[clap(long, env = "RECEIVER")]
    pub receiver: Option<String>,

    /// SMTP password (for Gmail, an app password).
    #[clap(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<Secret>,
}

impl NotifyOpts {
    /// Check our settings and create the configured notifier.
    pub fn create_notifier(&self) -> Result<Arc<dyn Notifier>> {
        match self.notifier {
            NotifierType::Smtp => {
                let missing = |name: &str| anyhow!("{name} must be set to send email notifications");
                let sender = self.sender.as_deref().ok_or_else(|| missing("SENDER"))?;
                let receiver = self.receiver.as_deref().ok_or_else(|| missing("RECEIVER"))?;
                let password = self
                    .smtp_password
                    .clone()
                    .ok_or_else(|| missing("SMTP_PASSWORD"))?;
                Ok(Arc::new(smtp::SmtpNotifier::new(
                    &self.smtp_host,
                    self.smtp_port,
                    sender,
                    receiver,
                    password,
                )?))
            }
            NotifierType::Log => Ok(Arc::new(LogNotifier)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_requires_addresses_and_password() {
        let opts = NotifyOpts {
            notifier: NotifierType::Smtp,
            smtp_host: "smtp.example.com".to_owned(),
            smtp_port: 465,
            sender: Some("ocr@example.com".to_owned()),
            receiver: None,
            smtp_password: None,
        };
        let err = opts.create_notifier().unwrap_err();
        assert!(err.to_string().contains("RECEIVER"));
    }
}
