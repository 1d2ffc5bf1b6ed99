//! Email notifications over SMTP.

use std::fmt;

use lettre::{
    AsyncSmtpTransport, AsyncTransport as _, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::{prelude::*, secret::Secret};

use super::{Notification, Notifier};

/// Sends plain-text email through an authenticated SMTPS relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    /// Create a notifier. The sender address doubles as the SMTP login.
    ///
    /// No connection is made until the first message is sent.
    pub fn new(
        host: &str,
        port: u16,
        sender: &str,
        receiver: &str,
        password: Secret,
    ) -> Result<Self> {
        let from = sender
            .parse::<Mailbox>()
            .with_context(|| format!("SENDER is not a valid email address: {sender:?}"))?;
        let to = receiver
            .parse::<Mailbox>()
            .with_context(|| format!("RECEIVER is not a valid email address: {receiver:?}"))?;
        let credentials = Credentials::new(from.email.to_string(), password.expose().to_owned());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .with_context(|| format!("cannot configure SMTP relay {host:?}"))?
            .port(port)
            .credentials(credentials)
            .build();
        Ok(Self {
            transport,
            from,
            to,
        })
    }

    /// Build the email for a notification.
    fn message(&self, notification: &Notification) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .context("cannot build notification email")
    }
}

impl fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from.to_string())
            .field("to", &self.to.to_string())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(level = "debug", skip_all, fields(to = %self.to))]
    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = self.message(notification)?;
        self.transport
            .send(message)
            .await
            .with_context(|| format!("Failed to send email to {}", self.to))?;
        debug!("Email sent");
        Ok(())
    }
}
