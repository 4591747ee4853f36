// Outbound mail transport.
//
// MailTransport is the seam both senders go through: the /send-email
// endpoint and the relay's FORWARD step. The production implementation
// submits over SMTP with STARTTLS (Gmail by default) using lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

/// A plain-text message ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Credentials or host missing from configuration.
    #[error("mail transport not configured: {0}")]
    NotConfigured(String),

    #[error("invalid address {0}")]
    Address(String),

    #[error("could not build message: {0}")]
    Message(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<(), TransportError>;
}

/// SMTP submission through an authenticated STARTTLS relay.
pub struct SmtpRelayTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelayTransport {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        if username.is_empty() || password.is_empty() {
            return Err(TransportError::NotConfigured(
                "SMTP username and password are required".to_string(),
            ));
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| TransportError::NotConfigured(format!("SMTP relay {host}: {e}")))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpRelayTransport {
    async fn send(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        let message = build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        info!(to = ?mail.to, subject = %mail.subject, "Mail sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| TransportError::Address(format!("{address:?}: {e}")))
}

/// Build a lettre message from an OutboundMail.
pub fn build_message(mail: &OutboundMail) -> Result<Message, TransportError> {
    if mail.to.is_empty() {
        return Err(TransportError::Message("no recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(&mail.from)?)
        .subject(mail.subject.as_str())
        .header(ContentType::TEXT_PLAIN);

    for recipient in &mail.to {
        builder = builder.to(parse_mailbox(recipient)?);
    }

    builder
        .body(mail.body.clone())
        .map_err(|e| TransportError::Message(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(to: Vec<&str>) -> OutboundMail {
        OutboundMail {
            from: "alice@example.com".to_string(),
            to: to.into_iter().map(String::from).collect(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
        }
    }

    #[test]
    fn test_build_message_with_multiple_recipients() {
        let message = build_message(&mail(vec!["bob@example.com", "carol@example.com"])).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("bob@example.com"));
        assert!(formatted.contains("carol@example.com"));
        assert!(formatted.contains("Subject: Hello"));
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let err = build_message(&mail(vec!["not an address"])).unwrap_err();
        assert!(matches!(err, TransportError::Address(_)));
    }

    #[test]
    fn test_build_message_requires_recipient() {
        let err = build_message(&mail(vec![])).unwrap_err();
        assert!(matches!(err, TransportError::Message(_)));
    }

    #[test]
    fn test_missing_credentials_is_not_configured() {
        let err = SmtpRelayTransport::new("smtp.gmail.com", 587, "", "", Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::NotConfigured(_)));
    }
}
