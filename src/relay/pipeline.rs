// The relay's per-message state machine.
//
//   RECEIVE → PARSE → ANALYZE → DECIDE → REJECT | FORWARD → LOG
//
// RECEIVE happens in the SMTP session, which hands us a complete Envelope.
// `process` runs PARSE through FORWARD and returns the reply for the client
// together with the audit record; the session writes the reply first and
// only then calls `record`, so a slow or broken audit store can never change
// an answer that's already been given.
//
// Analysis failures fail open: the message is forwarded and logged with an
// "Unknown" verdict. Forward failures are transient (554) and never count as
// a block.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::db::models::EmailAttemptLog;
use crate::email::compose_content;
use crate::email::parse::parse_email;
use crate::email::transport::{MailTransport, OutboundMail, TransportError};
use crate::scoring::fusion::ToxicVerdict;
use crate::scoring::threat::{harm_type_label, should_block};

use super::boundary::{AnalysisBoundary, BoundaryError};

/// One received mail transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    /// The raw DATA payload, dot-unstuffed.
    pub data: Vec<u8>,
}

/// An SMTP status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub text: String,
}

impl SmtpReply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn rejected() -> Self {
        Self::new(550, "Email rejected due to harmful content detection")
    }

    pub fn accepted() -> Self {
        Self::new(250, "Message accepted for delivery")
    }

    pub fn accepted_degraded() -> Self {
        Self::new(250, "Message accepted for delivery (analysis error)")
    }

    pub fn forward_failed(reason: &TransportError) -> Self {
        Self::new(554, format!("Transaction failed: {reason}"))
    }
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// Where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Rejected,
    Forwarded { degraded: bool },
    ForwardFailed { degraded: bool },
}

/// The result of processing one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Disposition {
    pub reply: SmtpReply,
    pub outcome: Outcome,
    pub audit: EmailAttemptLog,
}

/// Deadlines for each blocking step.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub analyze_timeout: Duration,
    pub forward_timeout: Duration,
    pub log_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            analyze_timeout: Duration::from_secs(30),
            forward_timeout: Duration::from_secs(60),
            log_timeout: Duration::from_secs(10),
        }
    }
}

/// The parsed fields of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub subject: String,
    pub body: String,
}

/// PARSE: subject and text body. Unparseable data, or data that parses to
/// nothing at all, is taken as a raw body.
pub fn parse_message(data: &[u8]) -> ParsedMessage {
    let raw = || ParsedMessage {
        subject: String::new(),
        body: String::from_utf8_lossy(data).into_owned(),
    };

    match parse_email(data) {
        Ok(parsed) if parsed.subject.is_empty() && parsed.body.trim().is_empty() => raw(),
        Ok(parsed) => ParsedMessage {
            subject: parsed.subject,
            body: parsed.body,
        },
        Err(e) => {
            warn!(error = %e, "Unparseable message, analyzing raw payload");
            raw()
        }
    }
}

pub struct RelayPipeline {
    boundary: Arc<dyn AnalysisBoundary>,
    transport: Arc<dyn MailTransport>,
    settings: RelaySettings,
}

impl RelayPipeline {
    pub fn new(
        boundary: Arc<dyn AnalysisBoundary>,
        transport: Arc<dyn MailTransport>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            boundary,
            transport,
            settings,
        }
    }

    /// ANALYZE, bounded by the analyze deadline.
    async fn analyze(&self, content: &str) -> Result<ToxicVerdict, BoundaryError> {
        let deadline = self.settings.analyze_timeout;
        match timeout(deadline, self.boundary.quick_analyze(content)).await {
            Ok(result) => result,
            Err(_) => Err(BoundaryError::Timeout(deadline)),
        }
    }

    /// FORWARD, bounded by the forward deadline.
    async fn forward(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        let deadline = self.settings.forward_timeout;
        match timeout(deadline, self.transport.send(mail)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(deadline)),
        }
    }

    /// Run PARSE → ANALYZE → DECIDE → REJECT | FORWARD for one envelope.
    pub async fn process(&self, envelope: &Envelope) -> Disposition {
        let parsed = parse_message(&envelope.data);
        let recipients = envelope.rcpt_to.join(", ");
        let content = compose_content(
            &envelope.mail_from,
            &envelope.rcpt_to,
            &parsed.subject,
            &parsed.body,
        );

        info!(
            from = %envelope.mail_from,
            to = %recipients,
            subject = %parsed.subject,
            "Analyzing relayed message"
        );

        let verdict = match self.analyze(&content).await {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                warn!(error = %e, from = %envelope.mail_from, "Analysis failed, forwarding unscreened");
                None
            }
        };

        // DECIDE
        if let Some(verdict) = verdict.as_ref().filter(|v| should_block(v.threat_level)) {
            info!(
                from = %envelope.mail_from,
                threat_level = %verdict.threat_level,
                primary_harm = harm_type_label(verdict.primary_harm_type),
                "Blocked relayed message"
            );
            return Disposition {
                reply: SmtpReply::rejected(),
                outcome: Outcome::Rejected,
                audit: EmailAttemptLog::with_verdict(
                    &envelope.mail_from,
                    &recipients,
                    &parsed.subject,
                    &parsed.body,
                    verdict,
                    true,
                ),
            };
        }

        let degraded = verdict.is_none();
        let audit = match &verdict {
            Some(v) => EmailAttemptLog::with_verdict(
                &envelope.mail_from,
                &recipients,
                &parsed.subject,
                &parsed.body,
                v,
                false,
            ),
            None => EmailAttemptLog::degraded(
                &envelope.mail_from,
                &recipients,
                &parsed.subject,
                &parsed.body,
            ),
        };

        let mail = OutboundMail {
            from: envelope.mail_from.clone(),
            to: envelope.rcpt_to.clone(),
            subject: parsed.subject.clone(),
            body: parsed.body.clone(),
        };

        match self.forward(&mail).await {
            Ok(()) => {
                info!(to = %recipients, degraded, "Forwarded relayed message");
                let reply = if degraded {
                    SmtpReply::accepted_degraded()
                } else {
                    SmtpReply::accepted()
                };
                Disposition {
                    reply,
                    outcome: Outcome::Forwarded { degraded },
                    audit,
                }
            }
            Err(e) => {
                warn!(error = %e, to = %recipients, "Forwarding failed");
                Disposition {
                    reply: SmtpReply::forward_failed(&e),
                    outcome: Outcome::ForwardFailed { degraded },
                    audit,
                }
            }
        }
    }

    /// LOG: best effort. Errors and timeouts are logged and dropped.
    pub async fn record(&self, audit: &EmailAttemptLog) {
        let deadline = self.settings.log_timeout;
        match timeout(deadline, self.boundary.log_attempt(audit)).await {
            Ok(Ok(id)) => info!(id, was_blocked = audit.was_blocked, "Logged email attempt"),
            Ok(Err(e)) => warn!(error = %e, "Failed to log email attempt"),
            Err(_) => warn!(timeout = ?deadline, "Logging email attempt timed out"),
        }
    }
}
