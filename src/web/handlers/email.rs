// Email handlers.
//
// POST /api/analyze-email      parse a raw message, analyze subject + body
// POST /api/send-email         screen a message, then send it if it's clean
// POST /api/log-email-attempt  audit endpoint the standalone relay calls
//
// Configuration and transport problems never become 5xx here: send-email
// reports them as {status: "error", message} alongside whatever analysis
// already happened.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::db::models::EmailAttemptLog;
use crate::email::compose_content;
use crate::email::parse::parse_email;
use crate::email::transport::{OutboundMail, TransportError};
use crate::scoring::fusion::ToxicVerdict;
use crate::scoring::threat::{harm_type_label, should_block};
use crate::sentiment::SentimentScores;
use crate::web::{api_error, AppState};

use super::analyze::store_analysis;

#[derive(Debug, Deserialize)]
pub struct EmailInput {
    pub raw_email: String,
}

#[derive(Debug, Serialize)]
pub struct EmailAnalyzeResponse {
    pub content: String,
    pub sentiment_scores: SentimentScores,
    #[serde(flatten)]
    pub verdict: ToxicVerdict,
    pub subject: String,
    pub sender: String,
}

/// POST /api/analyze-email
pub async fn analyze_email(
    State(state): State<AppState>,
    Json(input): Json<EmailInput>,
) -> Response {
    let parsed = match parse_email(input.raw_email.as_bytes()) {
        Ok(parsed) => parsed,
        Err(e) => return api_error(StatusCode::UNPROCESSABLE_ENTITY, &format!("{e:#}")),
    };

    let content = parsed.full_content();
    let sentiment_scores = state.sentiment.polarity_scores(&content);
    let verdict = state.engine.analyze(&content, true).await;

    store_analysis(&state, &content, &sentiment_scores, &verdict).await;

    Json(EmailAnalyzeResponse {
        content,
        sentiment_scores,
        verdict,
        subject: parsed.subject,
        sender: parsed.from,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SendEmailForm {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Split a comma-separated recipient field.
fn split_recipients(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from)
        .collect()
}

/// POST /api/send-email
pub async fn send_email(
    State(state): State<AppState>,
    Form(form): Form<SendEmailForm>,
) -> impl IntoResponse {
    let sender = form
        .sender
        .filter(|s| !s.trim().is_empty())
        .or_else(|| state.default_sender.clone());

    let Some(sender) = sender else {
        return Json(json!({
            "status": "error",
            "message": "Sender email not configured",
        }));
    };

    let recipients = split_recipients(&form.recipient);
    let content = compose_content(&sender, &recipients, &form.subject, &form.body);
    let verdict = state.engine.analyze(&content, true).await;
    let blocked = should_block(verdict.threat_level);

    // Record the attempt before anything is sent, blocked or not
    let attempt = EmailAttemptLog::with_verdict(
        &sender,
        &recipients.join(", "),
        &form.subject,
        &form.body,
        &verdict,
        blocked,
    );
    let message_id = match state.db.insert_email_attempt(&attempt).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(error = %e, "Failed to record email attempt");
            None
        }
    };

    if blocked {
        info!(
            threat_level = %verdict.threat_level,
            primary_harm = harm_type_label(verdict.primary_harm_type),
            "Blocked outgoing email"
        );
        return Json(json!({
            "status": "blocked",
            "reason": format!(
                "Email blocked due to {} content (Threat Level: {})",
                harm_type_label(verdict.primary_harm_type),
                verdict.threat_level
            ),
            "analysis": verdict,
            "message_id": message_id,
        }));
    }

    let Some(transport) = state.transport.clone() else {
        return Json(json!({
            "status": "error",
            "message": "SMTP credentials not configured. Email would have been sent.",
            "analysis": verdict,
            "message_id": message_id,
        }));
    };

    let mail = OutboundMail {
        from: sender,
        to: recipients,
        subject: form.subject,
        body: form.body,
    };

    let sent = match timeout(state.forward_timeout, transport.send(&mail)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(state.forward_timeout)),
    };

    match sent {
        Ok(()) => Json(json!({
            "status": "sent",
            "message": "Email passed content checks and was sent successfully",
            "analysis": verdict,
            "message_id": message_id,
        })),
        Err(e) => {
            warn!(error = %e, "Failed to send email");
            Json(json!({
                "status": "error",
                "message": format!("Email passed content checks but failed to send: {e}"),
                "analysis": verdict,
                "message_id": message_id,
            }))
        }
    }
}

/// POST /api/log-email-attempt
pub async fn log_email_attempt(
    State(state): State<AppState>,
    Json(attempt): Json<EmailAttemptLog>,
) -> Response {
    match state.db.insert_email_attempt(&attempt).await {
        Ok(id) => Json(json!({
            "status": "success",
            "message": "Email attempt logged",
            "id": id,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to log email attempt");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to log email attempt")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_recipients() {
        assert_eq!(
            split_recipients(" a@x.com, b@x.com ,,"),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
    }
}
