// The analysis boundary: how the relay gets verdicts and stores audit logs.
//
// The standalone relay talks to the analysis API over HTTP (HttpBoundary),
// the same /quick-analyze and /log-email-attempt endpoints any other client
// uses. When the relay runs inside `harmguard serve --relay`, LocalBoundary
// calls the engine and database directly instead.
//
// Either way a failure comes back as a BoundaryError; the pipeline decides
// what that means for the message (fail-open).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::EmailAttemptLog;
use crate::db::Database;
use crate::scoring::fusion::{FusionEngine, ToxicVerdict};
use crate::scoring::threat::should_block;

/// Wire form of a /quick-analyze response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickAnalysis {
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub verdict: ToxicVerdict,
    #[serde(default)]
    pub should_block: bool,
}

impl QuickAnalysis {
    pub fn new(content: String, verdict: ToxicVerdict) -> Self {
        let should_block = should_block(verdict.threat_level);
        Self {
            content,
            verdict,
            should_block,
        }
    }
}

/// Acknowledgement from /log-email-attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAck {
    pub status: String,
    pub message: String,
    pub id: i64,
}

#[derive(Debug, Error)]
pub enum BoundaryError {
    /// Couldn't reach the analysis service, or it answered with an error status.
    #[error("analysis service unreachable: {0}")]
    Transport(String),

    /// The service answered, but not with something we can read.
    #[error("malformed analysis response: {0}")]
    Malformed(String),

    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait AnalysisBoundary: Send + Sync {
    /// Get a fused verdict for composed message content.
    async fn quick_analyze(&self, content: &str) -> Result<ToxicVerdict, BoundaryError>;

    /// Persist an audit record and return its ID.
    async fn log_attempt(&self, attempt: &EmailAttemptLog) -> Result<i64, BoundaryError>;
}

/// Analysis boundary over HTTP.
pub struct HttpBoundary {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBoundary {
    /// `base_url` is the API root, e.g. `http://localhost:8000/api`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_request_error(&self, e: reqwest::Error) -> BoundaryError {
        if e.is_timeout() {
            BoundaryError::Timeout(self.timeout)
        } else {
            BoundaryError::Transport(e.to_string())
        }
    }

    async fn post_json<B: Serialize + Sync, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, BoundaryError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_request_error(e))?;
        if !status.is_success() {
            return Err(BoundaryError::Transport(format!("{url} returned {status}")));
        }

        serde_json::from_str(&text).map_err(|e| BoundaryError::Malformed(format!("{url}: {e}")))
    }
}

#[async_trait]
impl AnalysisBoundary for HttpBoundary {
    async fn quick_analyze(&self, content: &str) -> Result<ToxicVerdict, BoundaryError> {
        let body = serde_json::json!({ "content": content });
        let analysis: QuickAnalysis = self.post_json("quick-analyze", &body).await?;
        Ok(analysis.verdict)
    }

    async fn log_attempt(&self, attempt: &EmailAttemptLog) -> Result<i64, BoundaryError> {
        let ack: LogAck = self.post_json("log-email-attempt", attempt).await?;
        Ok(ack.id)
    }
}

/// In-process analysis boundary: the engine and database directly.
pub struct LocalBoundary {
    engine: Arc<FusionEngine>,
    db: Arc<dyn Database>,
}

impl LocalBoundary {
    pub fn new(engine: Arc<FusionEngine>, db: Arc<dyn Database>) -> Self {
        Self { engine, db }
    }
}

#[async_trait]
impl AnalysisBoundary for LocalBoundary {
    async fn quick_analyze(&self, content: &str) -> Result<ToxicVerdict, BoundaryError> {
        // Same escalation as the /quick-analyze endpoint
        Ok(self.engine.analyze(content, true).await)
    }

    async fn log_attempt(&self, attempt: &EmailAttemptLog) -> Result<i64, BoundaryError> {
        self.db
            .insert_email_attempt(attempt)
            .await
            .map_err(|e| BoundaryError::Transport(format!("{e:#}")))
    }
}
