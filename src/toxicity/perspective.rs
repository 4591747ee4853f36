// Google Perspective API backend for the general classifier.
//
// Perspective analyzes text for toxicity, identity attacks, insults, etc.
// It's free to use but rate-limited to ~1 QPS. Its attributes line up with
// the Jigsaw labels toxic-bert emits, so it slots in behind the same
// ToxicLabels mapping (PROFANITY stands in for "obscene").
//
// API docs: https://developers.perspectiveapi.com/s/about-the-api-methods

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::general::ToxicLabels;
use super::rate_limiter::RateLimiter;
use super::traits::{ProviderError, Signal, SignalProvider};

const PERSPECTIVE_URL: &str = "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

/// Perspective API general classifier.
pub struct PerspectiveClassifier {
    client: Client,
    api_key: String,
    rate_limiter: RateLimiter,
}

impl PerspectiveClassifier {
    /// Create a new Perspective API classifier with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            // Perspective free tier: 1 query per second
            rate_limiter: RateLimiter::new(1.0),
        }
    }
}

#[async_trait]
impl SignalProvider for PerspectiveClassifier {
    fn name(&self) -> &'static str {
        "perspective"
    }

    async fn classify(&self, text: &str) -> Result<Signal, ProviderError> {
        self.rate_limiter.acquire().await;

        let request = PerspectiveRequest {
            comment: Comment {
                text: text.to_string(),
            },
            requested_attributes: RequestedAttributes {
                toxicity: AttributeConfig {},
                severe_toxicity: AttributeConfig {},
                identity_attack: AttributeConfig {},
                insult: AttributeConfig {},
                profanity: AttributeConfig {},
                threat: AttributeConfig {},
            },
            languages: vec!["en".to_string()],
        };

        let response = self
            .client
            .post(PERSPECTIVE_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("Perspective request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!(
                "Perspective API returned {status}: {body}"
            )));
        }

        let result: PerspectiveResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Perspective response: {e}")))?;

        let labels = labels_from_response(&result);

        debug!(
            toxic = labels.toxic,
            severe_toxic = labels.severe_toxic,
            threat = labels.threat,
            "Perspective scored text"
        );

        Ok(labels.to_signal())
    }
}

/// Map Perspective attributes onto the Jigsaw labels. Missing attributes score 0.
fn labels_from_response(response: &PerspectiveResponse) -> ToxicLabels {
    ToxicLabels {
        toxic: extract_score(response, "TOXICITY").unwrap_or(0.0),
        severe_toxic: extract_score(response, "SEVERE_TOXICITY").unwrap_or(0.0),
        obscene: extract_score(response, "PROFANITY").unwrap_or(0.0),
        threat: extract_score(response, "THREAT").unwrap_or(0.0),
        insult: extract_score(response, "INSULT").unwrap_or(0.0),
        identity_hate: extract_score(response, "IDENTITY_ATTACK").unwrap_or(0.0),
    }
}

/// Extract a specific attribute's summary score from the API response.
fn extract_score(response: &PerspectiveResponse, attribute: &str) -> Option<f64> {
    response
        .attribute_scores
        .get(attribute)
        .map(|score| score.summary_score.value)
}

// --- Perspective API request/response types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PerspectiveRequest {
    comment: Comment,
    requested_attributes: RequestedAttributes,
    languages: Vec<String>,
}

#[derive(Serialize)]
struct Comment {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RequestedAttributes {
    toxicity: AttributeConfig,
    severe_toxicity: AttributeConfig,
    identity_attack: AttributeConfig,
    insult: AttributeConfig,
    profanity: AttributeConfig,
    threat: AttributeConfig,
}

#[derive(Serialize)]
struct AttributeConfig {}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerspectiveResponse {
    attribute_scores: HashMap<String, AttributeScore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: SummaryScore,
}

#[derive(Deserialize)]
struct SummaryScore {
    value: f64,
}
