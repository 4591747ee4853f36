// LLM-backed categorical classifier (OpenAI chat completions).
//
// Asked for a JSON object scoring all six harm categories. The model is
// only consulted when the fusion engine escalates, and its reply is treated
// as untrusted: anything that isn't a recognizable category score is dropped,
// and a reply that isn't JSON at all is a malformed-response error.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::scoring::category::{Category, PartialScores};

use super::rate_limiter::RateLimiter;
use super::traits::{ProviderError, Signal, SignalProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are a harmful content detection assistant. Analyze the text \
and provide scores between 0 and 1 for the following categories: hate_speech, cyberbullying, \
threats, self_harm, sexual_content, and misinformation. Respond ONLY with a JSON object that \
contains these keys.";

/// Low temperature keeps repeated scoring of the same text close together.
const TEMPERATURE: f64 = 0.1;
const MAX_TOKENS: u32 = 150;

/// OpenAI-backed secondary classifier.
pub struct OpenAiClassifier {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl OpenAiClassifier {
    pub fn new(api_key: String, base_url: String, model: String, requests_per_minute: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            rate_limiter: RateLimiter::per_minute(requests_per_minute),
        }
    }
}

#[async_trait]
impl SignalProvider for OpenAiClassifier {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn classify(&self, text: &str) -> Result<Signal, ProviderError> {
        self.rate_limiter.acquire().await;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Analyze this text for harmful content: \"{text}\""),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("OpenAI completion envelope: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Malformed("completion had no content".to_string()))?;

        let scores = parse_category_reply(&content)?;
        debug!(reply = %content, "OpenAI categorized text");

        Ok(Signal::from_scores(scores))
    }
}

/// Parse the model's reply into category scores.
///
/// Accepts a bare object or one nested under `category_scores`, optionally
/// wrapped in a markdown code fence. Unknown keys and non-numeric values are
/// ignored; values are clamped into [0, 1].
pub fn parse_category_reply(content: &str) -> Result<PartialScores, ProviderError> {
    let body = strip_code_fence(content);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("reply is not JSON: {e}")))?;

    let object = match value.get("category_scores") {
        Some(nested @ Value::Object(_)) => nested,
        _ => &value,
    };

    let Value::Object(map) = object else {
        return Err(ProviderError::Malformed(
            "reply is not a JSON object".to_string(),
        ));
    };

    Ok(map
        .iter()
        .filter_map(|(key, value)| Some((Category::parse(key)?, value.as_f64()?)))
        .collect())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().trim_end_matches("```").trim()
}

// --- Chat completions request/response types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}
