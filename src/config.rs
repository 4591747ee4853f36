use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::toxicity::{download, openai};

/// Which general toxicity classifier to use.
#[derive(Debug, Clone, PartialEq)]
pub enum ScorerBackend {
    /// Local ONNX toxic-bert model (default): no API key needed, no rate limits
    Onnx,
    /// Google Perspective API: requires PERSPECTIVE_API_KEY, 1 QPS limit
    Perspective,
}

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which general classifier to use (default: Onnx)
    pub scorer_backend: ScorerBackend,
    /// Directory containing the ONNX model files
    pub model_dir: PathBuf,
    /// Where `download-model` fetches toxic-bert from
    pub model_url: String,
    pub perspective_api_key: String,

    /// OpenAI key for the LLM categorizer. Empty means base-only analysis.
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub openai_requests_per_minute: u32,

    pub db_path: String,

    /// Gmail account used as the default sender and SMTP login.
    pub gmail_email: String,
    /// Gmail app password. Without it nothing is ever sent.
    pub gmail_app_password: String,
    pub smtp_host: String,
    pub smtp_port: u16,

    /// Base URL of the analysis API the standalone relay calls.
    pub analysis_url: String,

    /// Deadline for a single signal provider call.
    pub provider_timeout: Duration,
    /// Deadline for the relay's ANALYZE step.
    pub analyze_timeout: Duration,
    /// Deadline for the relay's FORWARD step.
    pub forward_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default; the require_* methods check that a given
    /// command has what it needs.
    pub fn load() -> Result<Self> {
        let scorer_backend = match env::var("HARMGUARD_SCORER").as_deref() {
            Ok("perspective") => ScorerBackend::Perspective,
            // "onnx" or unset both default to ONNX
            _ => ScorerBackend::Onnx,
        };

        let model_dir = env::var("HARMGUARD_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| download::default_model_dir());

        Ok(Self {
            scorer_backend,
            model_dir,
            model_url: env_or("HARMGUARD_MODEL_URL", download::DEFAULT_MODEL_URL),
            perspective_api_key: env::var("PERSPECTIVE_API_KEY").unwrap_or_default(),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_model: env_or("OPENAI_MODEL", openai::DEFAULT_MODEL),
            openai_base_url: env_or("OPENAI_BASE_URL", openai::DEFAULT_BASE_URL),
            openai_requests_per_minute: env_parse("HARMGUARD_OPENAI_RPM", 500)?,
            db_path: env_or("HARMGUARD_DB_PATH", "./harmguard.db"),
            gmail_email: env::var("GMAIL_EMAIL").unwrap_or_default(),
            gmail_app_password: env::var("GMAIL_APP_PASSWORD").unwrap_or_default(),
            smtp_host: env_or("SMTP_HOST", "smtp.gmail.com"),
            smtp_port: env_parse("SMTP_PORT", 587)?,
            analysis_url: env_or("HARMGUARD_ANALYSIS_URL", "http://localhost:8000/api"),
            provider_timeout: Duration::from_secs(env_parse(
                "HARMGUARD_PROVIDER_TIMEOUT_SECS",
                10,
            )?),
            analyze_timeout: Duration::from_secs(env_parse("HARMGUARD_ANALYZE_TIMEOUT_SECS", 30)?),
            forward_timeout: Duration::from_secs(env_parse("HARMGUARD_FORWARD_TIMEOUT_SECS", 60)?),
        })
    }

    /// Whether the LLM categorizer can be constructed.
    pub fn has_openai(&self) -> bool {
        !self.openai_api_key.is_empty()
    }

    /// Whether outbound mail can be sent.
    pub fn has_smtp_credentials(&self) -> bool {
        !self.gmail_email.is_empty() && !self.gmail_app_password.is_empty()
    }

    /// Check that the Perspective API key is configured.
    pub fn require_perspective(&self) -> Result<()> {
        if self.perspective_api_key.is_empty() {
            anyhow::bail!(
                "PERSPECTIVE_API_KEY not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// Validate that the chosen scorer backend has what it needs.
    /// For ONNX: model files must exist (or user should run download-model).
    /// For Perspective: API key must be set.
    pub fn require_scorer(&self) -> Result<()> {
        match self.scorer_backend {
            ScorerBackend::Onnx => {
                if !download::model_files_present(&self.model_dir) {
                    anyhow::bail!(
                        "ONNX model files not found in {}\n\
                         Run `harmguard download-model` to download them.\n\
                         Or set HARMGUARD_SCORER=perspective to use the Perspective API instead.",
                        self.model_dir.display()
                    );
                }
                Ok(())
            }
            ScorerBackend::Perspective => self.require_perspective(),
        }
    }

    /// Check that outbound SMTP credentials are configured.
    /// The relay can't forward anything without them.
    pub fn require_smtp(&self) -> Result<()> {
        if !self.has_smtp_credentials() {
            anyhow::bail!(
                "GMAIL_EMAIL and GMAIL_APP_PASSWORD must be set to forward mail.\n\
                 Add them to your .env file. See .env.example for details."
            );
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}
