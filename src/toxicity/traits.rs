// Signal provider trait: the swap-ready classifier abstraction.
//
// Every classifier (the general toxicity model, the LLM categorizer, the
// keyword dictionary) implements SignalProvider. The fusion engine only ever
// sees `Arc<dyn SignalProvider>` and always calls through `classify_bounded`,
// which turns errors and timeouts into an empty signal so one misbehaving
// classifier can never fail an analysis.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::output::truncate_chars;
use crate::scoring::category::PartialScores;

/// What one provider reported for one piece of text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signal {
    /// Per-category scores; categories the provider has no opinion on are absent.
    pub scores: PartialScores,
    /// The provider's own overall severity estimate (general classifier only).
    pub severity: Option<f64>,
    /// Raw "toxic" sub-signal used for the escalation test (general classifier only).
    pub escalation_hint: Option<f64>,
}

impl Signal {
    /// The signal of a provider that failed or said nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_scores(scores: PartialScores) -> Self {
        Self {
            scores,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty() && self.severity.is_none() && self.escalation_hint.is_none()
    }
}

/// Why a provider produced nothing for a call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not run: model missing, network down, upstream 5xx.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered, but not in a shape we can use.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::Malformed(_) => "malformed",
            ProviderError::Timeout(_) => "timeout",
        }
    }
}

/// A classifier that maps text to (partial) category scores.
///
/// Implementations are built once at startup and shared read-only, so they
/// must not keep per-call mutable state.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Short stable name used in logs.
    fn name(&self) -> &'static str;

    async fn classify(&self, text: &str) -> Result<Signal, ProviderError>;
}

/// Call a provider with a deadline. Never fails: any error or timeout is
/// logged and becomes `Signal::empty()`.
pub async fn classify_bounded(
    provider: &dyn SignalProvider,
    text: &str,
    timeout: Duration,
) -> Signal {
    let outcome = match tokio::time::timeout(timeout, provider.classify(text)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    };

    match outcome {
        Ok(signal) => signal,
        Err(e) => {
            warn!(
                provider = provider.name(),
                kind = e.kind(),
                error = %e,
                text_preview = %truncate_chars(text, 50),
                "Signal provider failed, continuing without it"
            );
            Signal::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::category::Category;

    struct Slow;

    #[async_trait]
    impl SignalProvider for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn classify(&self, _text: &str) -> Result<Signal, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Signal::from_scores(
                PartialScores::new().with(Category::Threats, 1.0),
            ))
        }
    }

    struct Broken;

    #[async_trait]
    impl SignalProvider for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn classify(&self, _text: &str) -> Result<Signal, ProviderError> {
            Err(ProviderError::Malformed("not json".to_string()))
        }
    }

    #[tokio::test]
    async fn test_timeout_yields_empty_signal() {
        let signal = classify_bounded(&Slow, "hi", Duration::from_millis(20)).await;
        assert!(signal.is_empty());
    }

    #[tokio::test]
    async fn test_error_yields_empty_signal() {
        let signal = classify_bounded(&Broken, "hi", Duration::from_secs(1)).await;
        assert!(signal.is_empty());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ProviderError::Unavailable("x".into()).kind(), "unavailable");
        assert_eq!(ProviderError::Timeout(Duration::from_secs(1)).kind(), "timeout");
    }
}
