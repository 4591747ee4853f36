// Text analysis handlers.
//
// POST /api/analyze           fused verdict + sentiment, stored
// POST /api/quick-analyze     fused verdict + should_block, not stored
// POST /api/analyze-openai    the LLM categorizer's raw opinion, unfused
// POST /api/analyze-keywords  keyword-only verdict + should_block
//
// /analyze and /quick-analyze always consult the LLM categorizer when one is
// configured; base-only analysis is the fallback, not the default.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::db::models::NewAnalysisRecord;
use crate::relay::boundary::QuickAnalysis;
use crate::scoring::fusion::{standalone_verdict, ToxicVerdict};
use crate::scoring::threat::harm_type_label;
use crate::sentiment::SentimentScores;
use crate::web::AppState;

use super::TextInput;

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub content: String,
    pub sentiment_scores: SentimentScores,
    #[serde(flatten)]
    pub verdict: ToxicVerdict,
}

/// Store an analysis. Storage is best-effort: a failure is logged and the
/// caller still gets its verdict.
pub(crate) async fn store_analysis(
    state: &AppState,
    content: &str,
    sentiment: &SentimentScores,
    verdict: &ToxicVerdict,
) {
    let record = NewAnalysisRecord {
        content: content.to_string(),
        negative_score: sentiment.neg,
        verdict: verdict.clone(),
    };
    if let Err(e) = state.db.insert_analysis(&record).await {
        warn!(error = %e, "Failed to store analysis record");
    }
}

/// POST /api/analyze
pub async fn analyze(
    State(state): State<AppState>,
    Json(input): Json<TextInput>,
) -> impl IntoResponse {
    let sentiment_scores = state.sentiment.polarity_scores(&input.content);
    let verdict = state.engine.analyze(&input.content, true).await;

    store_analysis(&state, &input.content, &sentiment_scores, &verdict).await;

    Json(AnalyzeResponse {
        content: input.content,
        sentiment_scores,
        verdict,
    })
}

/// POST /api/quick-analyze
pub async fn quick_analyze(
    State(state): State<AppState>,
    Json(input): Json<TextInput>,
) -> impl IntoResponse {
    let verdict = state.engine.analyze(&input.content, true).await;
    Json(QuickAnalysis::new(input.content, verdict))
}

/// POST /api/analyze-openai
pub async fn analyze_openai(
    State(state): State<AppState>,
    Json(input): Json<TextInput>,
) -> impl IntoResponse {
    match state.engine.secondary_only(&input.content).await {
        Some(secondary) => Json(serde_json::json!({
            "content": input.content,
            "openai_analysis": secondary.scores,
            "threat_level": secondary.threat_level,
            "primary_harm_type": harm_type_label(secondary.primary_harm_type),
        })),
        None => Json(serde_json::json!({
            "content": input.content,
            "error": "OpenAI analysis failed or returned no results",
            "fallback": "Using only toxic-bert results instead",
        })),
    }
}

/// POST /api/analyze-keywords
pub async fn analyze_keywords(
    State(state): State<AppState>,
    Json(input): Json<TextInput>,
) -> impl IntoResponse {
    let scores = state.keywords.score(&input.content);
    let verdict = standalone_verdict(&scores);
    Json(QuickAnalysis::new(input.content, verdict))
}
