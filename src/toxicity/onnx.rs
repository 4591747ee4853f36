// Local ONNX general classifier using the toxic-bert Jigsaw model.
//
// Runs entirely on the local CPU: no API calls, no rate limits, no network
// dependency. This is the always-on provider, so it has to be cheap enough
// to sit in front of every analysis call and every relayed message.
//
// Output: 6 Jigsaw labels with continuous 0-1 scores via sigmoid.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

use super::download::{TOXICITY_MODEL_FILE, TOXICITY_TOKENIZER_FILE};
use super::general::ToxicLabels;
use super::traits::{ProviderError, Signal, SignalProvider};

/// Labels output by toxic-bert, in the order the model returns them.
const LABEL_ORDER: [&str; 6] = [
    "toxic",
    "severe_toxic",
    "obscene",
    "threat",
    "insult",
    "identity_hate",
];

/// BERT's positional limit. Longer inputs (whole email bodies) are truncated.
const MAX_SEQ_LEN: usize = 512;

/// BERT [PAD] token id.
const PAD_ID: i64 = 0;

/// Local ONNX-based general classifier. Holds the model session and tokenizer
/// behind Arc<Mutex> so inference can be offloaded to spawn_blocking without
/// blocking the async runtime.
pub struct OnnxToxicityClassifier {
    // ort::Session::run takes &mut self; the mutex serializes inference only
    // and is never visible to callers.
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

impl OnnxToxicityClassifier {
    /// Load the ONNX model and tokenizer from the given directory.
    ///
    /// Call `download::download_model()` first if the files aren't there.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join(TOXICITY_MODEL_FILE);
        let tokenizer_path = model_dir.join(TOXICITY_TOKENIZER_FILE);

        if !model_path.exists() {
            anyhow::bail!(
                "Model file not found: {}\nRun `harmguard download-model` to download it.",
                model_path.display()
            );
        }
        if !tokenizer_path.exists() {
            anyhow::bail!(
                "Tokenizer file not found: {}\nRun `harmguard download-model` to download it.",
                tokenizer_path.display()
            );
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        configure_truncation(&mut tokenizer)?;

        debug!("Loaded ONNX toxicity model from {}", model_dir.display());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
        })
    }

    /// Batch inference: tokenize all texts, run one forward pass, apply
    /// sigmoid to logits.
    pub async fn infer_batch(&self, texts: &[String]) -> Result<Vec<ToxicLabels>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let encodings: Vec<_> = texts
                .iter()
                .map(|t| {
                    tokenizer
                        .encode(t.as_str(), true)
                        .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
                })
                .collect::<Result<Vec<_>>>()?;

            let batch_size = encodings.len();
            let max_len = encodings
                .iter()
                .map(|e| e.get_ids().len())
                .max()
                .unwrap_or(0);

            // Shape: [batch_size, max_len], right-padded
            let mut input_ids_flat: Vec<i64> = Vec::with_capacity(batch_size * max_len);
            let mut attention_mask_flat: Vec<i64> = Vec::with_capacity(batch_size * max_len);

            for enc in &encodings {
                let ids = enc.get_ids();
                let mask = enc.get_attention_mask();
                let seq_len = ids.len();

                input_ids_flat.extend(ids.iter().map(|&id| id as i64));
                attention_mask_flat.extend(mask.iter().map(|&m| m as i64));

                for _ in seq_len..max_len {
                    input_ids_flat.push(PAD_ID);
                    attention_mask_flat.push(0);
                }
            }

            let shape = [batch_size as i64, max_len as i64];
            let token_type_ids_flat = vec![0i64; batch_size * max_len];

            let input_ids_tensor = Tensor::from_array((shape, input_ids_flat))
                .context("Failed to create input_ids tensor")?;
            let attention_mask_tensor = Tensor::from_array((shape, attention_mask_flat))
                .context("Failed to create attention_mask tensor")?;
            let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids_flat))
                .context("Failed to create token_type_ids tensor")?;

            let logits_data = {
                let mut session = session
                    .lock()
                    .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;

                let outputs = session
                    .run(ort::inputs! {
                        "input_ids" => input_ids_tensor,
                        "attention_mask" => attention_mask_tensor,
                        "token_type_ids" => token_type_ids_tensor
                    })
                    .context("ONNX inference failed")?;

                // Output shape: [batch_size, 6], raw logits
                let (_out_shape, data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .context("Failed to extract output tensor")?;

                data.to_vec()
            };

            if logits_data.len() < batch_size * LABEL_ORDER.len() {
                anyhow::bail!(
                    "Model returned {} logits, expected {}",
                    logits_data.len(),
                    batch_size * LABEL_ORDER.len()
                );
            }

            let results = logits_data
                .chunks(LABEL_ORDER.len())
                .take(batch_size)
                .map(|row| {
                    let scores: Vec<f64> = row.iter().map(|&logit| sigmoid(logit as f64)).collect();
                    map_scores_to_labels(&scores)
                })
                .collect();

            Ok(results)
        })
        .await
        .context("spawn_blocking panicked")?
    }
}

#[async_trait]
impl SignalProvider for OnnxToxicityClassifier {
    fn name(&self) -> &'static str {
        "toxic-bert"
    }

    async fn classify(&self, text: &str) -> Result<Signal, ProviderError> {
        let mut labels = self
            .infer_batch(&[text.to_string()])
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{e:#}")))?;

        let labels = labels
            .pop()
            .ok_or_else(|| ProviderError::Malformed("empty model output".to_string()))?;

        debug!(
            toxic = labels.toxic,
            severe_toxic = labels.severe_toxic,
            threat = labels.threat,
            "ONNX scored text"
        );

        Ok(labels.to_signal())
    }
}

/// Sigmoid activation: maps any real number to (0, 1).
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Map the 6 model output scores (in LABEL_ORDER) to named labels.
fn map_scores_to_labels(scores: &[f64]) -> ToxicLabels {
    ToxicLabels {
        toxic: scores[0],
        severe_toxic: scores[1],
        obscene: scores[2],
        threat: scores[3],
        insult: scores[4],
        identity_hate: scores[5],
    }
}

/// Truncate inside the tokenizer so long inputs still end with [SEP].
fn configure_truncation(tokenizer: &mut Tokenizer) -> Result<()> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQ_LEN,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const BERT_LIKE_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": {
            "type": "BertProcessing",
            "sep": ["[SEP]", 102],
            "cls": ["[CLS]", 101]
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "word": 1, "[CLS]": 101, "[SEP]": 102 },
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn test_long_input_keeps_sep_after_truncation() {
        let mut tokenizer = Tokenizer::from_str(BERT_LIKE_TOKENIZER).unwrap();
        configure_truncation(&mut tokenizer).unwrap();

        let long = vec!["word"; 2000].join(" ");
        let enc = tokenizer.encode(long.as_str(), true).unwrap();
        let ids = enc.get_ids();

        assert_eq!(ids.len(), MAX_SEQ_LEN);
        assert_eq!(ids[0], 101);
        assert_eq!(ids[MAX_SEQ_LEN - 1], 102);
        assert_eq!(enc.get_attention_mask().len(), MAX_SEQ_LEN);
    }

    #[test]
    fn test_short_input_is_untouched_by_truncation() {
        let mut tokenizer = Tokenizer::from_str(BERT_LIKE_TOKENIZER).unwrap();
        configure_truncation(&mut tokenizer).unwrap();

        let enc = tokenizer.encode("word word", true).unwrap();
        assert_eq!(enc.get_ids(), &[101, 1, 1, 102]);
    }

    #[test]
    fn test_sigmoid_zero() {
        let result = sigmoid(0.0);
        assert!((result - 0.5).abs() < 1e-10, "sigmoid(0) should be 0.5");
    }

    #[test]
    fn test_sigmoid_symmetry() {
        for x in [0.5, 1.0, 2.0, 5.0] {
            let sum = sigmoid(x) + sigmoid(-x);
            assert!((sum - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_map_scores_to_labels() {
        // toxic, severe_toxic, obscene, threat, insult, identity_hate
        let scores = vec![0.9, 0.1, 0.8, 0.3, 0.7, 0.05];
        let labels = map_scores_to_labels(&scores);

        assert!((labels.toxic - 0.9).abs() < 1e-10);
        assert!((labels.severe_toxic - 0.1).abs() < 1e-10);
        assert!((labels.obscene - 0.8).abs() < 1e-10);
        assert!((labels.threat - 0.3).abs() < 1e-10);
        assert!((labels.insult - 0.7).abs() < 1e-10);
        assert!((labels.identity_hate - 0.05).abs() < 1e-10);
    }

    #[test]
    fn test_load_fails_without_model_files() {
        let dir = std::env::temp_dir().join("harmguard-onnx-missing");
        let err = OnnxToxicityClassifier::load(&dir).err().unwrap();
        assert!(err.to_string().contains("download-model"));
    }
}
