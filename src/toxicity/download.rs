// Model download helper for the local toxicity classifier.
//
// Downloads the toxic-bert ONNX export and its tokenizer from HuggingFace.
// Files are stored in a platform-appropriate directory
// (~/.local/share/harmguard/models/ on Linux) so they persist across runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Default HuggingFace location of the ONNX export. Override with
/// HARMGUARD_MODEL_URL when mirroring.
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/unitary/toxic-bert/resolve/main";

/// Remote path of the ONNX graph within the model repo.
const REMOTE_MODEL_FILE: &str = "onnx/model.onnx";

/// Local file names inside the model directory.
pub const TOXICITY_MODEL_FILE: &str = "model.onnx";
pub const TOXICITY_TOKENIZER_FILE: &str = "tokenizer.json";

/// Returns the default directory for storing model files.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harmguard")
        .join("models")
}

/// Check whether both required model files exist.
pub fn model_files_present(dir: &Path) -> bool {
    dir.join(TOXICITY_MODEL_FILE).exists() && dir.join(TOXICITY_TOKENIZER_FILE).exists()
}

/// Download the toxic-bert model and tokenizer into `dir`.
///
/// Skips files that already exist.
pub async fn download_model(dir: &Path, base_url: &str) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

    println!("\nToxicity model (toxic-bert):");

    let tokenizer_path = dir.join(TOXICITY_TOKENIZER_FILE);
    if tokenizer_path.exists() {
        info!("Tokenizer already exists, skipping");
        println!("  {} (already exists)", TOXICITY_TOKENIZER_FILE);
    } else {
        println!("  Downloading {}...", TOXICITY_TOKENIZER_FILE);
        download_file(
            &format!("{}/{}", base_url, TOXICITY_TOKENIZER_FILE),
            &tokenizer_path,
            false,
        )
        .await?;
    }

    let model_path = dir.join(TOXICITY_MODEL_FILE);
    if model_path.exists() {
        info!("Model already exists, skipping");
        println!("  {} (already exists)", TOXICITY_MODEL_FILE);
    } else {
        println!("  Downloading {} (~420 MB)...", TOXICITY_MODEL_FILE);
        download_file(
            &format!("{}/{}", base_url, REMOTE_MODEL_FILE),
            &model_path,
            true,
        )
        .await?;
    }

    Ok(())
}

/// Download a single file from a URL to a local path.
/// If `show_progress` is true, display a progress bar.
async fn download_file(url: &str, dest: &Path, show_progress: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let pb = if show_progress {
        Some(progress_bar(response.content_length())?)
    } else {
        None
    };

    // Write to a sibling temp file so an interrupted download never leaves a
    // truncated model behind that model_files_present() would accept.
    let partial = dest.with_extension("part");
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .context("Failed to read response body")?
    {
        bytes.extend_from_slice(&chunk);
        if let Some(ref pb) = pb {
            pb.set_position(bytes.len() as u64);
        }
    }

    std::fs::write(&partial, &bytes)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    std::fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move download into {}", dest.display()))?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    info!("Downloaded {} to {}", url, dest.display());
    Ok(())
}

fn progress_bar(total_size: Option<u64>) -> Result<ProgressBar> {
    let pb = match total_size {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("    [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("=> "),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("    {spinner} {bytes}")?);
            pb
        }
    };
    Ok(pb)
}
