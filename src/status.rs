// System status display: DB stats, classifier setup, recent activity.

use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, ScorerBackend};
use crate::db::Database;
use crate::output::terminal;
use crate::toxicity::download;

/// Display system status to the terminal.
pub async fn show(db: &Arc<dyn Database>, config: &Config) -> Result<()> {
    let db_path = config.db_path.as_str();

    // Database file size
    let file_size = std::fs::metadata(db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_path, file_size);

    match config.scorer_backend {
        ScorerBackend::Onnx => {
            let present = download::model_files_present(&config.model_dir);
            println!(
                "General classifier: toxic-bert (ONNX) in {} [{}]",
                config.model_dir.display(),
                if present { "ready" } else { "missing" }
            );
            if !present {
                println!("  Run `harmguard download-model` to fetch it");
            }
        }
        ScorerBackend::Perspective => {
            println!(
                "General classifier: Perspective API [{}]",
                if config.perspective_api_key.is_empty() {
                    "no API key"
                } else {
                    "configured"
                }
            );
        }
    }

    if config.has_openai() {
        println!("LLM categorizer: {} (escalation enabled)", config.openai_model);
    } else {
        println!("LLM categorizer: not configured (base-only analysis)");
    }

    if config.has_smtp_credentials() {
        println!(
            "Outbound mail: {}:{} as {}",
            config.smtp_host, config.smtp_port, config.gmail_email
        );
    } else {
        println!("Outbound mail: not configured (send-email and relay can't deliver)");
    }

    let stats = db.get_threat_stats().await?;
    println!(
        "Analyses stored: {} (high {}, medium {}, low {})",
        stats.total_analyzed,
        stats.by_threat_level.get("high").copied().unwrap_or(0),
        stats.by_threat_level.get("medium").copied().unwrap_or(0),
        stats.by_threat_level.get("low").copied().unwrap_or(0),
    );

    terminal::display_recent_analyses(&db.get_recent_analyses(5).await?);
    terminal::display_email_attempts(&db.get_recent_email_attempts(5).await?);

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
