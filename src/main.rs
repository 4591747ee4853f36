use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::info;

use harmguard::config::{Config, ScorerBackend};
use harmguard::db::Database;
use harmguard::email::transport::{MailTransport, SmtpRelayTransport};
use harmguard::relay::{HttpBoundary, RelayPipeline, RelaySettings, SessionSettings};
use harmguard::scoring::fusion::{standalone_verdict, FusionEngine, FusionSettings};
use harmguard::sentiment::{SentimentAnalyzer, VaderSentiment};
use harmguard::toxicity::keywords::KeywordClassifier;
use harmguard::toxicity::traits::SignalProvider;

/// harmguard: harmful-content scoring and a moderating SMTP relay.
///
/// Scores text across six harm categories, maps the result to a threat
/// level, and blocks Medium and High content. Runs as an HTTP API or as an
/// SMTP relay in front of your outbound mail.
#[derive(Parser)]
#[command(name = "harmguard", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Download the ONNX toxic-bert model (~420 MB)
    DownloadModel,

    /// Analyze a piece of text and print the verdict
    Analyze {
        /// The text to analyze
        text: String,

        /// Always consult the LLM categorizer, not just on escalation
        #[arg(long)]
        force_llm: bool,

        /// Use only the keyword classifier (no model or API needed)
        #[arg(long, conflicts_with = "force_llm")]
        keywords: bool,
    },

    /// Run the HTTP analysis API
    #[cfg(feature = "web")]
    Serve {
        /// Port for the HTTP API (default: 8000)
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Also run the SMTP relay in this process
        #[arg(long)]
        relay: bool,

        /// Port for the in-process SMTP relay (default: 1025)
        #[arg(long, default_value = "1025")]
        relay_port: u16,
    },

    /// Run the SMTP filtering relay against a running analysis API
    Relay {
        /// Port to accept SMTP on (default: 1025)
        #[arg(long, default_value = "1025")]
        port: u16,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
    },

    /// Show system status (DB stats, classifier setup, recent activity)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("harmguard=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing harmguard database...");
            let config = Config::load()?;
            let db = harmguard::db::connect(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nharmguard is ready. Next step: set up your .env file");
            println!("  (see .env.example for the available variables)");
            println!("\nThen run: cargo run -- download-model");
        }

        Commands::DownloadModel => {
            let config = Config::load()?;
            let model_dir = &config.model_dir;

            println!("Downloading ONNX model...");
            println!("  Destination: {}", model_dir.display());

            harmguard::toxicity::download::download_model(model_dir, &config.model_url).await?;

            println!("\n{}", "Model downloaded successfully.".bold());
            println!("You can now run `harmguard analyze \"some text\"` or `harmguard serve`.");
        }

        Commands::Analyze {
            text,
            force_llm,
            keywords,
        } => {
            let sentiment = VaderSentiment.polarity_scores(&text);

            let verdict = if keywords {
                let classifier = KeywordClassifier::new();
                standalone_verdict(&classifier.score(&text))
            } else {
                let config = Config::load()?;
                let engine = build_engine(&config)?;
                if force_llm && !engine.has_secondary() {
                    println!(
                        "{}",
                        "OPENAI_API_KEY not set; --force-llm has no effect.".yellow()
                    );
                }
                engine.analyze(&text, force_llm).await
            };

            harmguard::output::terminal::display_verdict(&text, &verdict, Some(&sentiment));
        }

        #[cfg(feature = "web")]
        Commands::Serve {
            port,
            bind,
            relay,
            relay_port,
        } => {
            let config = Config::load()?;
            let db = harmguard::db::connect(&config.db_path)?;
            let engine = build_engine(&config)?;
            let transport = create_transport(&config)?;

            let state = harmguard::web::AppState {
                engine: Arc::clone(&engine),
                keywords: Arc::new(KeywordClassifier::new()),
                sentiment: Arc::new(VaderSentiment),
                db: Arc::clone(&db),
                transport: transport.clone(),
                default_sender: Some(config.gmail_email.clone()).filter(|s| !s.is_empty()),
                forward_timeout: config.forward_timeout,
            };

            if relay {
                config.require_smtp()?;
                let Some(transport) = transport else {
                    anyhow::bail!("SMTP transport unavailable; check GMAIL_EMAIL and GMAIL_APP_PASSWORD");
                };
                let boundary = Arc::new(harmguard::relay::LocalBoundary::new(engine, db));
                let pipeline = Arc::new(RelayPipeline::new(
                    boundary,
                    transport,
                    relay_settings(&config),
                ));

                tokio::try_join!(
                    harmguard::web::run_server(state, port, &bind),
                    harmguard::relay::run_relay(
                        pipeline,
                        SessionSettings::default(),
                        &bind,
                        relay_port
                    ),
                )?;
            } else {
                harmguard::web::run_server(state, port, &bind).await?;
            }
        }

        Commands::Relay { port, bind } => {
            let config = Config::load()?;
            config.require_smtp()?;

            let boundary = Arc::new(HttpBoundary::new(
                &config.analysis_url,
                config.analyze_timeout,
            )?);
            let transport = create_transport(&config)?.ok_or_else(|| {
                anyhow::anyhow!("SMTP transport unavailable; check GMAIL_EMAIL and GMAIL_APP_PASSWORD")
            })?;
            let pipeline = Arc::new(RelayPipeline::new(
                boundary,
                transport,
                relay_settings(&config),
            ));

            info!(analysis_url = %config.analysis_url, "Relay will screen mail through the analysis API");
            harmguard::relay::run_relay(pipeline, SessionSettings::default(), &bind, port).await?;
        }

        Commands::Status => {
            let config = Config::load()?;
            let conn = harmguard::db::open(&config.db_path)?;
            let db: Arc<dyn Database> = Arc::new(harmguard::db::SqliteDatabase::new(conn));
            harmguard::status::show(&db, &config).await?;
        }
    }

    Ok(())
}

/// Create the general classifier based on the configured backend.
fn create_general_provider(config: &Config) -> Result<Arc<dyn SignalProvider>> {
    match config.scorer_backend {
        ScorerBackend::Onnx => {
            info!("Using local ONNX toxicity classifier");
            let classifier =
                harmguard::toxicity::onnx::OnnxToxicityClassifier::load(&config.model_dir)?;
            Ok(Arc::new(classifier))
        }
        ScorerBackend::Perspective => {
            info!("Using Perspective API toxicity classifier");
            let classifier = harmguard::toxicity::perspective::PerspectiveClassifier::new(
                config.perspective_api_key.clone(),
            );
            Ok(Arc::new(classifier))
        }
    }
}

/// Create the LLM categorizer, if an API key is configured.
fn create_secondary_provider(config: &Config) -> Option<Arc<dyn SignalProvider>> {
    if !config.has_openai() {
        info!("OPENAI_API_KEY not set; analysis will use the general classifier only");
        return None;
    }
    info!(model = %config.openai_model, "Using OpenAI categorizer for escalation");
    Some(Arc::new(harmguard::toxicity::openai::OpenAiClassifier::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.openai_model.clone(),
        config.openai_requests_per_minute,
    )))
}

/// Build the fusion engine from configuration.
fn build_engine(config: &Config) -> Result<Arc<FusionEngine>> {
    config.require_scorer()?;
    let settings = FusionSettings {
        provider_timeout: config.provider_timeout,
        ..FusionSettings::default()
    };
    Ok(Arc::new(FusionEngine::new(
        create_general_provider(config)?,
        create_secondary_provider(config),
        settings,
    )))
}

/// Outbound SMTP transport, or None when credentials aren't configured.
fn create_transport(config: &Config) -> Result<Option<Arc<dyn MailTransport>>> {
    if !config.has_smtp_credentials() {
        return Ok(None);
    }
    let transport = SmtpRelayTransport::new(
        &config.smtp_host,
        config.smtp_port,
        &config.gmail_email,
        &config.gmail_app_password,
        config.forward_timeout,
    )?;
    Ok(Some(Arc::new(transport)))
}

fn relay_settings(config: &Config) -> RelaySettings {
    RelaySettings {
        analyze_timeout: config.analyze_timeout,
        forward_timeout: config.forward_timeout,
        ..RelaySettings::default()
    }
}
