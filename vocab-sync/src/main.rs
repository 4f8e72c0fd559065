//! vocab-sync - Vocabulary sync and enrichment service
//!
//! Serves the sync protocol for the reader apps, word capture for the browser
//! extension, and the enrichment queue that fills the canonical dictionary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vocab_common::config::{
    default_config_path, load_toml_config_or_default, RootFolderInitializer, RootFolderResolver,
};

use vocab_sync::config::ServiceConfig;
use vocab_sync::services::{
    EnrichmentPipeline, EnrichmentTrigger, EnrichmentWorker, OpenAiEnricher, SemanticEnricher, TranslationChain,
};
use vocab_sync::AppState;

const MODULE_NAME: &str = "vocab-sync";

/// Command-line arguments for vocab-sync
#[derive(Parser, Debug)]
#[command(name = "vocab-sync")]
#[command(about = "Vocabulary sync and enrichment service")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "VOCAB_SYNC_BIND")]
    bind: Option<String>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let toml_config = load_toml_config_or_default(config_path.as_deref());

    // RUST_LOG wins over the TOML level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("vocab_sync={level},vocab_common={level},tower_http=info", level = toml_config.logging.level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vocab-sync");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = ServiceConfig::resolve(args.bind.as_deref(), &toml_config)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Step 1: Resolve root folder
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_value(toml_config.root_folder.clone())
        .resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = vocab_sync::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    // Step 4: Providers
    let translator = TranslationChain::from_keys(
        config.deepl_api_key.as_deref(),
        config.google_translate_api_key.as_deref(),
        config.provider_timeout,
    )
    .context("Failed to build translation providers")?;
    if translator.is_empty() {
        warn!("No translation provider configured; translations fall back to the word itself");
    }

    let enricher: Option<Arc<dyn SemanticEnricher>> = match config.openai_api_key.as_deref() {
        Some(key) => Some(Arc::new(
            OpenAiEnricher::new(key, Some(&config.openai_model), config.provider_timeout)
                .context("Failed to build OpenAI client")?,
        )),
        None => {
            warn!("OpenAI API key not configured; new words will stay un-enriched");
            None
        }
    };

    let pipeline = EnrichmentPipeline::new(db_pool.clone(), translator, enricher);

    // Step 5: Background enrichment
    let trigger = EnrichmentTrigger::spawn(EnrichmentWorker::new(db_pool.clone(), pipeline.clone()));

    let bind = config.bind;
    let state = AppState::new(db_pool, config, pipeline, trigger);
    let app = vocab_sync::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
