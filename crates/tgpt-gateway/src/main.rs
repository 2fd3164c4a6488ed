//! tgpt: Telegram chat bridge to OpenAI-compatible models
//!
//! Usage:
//!   tgpt                    - Start the bot
//!   tgpt --config <path>    - Start with a specific TOML config file
//!   tgpt --help             - Show help

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tgpt_core::{
    Config, FsStorage, OpenAiClient, SessionDeps, SessionProvider, SqliteStorage, Storage,
    StorageBackend, SystemClock,
};
use tgpt_telegram::{BotSettings, BotState, TelegramBot};
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq)]
enum RunMode {
    /// Run the bot, optionally with an explicit config file
    Run(Option<PathBuf>),
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_args(std::env::args().skip(1))?;

    let config_path = match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("tgpt {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Run(path) => path,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    run(config).await
}

/// Parse command line arguments
fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<RunMode> {
    let mut args = args.into_iter();
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(RunMode::Run(config_path))
}

/// Print help message
fn print_help() {
    println!("tgpt - Telegram chat bridge to OpenAI-compatible models");
    println!();
    println!("Usage:");
    println!("  tgpt                    Start the bot");
    println!("  tgpt --config <path>    Read settings from a TOML file (default: tgpt.toml)");
    println!("  tgpt --help             Show this help message");
    println!("  tgpt --version          Show version");
    println!();
    println!("Environment Variables:");
    println!("  TGPT_TELEGRAM_BOT_TOKEN  Telegram bot token (required)");
    println!("  TGPT_OPENAI_API_KEY      OpenAI API key (required)");
    println!("  TGPT_OPENAI_BASE_URL     OpenAI-compatible endpoint");
    println!("  MODEL                    Model name (default: gpt-4)");
    println!("  TGPT_NAME                Bot name shown in the greeting");
    println!("  TGPT_ALLOWED_USERS       Comma-separated user IDs allowed to chat");
    println!("  TGPT_ADMIN_USERS         Comma-separated admin user IDs");
    println!("  TGPT_ADMIN_CONTACT       Contact shown to users");
    println!("  TGPT_LANGUAGE            en or ru (default: en)");
    println!("  TGPT_CURRENCY            Currency prefix for /stats (default: $)");
    println!("  TGPT_RATE                Exchange rate for /stats (default: 1)");
    println!("  TGPT_CACHE_TTL_SEC       Idle session lifetime (default: 3600)");
    println!("  TGPT_SWEEP_INTERVAL_SEC  Session sweep interval (default: TTL / 2)");
    println!("  TGPT_STORAGE             fs or sqlite (default: fs)");
    println!("  TGPT_DB_DIR              Directory for fs storage (default: .db)");
    println!("  TGPT_SQLITE_PATH         SQLite database file (default: .db/tgpt.sqlite)");
    println!("  TGPT_MAX_TOKENS, TGPT_TEMPERATURE, TGPT_TOP_P,");
    println!("  TGPT_PRESENCE_PENALTY, TGPT_FREQUENCY_PENALTY");
    println!("                           Generation parameters");
}

/// Wire everything together and run until a shutdown signal arrives
async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting tgpt...");
    tracing::info!("Model: {}", config.llm.model);

    let storage = open_storage(&config)?;
    let client = OpenAiClient::new(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?;
    let clock = Arc::new(SystemClock);

    let deps = SessionDeps {
        client: Arc::new(client),
        storage,
        prices: Arc::new(config.price_table()),
        clock: clock.clone(),
    };

    if deps.prices.get(&config.llm.model).is_none() {
        tracing::warn!(
            "No price configured for model '{}'; every exchange will fail",
            config.llm.model
        );
    }

    let provider = Arc::new(SessionProvider::new(
        deps,
        config.session.params,
        config.session.ttl(),
        config.session.sweep_interval(),
    ));
    let sweeper = provider.start_sweeper();
    tracing::info!(
        "Session cache: ttl {:?}, sweep every {:?}",
        config.session.ttl(),
        config.session.sweep_interval()
    );

    let settings = BotSettings::new(&config.telegram, config.llm.model.clone());
    let state = BotState::new(provider.clone(), settings, clock);
    let bot = TelegramBot::new(&config.telegram.token, state);

    tracing::info!("tgpt initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    let result = bot.start(shutdown_signal()).await;

    tracing::info!("Shutting down...");
    sweeper.stop().await;
    provider.clear();

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.storage.backend {
        StorageBackend::Fs => {
            tracing::info!("Using file storage in {}", config.storage.dir);
            Arc::new(FsStorage::new(&config.storage.dir))
        }
        StorageBackend::Sqlite => {
            tracing::info!("Using SQLite storage at {}", config.storage.sqlite_path);
            let storage = SqliteStorage::new(&config.storage.sqlite_path)
                .map_err(|e| anyhow::anyhow!("Failed to open SQLite storage: {}", e))?;
            Arc::new(storage)
        }
    };
    Ok(storage)
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
