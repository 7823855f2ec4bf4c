//! CLI entry point. Thin by design: argument parsing, home-directory
//! scaffolding, signal handling, and wiring into [`oracle_engine::run`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use oracle_engine::keyring::LocalKeyring;
use oracle_engine::logging::{self, LogFormat};
use oracle_engine::settings::{home_dir_exists, CommandLineOptions, Command, Settings};

fn resolve_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(raw.trim_start_matches("~/").trim_start_matches('~'))
    } else {
        PathBuf::from(raw)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(LogFormat::Pretty);

    let options = CommandLineOptions::parse();
    let home = resolve_home(&options.home);

    match options.command {
        Command::Init => init(&home),
        Command::Start => start(&home).await,
    }
}

fn init(home: &std::path::Path) -> anyhow::Result<()> {
    let config_dir = home.join(oracle_engine::constants::CONFIG_SUBDIR);
    std::fs::create_dir_all(&config_dir)?;
    let config_path = config_dir.join(oracle_engine::constants::CONFIG_FILE_NAME);
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;
    }
    let keyring_settings = oracle_engine::settings::KeyringSettings {
        backend: "test".to_string(),
        name: "oracle".to_string(),
        passphrase: None,
    };
    oracle_engine::keyring::generate_if_missing(home, &keyring_settings)?;
    tracing::info!(home = %home.display(), "initialized home directory");
    Ok(())
}

async fn start(home: &std::path::Path) -> anyhow::Result<()> {
    if !home_dir_exists(home) {
        tracing::error!(home = %home.display(), "home directory not initialized, run `oracled init` first");
        std::process::exit(1);
    }

    let settings = Settings::new(home)?;
    let keyring = Arc::new(LocalKeyring::load(home, &settings.keyring)?);
    let provider_factory = oracle_engine::default_provider_factory();

    let shutdown = tokio_util::sync::CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!(signal = "SIGINT", "shutdown signal received"),
                _ = terminate.recv() => tracing::info!(signal = "SIGTERM", "shutdown signal received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!(signal = "ctrl-c", "shutdown signal received");
        }
        signal_shutdown.cancel();
    });

    oracle_engine::run(settings, keyring, provider_factory, shutdown).await
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"[chain]
chain_id = "localchain-1"
endpoint = "http://127.0.0.1:26657"

[keyring]
backend = "test"
name = "oracle"

[gas]
limit = 200000
adjustment = 1.2
denom = "uatom"

[health_check]
hostname = "0.0.0.0"
port = 5757
"#;
