//! chat-relay binary - composition root.
//!
//! Ties the relay crates together into a single executable:
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the SQLite database
//! 4. Build the model gateway
//! 5. Start the axum HTTP server

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use relay_api::state::AppState;
use relay_core::config::RelayConfig;
use relay_gateway::AnthropicClient;
use relay_storage::Database;

use cli::CliArgs;

/// Expand a leading `~` to the user's home directory.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing starts so the file can set the log level.
    let config_path = args.resolve_config_path();
    let loaded = config_path
        .exists()
        .then(|| RelayConfig::load(&config_path));
    let mut config = match loaded {
        Some(Ok(ref c)) => c.clone(),
        _ => RelayConfig::default(),
    };
    args.apply_to(&mut config);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_path.display(), "Configuration loaded"),
        Some(Err(e)) => tracing::warn!(
            path = %config_path.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
        None => tracing::info!(path = %config_path.display(), "No config file, using defaults"),
    }

    let data_dir = resolve_data_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let database = Database::new(&data_dir.join("relay.db"))?;

    let api_key = match std::env::var(&config.model.api_key_env) {
        Ok(key) => key,
        Err(_) => {
            tracing::warn!(
                env = %config.model.api_key_env,
                "Model API key not set; every exchange will be rejected upstream"
            );
            String::new()
        }
    };
    let gateway = AnthropicClient::from_config(&config.model, api_key)?;
    tracing::info!(
        model = %config.model.model,
        base_url = %config.model.base_url,
        timeout_secs = config.model.timeout_secs,
        max_retries = config.model.max_retries,
        "Model gateway ready"
    );

    let state = AppState::new(config.clone(), database, Arc::new(gateway));
    relay_api::start_server(&config, state).await?;

    Ok(())
}
