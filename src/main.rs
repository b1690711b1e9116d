mod backend;
mod bot;
mod config;
mod dedup;
mod extract;
mod platform;
mod reaction;
mod retrieval;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::platform::slack::SlackClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stashbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Backend: {}", config.backend);
    info!("  Bind: {}", config.server.bind);
    info!("  Trigger emojis: {:?}", config.trigger_emojis());
    info!("  Dedup TTL: {:?}", config.reactions.dedup_ttl());
    info!(
        "  Signature verification: {}",
        if config.slack.signing_secret.is_some() { "on" } else { "off" }
    );

    let call_timeout = config.reactions.call_timeout();
    let backend = backend::from_config(&config.backend, call_timeout)?;
    let slack = Arc::new(SlackClient::new(config.slack.bot_token.clone(), call_timeout)?);

    // Create shared state
    let state = Arc::new(AppState::new(&config, backend, slack)?);

    info!("Bot is starting...");
    bot::run(state, &config.server.bind).await?;

    Ok(())
}
