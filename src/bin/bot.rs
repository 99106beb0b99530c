//! Bot binary.
//!
//! Usage:
//! - `nudge-bot [CONFIG]` runs the bot. Without `CONFIG` the default config
//!   file is used when present, otherwise built-in defaults.
//! - `nudge-bot init [CONFIG]` writes a default config file (logging to the
//!   data directory) and exits.
//!
//! `NUDGE_*` environment variables override file values. Diagnostics go to
//! stderr (and to daily log files when `logging.log_dir` is set).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use nudge::config::BotConfig;
use nudge::dispatch::DiscordDispatcher;
use nudge::gateway::DiscordGateway;
use nudge::{BotContext, BotRuntime, PermissionStore};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let first = args.next();

    if first.as_deref() == Some("init") {
        let path = args
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(BotConfig::default_config_path);
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        let mut config = BotConfig::default();
        config.logging.log_dir = Some(nudge::app_dirs::logs_dir());
        config.save_to_file(&path)?;
        eprintln!("wrote {}", path.display());
        return Ok(());
    }

    let config = load_config(first.map(PathBuf::from))?;
    let _log_guard = nudge::logging::init_tracing(&config.logging)?;

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{problem}");
        }
        anyhow::bail!("configuration has {} blocking problem(s)", problems.len());
    }

    let db_path = config.store.resolved_path();
    let store = Arc::new(
        PermissionStore::open(&db_path)
            .with_context(|| format!("opening roster database {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), "roster database opened");

    let shutdown = CancellationToken::new();
    let dispatcher = Arc::new(
        DiscordDispatcher::new(&config.discord, &config.rate_limit)
            .with_shutdown(shutdown.clone()),
    );
    let ctx = BotContext::new(store, dispatcher);
    let gateway = Arc::new(DiscordGateway::new(&config.discord));

    let runtime = BotRuntime::start(ctx, &config, gateway);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");
    shutdown.cancel();
    runtime.shutdown().await;

    tracing::info!("nudge-bot shut down cleanly");
    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<BotConfig> {
    let mut config = match explicit {
        Some(path) => BotConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let path = BotConfig::default_config_path();
            if path.exists() {
                BotConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?
            } else {
                BotConfig::default()
            }
        }
    };
    config.apply_env_overrides()?;
    Ok(config)
}
