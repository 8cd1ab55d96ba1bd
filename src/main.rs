use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use slot_relay::channels::{MessagingClient, TelegramClient};
use slot_relay::config::{self, RelayConfig, Secrets};
use slot_relay::health;
use slot_relay::logging;
use slot_relay::pipeline::Relay;

#[derive(Parser)]
#[command(
    name = "slot-relay",
    version,
    about = "Relays appointment-slot announcements from a Telegram group to a private channel"
)]
struct Cli {
    /// Run a single fetch cycle and exit
    #[arg(long)]
    once: bool,

    /// Load environment variables from this file first
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Also write daily-rotated JSON logs to this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn load_config() -> slot_relay::error::Result<(RelayConfig, Secrets)> {
    Ok((RelayConfig::from_env()?, Secrets::from_env()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => config::load_env_file(path)?,
        None => {
            config::load_env_file_if_present(Path::new(".env"))?;
        }
    }

    let _log_guard = logging::init(cli.log_dir.as_deref())?;

    let (relay_config, secrets) = load_config()?;

    eprintln!("📡 Slot Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Source group: {}", relay_config.source_group);
    eprintln!("   State file: {}", relay_config.state_file_path.display());
    eprintln!(
        "   Polling every {}s, heartbeat every {}h",
        relay_config.message_fetch_interval.as_secs(),
        relay_config.heartbeat_interval_hours
    );
    if !cli.once {
        eprintln!(
            "   Health: http://0.0.0.0:{}/health",
            relay_config.health_port
        );
    }
    eprintln!();

    // ── Messaging platform ───────────────────────────────────────────────
    let client: Arc<dyn MessagingClient> = Arc::new(TelegramClient::new(secrets.bot_token));
    let group = client
        .resolve_group(&relay_config.source_group)
        .await
        .context("failed to resolve source group")?;
    info!(group = %group.title, chat_id = group.id, "Source group resolved");

    // ── Shutdown signal ──────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = signal_tx.send(true);
        }
    });

    let mut relay = Relay::open(
        &relay_config,
        Arc::clone(&client),
        group,
        secrets.broadcast_chat_id,
    )
    .await
    .context("failed to load relay state")?;

    if cli.once {
        let mut shutdown = shutdown_rx;
        let report = relay.run_cycle(&mut shutdown).await;
        client.shutdown().await;
        let report = report.context("relay cycle failed")?;
        info!(
            fetched = report.fetched,
            forwarded = report.forwarded,
            suppressed = report.suppressed,
            watermark = report.watermark.get(),
            "Single cycle complete"
        );
        return Ok(());
    }

    // ── Health endpoint ──────────────────────────────────────────────────
    let health_port = relay_config.health_port;
    let health_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health_rx).await {
            error!(port = health_port, error = %e, "Health server failed");
        }
    });

    let result = relay.run(shutdown_rx).await;

    // Stop the health server with the relay.
    if shutdown_tx.send(true).is_err() {
        warn!("Health server already gone");
    }

    result.context("relay stopped on state error")?;
    info!("Shut down cleanly");
    Ok(())
}
