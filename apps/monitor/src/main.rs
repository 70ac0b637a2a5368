mod config;

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    selectors::{format_uptime, match_rate, transcription_stats},
    AppState, CueSession, RestClient,
};
use shared::{domain::CueId, protocol::ControlCommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Follows a cue control server and logs what it does")]
struct Args {
    /// Overrides the server url from config and environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long, default_value = "monitor.toml")]
    config: PathBuf,
    /// One of start, stop, next, previous, repeat.
    #[arg(long)]
    control: Option<ControlCommand>,
    #[arg(long)]
    play: Option<i64>,
    /// Print one summary and exit instead of following push events.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config)?;
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }

    let session = CueSession::start(settings.session_config())
        .with_context(|| format!("failed to start session against {}", settings.server_url))?;

    if let Err(err) = session.refresh().await {
        warn!(error = %err, "monitor: initial sync incomplete");
    }
    if let Some(command) = args.control {
        match session.rest().control(command).await {
            Ok(_) => info!(%command, "monitor: control command sent"),
            Err(err) => warn!(%command, error = %err, "monitor: control command failed"),
        }
    }
    if let Some(id) = args.play {
        if let Err(err) = session.rest().play_cue(CueId(id)).await {
            warn!(cue_id = id, error = %err, "monitor: play request failed");
        }
    }

    print_summary(&session.store().snapshot());
    if args.once {
        session.shutdown().await;
        return Ok(());
    }

    let last_seen = Arc::new(AtomicU64::new(0));
    let messages = session.store().subscribe(move |state| {
        let seen = last_seen.load(Ordering::SeqCst);
        for message in state.messages.iter().rev().filter(|m| m.id.0 > seen) {
            println!(
                "[{}] {:<13} {}",
                message.timestamp.format("%H:%M:%S"),
                message.kind,
                message.text
            );
        }
        if let Some(newest) = state.messages.first() {
            last_seen.fetch_max(newest.id.0, Ordering::SeqCst);
        }
    });
    let resync = tokio::spawn(resync_on_reconnect(
        session.rest().clone(),
        session.connectivity(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("monitor: shutting down");

    resync.abort();
    drop(messages);
    let summary = session.store().snapshot();
    session.shutdown().await;
    print_summary(&summary);
    Ok(())
}

/// Pushes missed while disconnected are gone, so every reconnect re-pulls state.
async fn resync_on_reconnect(rest: RestClient, mut connectivity: tokio::sync::watch::Receiver<bool>) {
    let mut was_connected = *connectivity.borrow_and_update();
    while connectivity.changed().await.is_ok() {
        let connected = *connectivity.borrow_and_update();
        if connected && !was_connected {
            info!("monitor: reconnected, resyncing");
            if let Err(err) = rest.sync_all().await {
                warn!(error = %err, "monitor: resync incomplete");
            }
        }
        was_connected = connected;
    }
}

fn print_summary(state: &AppState) {
    let status = &state.status;
    let transcriptions = transcription_stats(&state.transcriptions);
    println!(
        "server {} | system {} | recording {} | uptime {}",
        if state.connected { "connected" } else { "offline" },
        if status.is_system_running { "running" } else { "stopped" },
        if status.is_recording { "on" } else { "off" },
        format_uptime(status.uptime_seconds),
    );
    println!(
        "detections {} | matches {} | match rate {}",
        status.stats.total_detections,
        status.stats.successful_matches,
        match_rate(status).map_or_else(|| "n/a".to_string(), |rate| format!("{rate}%")),
    );
    println!(
        "cues {} | transcriptions {} ({} matched, {}%) | playing {}",
        state.cues.len(),
        transcriptions.total,
        transcriptions.matched,
        transcriptions.percentage,
        state.currently_playing.as_deref().unwrap_or("-"),
    );
    if let Some(error) = &state.error {
        println!("last error: {error}");
    }
}
