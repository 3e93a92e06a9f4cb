//! SIP Playback - Answering Service
//!
//! Waits for a caller's RTP stream and plays the voicemail greeting back to
//! it, until the caller goes away or the process is interrupted.

mod sip;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use sip::{run_call, AppConfig, FileAssets, PlaybackEngine, UdpMediaSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = AppConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let session = UdpMediaSession::bind(config.listen_addr, config.remote_addr, config.media_timeout)
        .await
        .context("Failed to set up media session")?;
    let control = session.control();

    let call_id = Uuid::new_v4();
    let span = tracing::info_span!("call", %call_id);

    tracing::info!(
        parent: &span,
        "Waiting for caller media on {} ({} assets from {})",
        session.local_addr()?,
        config.assets.len(),
        config.asset_dir.display()
    );

    let engine = PlaybackEngine::new(config.playback.clone(), CancellationToken::new())
        .with_span(span.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let summary = run_call(
        session,
        &control,
        Arc::new(FileAssets::new(&config.asset_dir)),
        config.assets.clone(),
        engine,
        config.hangup_timeout,
        shutdown,
    )
    .instrument(span)
    .await?;

    tracing::info!("Call finished: {:?}", summary.outcome);
    if let Some(report) = summary.playback {
        tracing::info!(
            "Played {} assets in {} packets ({} skipped)",
            report.assets_played,
            report.packets_sent,
            report.assets_skipped.len()
        );
    }

    Ok(())
}

/// Log filter comes from LOG_LEVEL, then RUST_LOG, defaulting to info
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
