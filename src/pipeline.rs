//! Capture pipeline wiring
//!
//! Portal negotiation, then PipeWire capture feeding the JPEG encoder, which
//! publishes into the shared [`FrameBroadcastBuffer`]. Runs beside the HTTP
//! server; an error here leaves the server up with no frames to show.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::portal::{BrokerTransport, CaptureSource, DbusTransport, PermissionSession};
use crate::video::{EncodingPublisher, FrameBroadcastBuffer, FrameEncoder};

/// Negotiate, capture and publish until `shutdown` fires
pub async fn run_capture_pipeline(
    config: Arc<Config>,
    buffer: Arc<FrameBroadcastBuffer>,
    shutdown: CancellationToken,
) -> Result<()> {
    // Encoder settings are checked before the user sees a permission dialog
    let encoder_config = config.encoder_config()?;
    let encoder = FrameEncoder::new(encoder_config).context("Failed to create JPEG encoder")?;
    info!(
        "JPEG encoder ready: quality {}, chroma {}",
        encoder_config.quality, encoder_config.subsampling
    );

    let transport = DbusTransport::connect()
        .await
        .context("Failed to connect to the portal on the D-Bus session bus")?;
    let mut session = PermissionSession::new(transport, config.negotiation_config());

    let negotiated = tokio::select! {
        _ = shutdown.cancelled() => None,
        result = session.negotiate() => Some(result),
    };

    let source = match negotiated {
        None => {
            info!("Shutdown requested during portal negotiation");
            close_session(&mut session).await;
            return Ok(());
        }
        Some(Err(e)) => {
            close_session(&mut session).await;
            return Err(e).context("Screen capture negotiation failed");
        }
        Some(Ok(source)) => source,
    };

    match source.stream.size {
        Some((width, height)) => info!("Capturing PipeWire node {} ({}x{})", source.node_id, width, height),
        None => info!("Capturing PipeWire node {}", source.node_id),
    }

    let publisher = EncodingPublisher::new(encoder, buffer);
    let result = capture_until_shutdown(source, publisher, &shutdown).await;

    close_session(&mut session).await;
    result
}

#[cfg(feature = "capture")]
async fn capture_until_shutdown(
    source: CaptureSource,
    publisher: EncodingPublisher,
    shutdown: &CancellationToken,
) -> Result<()> {
    use crate::capture::CaptureFeed;

    let mut feed = tokio::task::spawn_blocking(move || CaptureFeed::start(source, publisher))
        .await
        .context("PipeWire capture start task failed")?
        .context("Failed to start PipeWire capture")?;

    shutdown.cancelled().await;
    info!("Stopping PipeWire capture for node {}", feed.node_id());

    tokio::task::spawn_blocking(move || feed.stop())
        .await
        .context("PipeWire capture stop task failed")?
        .context("Failed to stop PipeWire capture")?;
    Ok(())
}

#[cfg(not(feature = "capture"))]
async fn capture_until_shutdown(
    source: CaptureSource,
    _publisher: EncodingPublisher,
    shutdown: &CancellationToken,
) -> Result<()> {
    tracing::warn!(
        "Built without the capture feature; node {} is granted but not streamed",
        source.node_id
    );
    shutdown.cancelled().await;
    Ok(())
}

async fn close_session<T: BrokerTransport>(session: &mut PermissionSession<T>) {
    if let Err(e) = session.close().await {
        debug!("Closing portal session failed: {}", e);
    }
}
