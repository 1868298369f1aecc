//! MarkLink control station.
//!
//! Binds `0.0.0.0:<port>` (default 1060, `MARKLINK_PORT` overrides), prints
//! the provisioning JSON for the robot's QR scanner, then accepts one robot
//! at a time. Commands are read from stdin as `KEY_NAME 0|1` pairs, e.g.
//! `KEY_W 1` or `KEY_LEFT 1 KEY_UP 1`.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use marklink_core::StationEvent;
use marklink_station::{controller, detect_local_ip, relay, FrameStats, StationConfig, StationListener};
use marklink_transport::{ConnectionSupervisor, TcpAcceptor};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("MarkLink Station v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => {
            info!("MarkLink Station exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

async fn run() -> Result<()> {
    let config = StationConfig::from_env().context("Loading station config")?;

    // ── Provisioning payload for the QR code ───────────────────────────────
    let local_ip = detect_local_ip();
    let payload = config
        .provisioning(local_ip)
        .to_qr_payload()
        .context("Encoding provisioning payload")?;
    info!("Provisioning payload: {}", payload);

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let acceptor = TcpAcceptor::bind(bind_addr).await.context("Binding station port")?;
    info!("Robots should connect to {}:{}", local_ip, config.port);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    // ── Operator input ─────────────────────────────────────────────────────
    let bindings = config.bindings();
    let relay_task = tokio::spawn(async move {
        let mut source = controller::stdin_source();
        relay(&mut source, &bindings, &cmd_tx).await
    });

    // ── Event consumer ─────────────────────────────────────────────────────
    let consumer_task = tokio::spawn(consume_events(event_rx));

    // ── Link ───────────────────────────────────────────────────────────────
    let supervisor = ConnectionSupervisor::new(acceptor, config.link.clone());
    let mut listener = StationListener::new(config.link.clone(), event_tx, cmd_rx);

    {
        let link = supervisor.run(&mut listener, shutdown_rx);
        tokio::pin!(link);

        tokio::select! {
            _ = &mut link => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(true);
                link.await;
            }
        }
    }

    info!(
        "Reassembled {} frames, sent {} keepalives over {} sessions",
        listener.frames_reassembled(),
        listener.keepalives_sent(),
        supervisor.status().sessions
    );

    // Dropping the listener closes the event stream.
    drop(listener);
    relay_task.abort();
    consumer_task.await.context("Event consumer panicked")?;
    Ok(())
}

/// Log connection changes and, once a second, frame statistics.
async fn consume_events(mut events: mpsc::UnboundedReceiver<StationEvent>) {
    let mut stats = FrameStats::default();
    let mut report = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StationEvent::Connected { peer }) => info!("CONNECTED {}", peer),
                Some(StationEvent::Disconnected { reason }) => info!("DISCONNECTED ({})", reason),
                Some(StationEvent::Frame(frame)) => stats.record(frame.len(), Instant::now()),
                None => break,
            },
            _ = report.tick() => {
                if stats.frames > 0 {
                    let fps = stats.fps(Instant::now());
                    info!("frames={} bytes={} fps={:.1}", stats.frames, stats.bytes, fps);
                }
            }
        }
    }

    info!("Received {} frames ({} bytes) in total", stats.frames, stats.bytes);
}
