//! MarkLink remote endpoint.
//!
//! Reads the provisioning record (`{ssid, password, host, port}`) from the
//! file named by `MARKLINK_PROVISIONING`, or from stdin, joins the network,
//! then streams the synthetic camera to the station and logs every actuator
//! command it receives.
//!
//! Set `RUST_LOG=debug` for per-servo output.

use std::time::Duration;

use anyhow::{Context, Result};
use marklink_core::{LinkConfig, Provisioning};
use marklink_remote::{
    associate, camera, ActuatorExecutor, LoggingActuators, RemoteEndpoint, SimulatedWifi,
    SyntheticCamera, PROVISIONING_ENV,
};
use marklink_transport::{ConnectionSupervisor, TcpConnector};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Body bytes of each synthetic frame (≈ a small QVGA JPEG).
const SYNTHETIC_FRAME_BYTES: usize = 6_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("MarkLink Remote v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => {
            info!("MarkLink Remote exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

async fn run() -> Result<()> {
    let config = LinkConfig::from_env().context("Loading link config")?;
    let provisioning = read_provisioning().await?;
    info!("Provisioned: {:?}", provisioning);

    let mut wifi = SimulatedWifi::default();
    associate(&mut wifi, &provisioning, config.join_attempts, Duration::from_secs(1))
        .await
        .context("Joining Wi-Fi")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();

    // ── Actuators: single owner of the servo state ─────────────────────────
    let executor = ActuatorExecutor::new(LoggingActuators, config.drive_speed);
    let executor_task = tokio::spawn(executor.run(cmd_rx));

    let supervisor = ConnectionSupervisor::new(TcpConnector::new(provisioning.endpoint()), config.clone());

    // ── Camera: frames only queue while the link is up ─────────────────────
    let cam = SyntheticCamera::new(config.frame_interval(), SYNTHETIC_FRAME_BYTES);
    let camera_task = tokio::spawn(camera::pump(
        cam,
        frame_tx,
        supervisor.subscribe(),
        shutdown_rx.clone(),
    ));

    // ── Link ───────────────────────────────────────────────────────────────
    let mut endpoint = RemoteEndpoint::new(config, cmd_tx, frame_rx);

    {
        let link = supervisor.run(&mut endpoint, shutdown_rx);
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
    let _ = shutdown_tx.send(true);

    let totals = endpoint.total_stats();
    info!(
        "Sent {} frames ({} bytes), received {} commands",
        totals.frames_sent, totals.bytes_sent, totals.commands_received
    );

    // Dropping the endpoint closes the command queue and stops the executor.
    drop(endpoint);
    let final_state = executor_task.await.context("Actuator executor panicked")?;
    info!("Final actuator state: {:?}", final_state);
    let captured = camera_task.await.context("Camera task panicked")?;
    info!("Camera queued {} frames", captured);
    Ok(())
}

async fn read_provisioning() -> Result<Provisioning> {
    let raw = match std::env::var(PROVISIONING_ENV) {
        Ok(path) if !path.is_empty() => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Reading provisioning file {}", path))?,
        _ => {
            info!("Waiting for provisioning JSON on stdin...");
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Reading provisioning from stdin")?;
            raw
        }
    };
    Provisioning::from_qr_payload(&raw).context("Parsing provisioning payload")
}
