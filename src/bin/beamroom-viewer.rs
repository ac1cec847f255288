//! Demo viewer binary: discovers (or is told) a host, pairs over the control
//! plane, and logs received access units.
//!
//! Decoding and on-screen rendering are external collaborators (§1); this
//! binary only proves out the transport by reporting unit sizes and keyframe
//! boundaries as they arrive.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use beamroom::config::Config;
use beamroom::control_plane::{ViewerClient, ViewerStatus};
use beamroom::media::Unit;
use beamroom::media_plane::MediaViewerClient;
use beamroom::model::Endpoint;

#[derive(Parser, Debug)]
#[command(name = "beamroom-viewer", about = "Connect to a beamroom screen-sharing host")]
struct Args {
    /// Host control address, e.g. 192.168.1.20:52345.
    #[arg(long)]
    host: SocketAddr,

    /// Pairing code shown on the host. A fresh random code is generated if omitted.
    #[arg(long)]
    code: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let code = args.code.unwrap_or_else(beamroom::control_plane::viewer::generate_code);
    tracing::info!(host = %args.host, %code, "connecting");

    let client = ViewerClient::new(Config::default());
    let media = MediaViewerClient::new();

    let mut status_rx = client.subscribe_status();
    let media_for_status = media.clone();
    let host_addr = args.host;
    tokio::spawn(async move {
        loop {
            if status_rx.changed().await.is_err() {
                return;
            }
            let status = status_rx.borrow().clone();
            match status {
                ViewerStatus::Paired { session_id, udp_port: Some(udp_port) } => {
                    tracing::info!(%session_id, udp_port, "paired, connecting media plane");
                    let target = SocketAddr::new(host_addr.ip(), udp_port);
                    media_for_status
                        .connect(
                            target,
                            Arc::new(|unit: Unit| {
                                tracing::info!(seq = unit.seq, keyframe = unit.keyframe, bytes = unit.avcc_data.len(), "access unit received");
                            }),
                        )
                        .await;
                }
                ViewerStatus::Failed(reason) => {
                    tracing::warn!(reason, "viewer connection failed, auto-retry will take over if armed");
                }
                other => {
                    tracing::debug!(?other, "viewer status changed");
                }
            }
        }
    });

    client.connect(Endpoint::from(args.host), code).await;

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    media.disconnect().await;
    client.disconnect().await;

    Ok(())
}
