//! Demo host binary: advertises a control endpoint, auto-accepts viewers,
//! and streams a synthetic keyframe-only H.264-shaped access unit once a
//! viewer latches onto the media plane.
//!
//! The screen capture and H.264 encoder are external collaborators (§1);
//! this binary stands in for them with a fixed test pattern so the
//! transport can be exercised end to end without a platform encoder.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use beamroom::advertise::memory::MemoryDirectory;
use beamroom::advertise::AdvertiseDelegate;
use beamroom::config::Config;
use beamroom::control_plane::HostListener;
use beamroom::media::fragment_access_unit;
use beamroom::media_plane::MediaHost;
use beamroom::wire::ParamSets;

#[derive(Parser, Debug)]
#[command(name = "beamroom-host", about = "Run a beamroom screen-sharing host")]
struct Args {
    /// TCP control port to bind.
    #[arg(long, default_value_t = beamroom::config::DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// Service name advertised on the local link.
    #[arg(long, default_value = "beamroom-host")]
    name: String,

    /// Accept every incoming pairing request automatically.
    #[arg(long, default_value_t = true)]
    auto_accept: bool,

    /// Sender-side fragmentation MTU, in bytes.
    #[arg(long, default_value_t = beamroom::config::DEFAULT_MTU)]
    mtu: u16,
}

struct LoggingDelegate;
impl AdvertiseDelegate for LoggingDelegate {
    fn on_published(&self, name: &str) {
        tracing::info!(name, "control service published");
    }
    fn on_did_not_publish(&self, error: &str) {
        tracing::warn!(error, "control service publish failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = Config { control_port: args.control_port, auto_accept: args.auto_accept, mtu: args.mtu, ..Config::default() };

    let media = MediaHost::bind().await?;
    let media_port = media.local_port()?;
    tracing::info!(media_port, "media listener ready");

    let host = HostListener::new(config);
    host.set_media_port(media_port);

    let media_run = media.clone();
    tokio::spawn(async move {
        media_run.run(Arc::new(|peer| tracing::info!(?peer, "active media peer changed"))).await;
    });

    let synthetic_frame = vec![0u8; 4000];
    let param_sets = ParamSets { sps: vec![vec![0x67, 0x42, 0x00, 0x1e]], pps: vec![vec![0x68, 0xce, 0x3c, 0x80]] };
    let media_sender = media.clone();
    let mtu = args.mtu;
    tokio::spawn(async move {
        let mut seq: u32 = 0;
        loop {
            let keyframe = seq % 30 == 0;
            let ps = if keyframe { Some(&param_sets) } else { None };
            if let Ok(datagrams) = fragment_access_unit(seq, &synthetic_frame, keyframe, 1920, 1080, ps, mtu) {
                for dg in datagrams {
                    let _ = media_sender.send_to_active(&dg).await;
                }
            }
            seq = seq.wrapping_add(1);
            tokio::time::sleep(Duration::from_millis(33)).await;
        }
    });

    let dir = MemoryDirectory::new();
    let (advertiser, _browser) = dir.pair();

    tracing::info!(control_port = args.control_port, "starting control listener");
    host.run(Arc::new(advertiser), Arc::new(LoggingDelegate), args.name, Arc::new(|| true)).await?;

    Ok(())
}
