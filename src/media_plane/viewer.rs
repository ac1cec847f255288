//! Viewer-side UDP client: hello keep-alive and receive loop (§4.4.2).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, warn};

use crate::cancel::{new_token, CancellationToken};
use crate::error::Result;
use crate::media::{Assembler, Unit};

/// The 5-byte keep-alive payload (§4.4.2). Content is not otherwise
/// interpreted by the host.
pub const HELLO: &[u8; 5] = b"BRHI!";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(2500);
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const WARNING_FIRST_FIRE: Duration = Duration::from_secs(2);
const WARNING_REPEAT: Duration = Duration::from_secs(3);

/// Connects to a host's media UDP endpoint, sends the hello keep-alive, and
/// reassembles incoming access units.
pub struct MediaViewerClient {
    cancel: Mutex<CancellationToken>,
}

impl MediaViewerClient {
    /// Creates an unconnected client.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { cancel: Mutex::new(new_token()) })
    }

    /// Stops the current connection, if any.
    pub async fn disconnect(&self) {
        self.cancel.lock().await.cancel();
    }

    /// Connects to `target` and runs the receive/keep-alive loop until
    /// cancelled; on a UDP-layer error, reconnects after
    /// [`RECONNECT_DELAY`].
    pub async fn connect(self: &Arc<Self>, target: SocketAddr, on_unit: Arc<dyn Fn(Unit) + Send + Sync>) {
        let cancel = new_token();
        *self.cancel.lock().await = cancel.clone();
        let client = self.clone();
        tokio::spawn(async move { client.run(target, on_unit, cancel).await });
    }

    async fn run(self: Arc<Self>, target: SocketAddr, on_unit: Arc<dyn Fn(Unit) + Send + Sync>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.run_once(target, on_unit.clone(), &cancel) => {
                    if result.is_err() {
                        warn!(%target, "media connection error, reconnecting");
                        tokio::select! {
                            _ = sleep(RECONNECT_DELAY) => {}
                            _ = cancel.cancelled() => return,
                        }
                    } else {
                        return;
                    }
                }
            }
        }
    }

    async fn run_once(&self, target: SocketAddr, on_unit: Arc<dyn Fn(Unit) + Send + Sync>, cancel: &CancellationToken) -> Result<()> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(target).await?;
        socket.send(HELLO).await?;
        let ready_at = Instant::now();

        let mut keep_alive = interval(KEEP_ALIVE_INTERVAL);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first_datagram_received = false;
        let warning_deadline = sleep(WARNING_FIRST_FIRE);
        tokio::pin!(warning_deadline);

        let mut assembler = Assembler::default();
        let mut buf = [0u8; 65536];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = keep_alive.tick() => {
                    socket.send(HELLO).await?;
                }
                () = &mut warning_deadline, if !first_datagram_received => {
                    debug!(elapsed_ms = ready_at.elapsed().as_millis(), "no media datagram received yet");
                    warning_deadline.as_mut().reset(tokio::time::Instant::now() + WARNING_REPEAT);
                }
                recv = socket.recv(&mut buf) => {
                    let n = recv?;
                    first_datagram_received = true;
                    if let Some(unit) = assembler.ingest(&buf[..n], Instant::now()) {
                        on_unit(unit);
                    }
                }
            }
        }
    }
}
