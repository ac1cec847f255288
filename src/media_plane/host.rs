//! Host-side UDP listener: active-peer latch with TTL expiry (§4.4.1).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info};

use crate::cancel::{new_token, CancellationToken};
use crate::error::{Result, TransportError};
use crate::fabric::{session_allowed, PathKind};

const PEER_TTL: Duration = Duration::from_secs(6);
const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The host's UDP media endpoint. Latches onto whichever remote address most
/// recently sent a datagram and uses it as the destination for outbound
/// media.
pub struct MediaHost {
    socket: UdpSocket,
    active_peer: Mutex<Option<(SocketAddr, Instant)>>,
    cancel: CancellationToken,
}

impl MediaHost {
    /// Binds an ephemeral UDP port assuming [`PathKind::Other`] (the
    /// platform-agnostic default used for local testing). Callers that know
    /// which network path the socket will actually use should call
    /// [`Self::bind_on_path`] instead.
    ///
    /// # Errors
    /// Propagates the underlying bind failure.
    pub async fn bind() -> Result<Arc<Self>> {
        Self::bind_on_path(PathKind::Other).await
    }

    /// Binds an ephemeral UDP port for use over `path`.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] if `path` is not a path
    /// the media plane is allowed to run over (§6: infrastructure Wi-Fi
    /// only), or propagates the underlying bind failure.
    pub async fn bind_on_path(path: PathKind) -> Result<Arc<Self>> {
        if !session_allowed(path) {
            return Err(TransportError::ConnectionFailed(format!("media plane not allowed over {path:?}")));
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Arc::new(Self { socket, active_peer: Mutex::new(None), cancel: new_token() }))
    }

    /// The port the OS assigned on bind; this is what gets announced via
    /// `MediaParams` (§4.3.1, §4.4.1).
    ///
    /// # Errors
    /// Propagates failure to read the socket's local address.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Stops the receive loop and TTL sweep.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The currently latched peer, if any.
    pub async fn active_peer(&self) -> Option<SocketAddr> {
        self.active_peer.lock().await.map(|(addr, _)| addr)
    }

    /// Sends `data` to the currently latched peer. No-op if no peer is
    /// latched.
    ///
    /// # Errors
    /// Propagates the underlying socket send failure.
    pub async fn send_to_active(&self, data: &[u8]) -> Result<()> {
        if let Some(addr) = self.active_peer().await {
            self.socket.send_to(data, addr).await?;
        }
        Ok(())
    }

    /// Runs the receive loop and the 1 Hz TTL sweep until cancelled.
    /// `on_peer_changed` fires exactly once per latch transition, including
    /// transitions to `None` on expiry (§4.4.1, properties #14–15).
    pub async fn run(self: &Arc<Self>, on_peer_changed: Arc<dyn Fn(Option<SocketAddr>) + Send + Sync>) {
        let recv_host = self.clone();
        let recv_callback = on_peer_changed.clone();
        let recv_task = tokio::spawn(async move { recv_host.recv_loop(recv_callback).await });

        let sweep_host = self.clone();
        let sweep_callback = on_peer_changed;
        let sweep_task = tokio::spawn(async move { sweep_host.ttl_sweep(sweep_callback).await });

        self.cancel.cancelled().await;
        recv_task.abort();
        sweep_task.abort();
    }

    async fn recv_loop(self: Arc<Self>, on_peer_changed: Arc<dyn Fn(Option<SocketAddr>) + Send + Sync>) {
        let mut buf = [0u8; 65536];
        loop {
            let (_, from) = match self.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(%e, "media recv error");
                    continue;
                }
            };
            let now = Instant::now();
            let mut guard = self.active_peer.lock().await;
            let changed = !matches!(*guard, Some((addr, _)) if addr == from);
            *guard = Some((from, now));
            drop(guard);
            if changed {
                info!(%from, "active media peer replaced");
                on_peer_changed(Some(from));
            }
        }
    }

    async fn ttl_sweep(self: Arc<Self>, on_peer_changed: Arc<dyn Fn(Option<SocketAddr>) + Send + Sync>) {
        let mut ticker = interval(TTL_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let mut guard = self.active_peer.lock().await;
            let expired = matches!(*guard, Some((_, last_seen)) if now.duration_since(last_seen) > PEER_TTL);
            if expired {
                *guard = None;
                drop(guard);
                info!("active media peer expired");
                on_peer_changed(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn first_datagram_latches_peer_and_fires_callback_once() {
        let host = MediaHost::bind().await.unwrap();
        let port = host.local_port().unwrap();

        let seen: Arc<AsyncMutex<Vec<Option<SocketAddr>>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let host_run = host.clone();
        tokio::spawn(async move {
            host_run
                .run(Arc::new(move |peer| {
                    let seen = seen_clone.clone();
                    tokio::spawn(async move { seen.lock().await.push(peer) });
                }))
                .await;
        });

        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        client.send_to(b"BRHI!", ("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(host.active_peer().await.is_some());
        assert_eq!(seen.lock().await.len(), 1);
        host.cancel();
    }

    #[tokio::test]
    async fn second_peer_replaces_first() {
        let host = MediaHost::bind().await.unwrap();
        let port = host.local_port().unwrap();
        let changes = Arc::new(AtomicUsize::new(0));
        let changes_clone = changes.clone();
        let host_run = host.clone();
        tokio::spawn(async move {
            host_run.run(Arc::new(move |_| { changes_clone.fetch_add(1, Ordering::SeqCst); })).await;
        });

        let v1 = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        v1.send_to(b"BRHI!", ("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_v1 = host.active_peer().await;

        let v2 = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        v2.send_to(b"BRHI!", ("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_v2 = host.active_peer().await;

        assert_ne!(after_v1, after_v2);
        assert_eq!(changes.load(Ordering::SeqCst), 2);
        host.cancel();
    }

    #[tokio::test]
    async fn bind_on_path_rejects_cellular() {
        let err = MediaHost::bind_on_path(PathKind::Cellular).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn bind_on_path_accepts_infrastructure_wifi() {
        assert!(MediaHost::bind_on_path(PathKind::InfrastructureWifi).await.is_ok());
    }
}
