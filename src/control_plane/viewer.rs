//! Viewer-side control client: connect/handshake, heartbeats, liveness,
//! auto-retry (§4.3.2).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::{new_token, CancellationToken};
use crate::config::Config;
use crate::error::TransportError;
use crate::model::Endpoint;
use crate::observable::Observable;
use crate::wire::control::{ControlMessage, LineFramer, RECOMMENDED_MAX_BUFFERED};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(8);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const LIVENESS_GRACE: Duration = Duration::from_secs(15);
const RETRY_SCHEDULE: [u64; 6] = [1, 2, 3, 5, 8, 10];

/// Viewer connection status (§4.3.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewerStatus {
    /// No connection attempt in progress.
    Idle,
    /// TCP connect in flight.
    Connecting,
    /// `HandshakeRequest` sent, awaiting `HandshakeResponse`.
    WaitingAcceptance,
    /// Accepted; carries the session id and the media port once known.
    Paired { session_id: Uuid, udp_port: Option<u16> },
    /// Terminal for this attempt; carries a human-readable reason.
    Failed(String),
}

/// Generates a 6-digit pairing code, uniformly at random (§4.3.2). Uniqueness
/// is explicitly not required by the spec.
#[must_use]
pub fn generate_code() -> String {
    format!("{:06}", rand::random::<u32>() % 1_000_000)
}

/// Drives one viewer's connection lifecycle: connect, handshake, heartbeats,
/// liveness, and auto-retry.
pub struct ViewerClient {
    #[allow(dead_code)] // kept for parity with the host's config surface; mtu is sender-side
    config: Config,
    status: Observable<ViewerStatus>,
    broadcast_on: Observable<bool>,
    attempt: AtomicU64,
    retry_index: AtomicUsize,
    auto_retry_armed: AtomicBool,
    cancel: AsyncMutex<CancellationToken>,
}

impl ViewerClient {
    /// Builds an idle viewer client.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            status: Observable::new(ViewerStatus::Idle),
            broadcast_on: Observable::new(false),
            attempt: AtomicU64::new(0),
            retry_index: AtomicUsize::new(0),
            auto_retry_armed: AtomicBool::new(false),
            cancel: AsyncMutex::new(new_token()),
        })
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ViewerStatus {
        self.status.get()
    }

    /// Subscribes for status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ViewerStatus> {
        self.status.subscribe()
    }

    /// The last `BroadcastStatus.on` value received.
    #[must_use]
    pub fn broadcast_on(&self) -> bool {
        self.broadcast_on.get()
    }

    /// Initiates a connection to `endpoint` with pairing `code`. Bumps the
    /// attempt counter (used only for logs, §4.3.2) and arms auto-retry.
    pub async fn connect(self: &Arc<Self>, endpoint: Endpoint, code: String) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.retry_index.store(0, Ordering::SeqCst);
        self.auto_retry_armed.store(true, Ordering::SeqCst);
        let cancel = new_token();
        *self.cancel.lock().await = cancel.clone();
        let client = self.clone();
        tokio::spawn(async move { client.run_connection(endpoint, code, cancel).await });
    }

    /// Disarms auto-retry and tears down any in-flight connection or
    /// scheduled retry.
    pub async fn disconnect(&self) {
        self.auto_retry_armed.store(false, Ordering::SeqCst);
        self.cancel.lock().await.cancel();
        self.status.set(ViewerStatus::Idle);
    }

    fn fail(&self, reason: impl Into<String>) {
        self.status.set(ViewerStatus::Failed(reason.into()));
    }

    fn schedule_retry(self: &Arc<Self>, endpoint: Endpoint, code: String) {
        if !self.auto_retry_armed.load(Ordering::SeqCst) {
            return;
        }
        let idx = self.retry_index.fetch_add(1, Ordering::SeqCst);
        let delay = Duration::from_secs(RETRY_SCHEDULE[idx.min(RETRY_SCHEDULE.len() - 1)]);
        let cancel = new_token();
        let client = self.clone();
        tokio::spawn(async move {
            *client.cancel.lock().await = cancel.clone();
            tokio::select! {
                _ = sleep(delay) => {
                    client.run_connection(endpoint, code, cancel.clone()).await;
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    async fn run_connection(self: Arc<Self>, endpoint: Endpoint, code: String, cancel: CancellationToken) {
        self.status.set(ViewerStatus::Connecting);
        let stream = match TcpStream::connect(endpoint.to_socket_addr()).await {
            Ok(s) => s,
            Err(e) => {
                self.fail(format!("Connect failed: {e}"));
                self.schedule_retry(endpoint, code);
                return;
            }
        };
        let _ = stream.set_nodelay(true);
        let (mut read_half, mut write_half) = stream.into_split();

        let request =
            ControlMessage::HandshakeRequest { app: "beamroom".into(), ver: 1, role: "viewer".into(), code: code.clone() };
        let Ok(bytes) = request.encode_line() else {
            self.fail("Encode failed");
            self.schedule_retry(endpoint, code);
            return;
        };
        if let Err(e) = write_half.write_all(&bytes).await {
            if TransportError::from(e).is_fatal() {
                self.fail("Send failed");
                self.schedule_retry(endpoint, code);
                return;
            }
        }
        self.status.set(ViewerStatus::WaitingAcceptance);

        let handshake_deadline = sleep(HANDSHAKE_TIMEOUT);
        tokio::pin!(handshake_deadline);

        let mut framer = LineFramer::new();
        let mut buf = [0u8; 4096];
        let mut last_receive = Instant::now();
        let mut paired = false;

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness = interval(LIVENESS_GRACE);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut hb_counter: i64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                () = &mut handshake_deadline, if !paired => {
                    self.fail("Handshake timed out");
                    self.schedule_retry(endpoint, code);
                    return;
                }
                read = read_half.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            self.fail("Disconnected");
                            self.schedule_retry(endpoint, code);
                            return;
                        }
                        Ok(n) => {
                            for line in framer.push(&buf[..n]) {
                                last_receive = Instant::now();
                                match ControlMessage::decode_line(&line) {
                                    Some(ControlMessage::HandshakeResponse { ok: true, session_id: Some(session_id), udp_port, .. }) => {
                                        self.status.set(ViewerStatus::Paired { session_id, udp_port });
                                        paired = true;
                                        heartbeat.reset();
                                    }
                                    Some(ControlMessage::HandshakeResponse { ok: true, session_id: None, .. }) => {
                                        self.fail("Handshake accepted without a session id");
                                        self.schedule_retry(endpoint, code);
                                        return;
                                    }
                                    Some(ControlMessage::HandshakeResponse { ok: false, message, .. }) => {
                                        self.fail(message.unwrap_or_else(|| "Declined".into()));
                                        self.schedule_retry(endpoint, code);
                                        return;
                                    }
                                    Some(ControlMessage::MediaParams { udp_port }) => {
                                        if let ViewerStatus::Paired { session_id, .. } = self.status.get() {
                                            self.status.set(ViewerStatus::Paired { session_id, udp_port: Some(udp_port) });
                                        }
                                    }
                                    Some(ControlMessage::BroadcastStatus { on }) => {
                                        self.broadcast_on.set(on);
                                    }
                                    Some(ControlMessage::Heartbeat { hb }) => {
                                        debug!(hb, "heartbeat received");
                                    }
                                    Some(ControlMessage::HandshakeRequest { .. }) => {
                                        debug!("ignored host-originated handshake request echo");
                                    }
                                    None => {
                                        debug!("dropped unparseable control line (protocol error)");
                                    }
                                }
                            }
                            if framer.buffered_len() > RECOMMENDED_MAX_BUFFERED {
                                self.fail("Receive buffer overflow");
                                self.schedule_retry(endpoint, code);
                                return;
                            }
                        }
                        Err(e) => {
                            let err = TransportError::from(e);
                            if err.is_fatal() {
                                self.fail(format!("Read error: {err}"));
                                self.schedule_retry(endpoint, code);
                                return;
                            }
                        }
                    }
                }
                _ = heartbeat.tick(), if paired => {
                    hb_counter += 1;
                    if let Err(e) = write_half.write_all(&ControlMessage::Heartbeat { hb: hb_counter }.encode_line().unwrap_or_default()).await {
                        if TransportError::from(e).is_fatal() {
                            self.fail("Send failed");
                            self.schedule_retry(endpoint, code);
                            return;
                        }
                    }
                }
                _ = liveness.tick(), if paired => {
                    if last_receive.elapsed() > LIVENESS_GRACE {
                        self.fail("Lost contact with host");
                        self.schedule_retry(endpoint, code);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::control::LineFramer as Framer;
    use tokio::net::TcpListener;

    #[test]
    fn generated_code_is_six_digits() {
        for _ in 0..20 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    async fn spawn_scripted_host(
        mut script: impl FnMut(&ControlMessage) -> Vec<ControlMessage> + Send + 'static,
    ) -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut framer = Framer::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                for line in framer.push(&buf[..n]) {
                    if let Some(msg) = ControlMessage::decode_line(&line) {
                        for reply in script(&msg) {
                            if stream.write_all(&reply.encode_line().unwrap()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });
        port
    }

    #[tokio::test]
    async fn reaches_paired_on_accept() {
        let port = spawn_scripted_host(|msg| match msg {
            ControlMessage::HandshakeRequest { .. } => vec![
                ControlMessage::HandshakeResponse { ok: true, session_id: Some(Uuid::nil()), udp_port: Some(49200), message: None },
                ControlMessage::MediaParams { udp_port: 49200 },
                ControlMessage::BroadcastStatus { on: false },
            ],
            _ => vec![],
        })
        .await;

        let client = ViewerClient::new(Config::default());
        client.connect(Endpoint::from(std::net::SocketAddr::from(([127, 0, 0, 1], port))), "123456".into()).await;

        let mut rx = client.subscribe_status();
        loop {
            rx.changed().await.unwrap();
            if matches!(&*rx.borrow(), ViewerStatus::Paired { .. }) {
                break;
            }
            if matches!(&*rx.borrow(), ViewerStatus::Failed(_)) {
                panic!("viewer failed unexpectedly");
            }
        }
        assert_eq!(client.status(), ViewerStatus::Paired { session_id: Uuid::nil(), udp_port: Some(49200) });
    }

    #[tokio::test(start_paused = true)]
    async fn auto_retry_accumulates_delays_per_schedule() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let attempts: Arc<AsyncMutex<Vec<tokio::time::Instant>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let attempts_recorder = attempts.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                attempts_recorder.lock().await.push(tokio::time::Instant::now());
                drop(stream); // immediate EOF: the viewer sees "Disconnected" and retries
            }
        });

        let client = ViewerClient::new(Config::default());
        client.connect(Endpoint::from(std::net::SocketAddr::from(([127, 0, 0, 1], port))), "000000".into()).await;

        let start = tokio::time::Instant::now();
        while attempts.lock().await.len() < 5 {
            tokio::task::yield_now().await;
            tokio::time::advance(Duration::from_millis(250)).await;
        }

        let recorded = attempts.lock().await.clone();
        let offsets: Vec<f64> = recorded.iter().map(|t| (*t - start).as_secs_f64()).collect();
        // First connect is immediate; subsequent ones land at the cumulative
        // {1, 3, 6, 11} second marks from RETRY_SCHEDULE (property #12).
        let expected_cumulative = [0.0, 1.0, 3.0, 6.0, 11.0];
        for (offset, expected) in offsets.iter().zip(expected_cumulative.iter()) {
            assert!((offset - expected).abs() < 0.3, "offsets={offsets:?} expected={expected_cumulative:?}");
        }
        client.disconnect().await;
    }

    #[tokio::test]
    async fn declined_handshake_fails_with_reason() {
        let port = spawn_scripted_host(|msg| match msg {
            ControlMessage::HandshakeRequest { .. } => {
                vec![ControlMessage::HandshakeResponse { ok: false, session_id: None, udp_port: None, message: Some("Declined".into()) }]
            }
            _ => vec![],
        })
        .await;

        let client = ViewerClient::new(Config::default());
        client.connect(Endpoint::from(std::net::SocketAddr::from(([127, 0, 0, 1], port))), "123456".into()).await;

        let mut rx = client.subscribe_status();
        loop {
            rx.changed().await.unwrap();
            if let ViewerStatus::Failed(reason) = &*rx.borrow() {
                assert_eq!(reason, "Declined");
                return;
            }
        }
    }
}
