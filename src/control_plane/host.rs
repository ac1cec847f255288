//! Host-side control listener: pairing state machine, heartbeats, broadcast
//! push (§4.3.1).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::advertise::{AdvertiseDelegate, AdvertiseHandle, ServiceAdvertiser};
use crate::cancel::{new_token, CancellationToken};
use crate::config::Config;
use crate::error::{Result, TransportError};
use crate::fabric::discovery_allowed;
use crate::model::{ConnectionTag, PendingPairing, Session};
use crate::observable::Observable;
use crate::wire::control::{ControlMessage, LineFramer, RECOMMENDED_MAX_BUFFERED};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_FIRST_FIRE: Duration = Duration::from_secs(2);
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const BROADCAST_POLL_INTERVAL: Duration = Duration::from_secs(1);

enum ConnCommand {
    Accept,
    Decline(String),
}

struct ConnEntry {
    tag: Arc<std::sync::Mutex<ConnectionTag>>,
    write_tx: mpsc::Sender<ControlMessage>,
    cmd_tx: mpsc::Sender<ConnCommand>,
    cancel: CancellationToken,
}

/// Accepts viewer connections, runs the per-connection pairing state machine,
/// and pushes `MediaParams`/`BroadcastStatus` updates to paired sessions.
pub struct HostListener {
    config: Config,
    connections: Mutex<HashMap<u64, ConnEntry>>,
    pending_by_id: Mutex<HashMap<Uuid, u64>>,
    next_conn_id: AtomicU64,
    media_port: Observable<Option<u16>>,
    broadcast_on: Observable<bool>,
    cancel: CancellationToken,
}

impl HostListener {
    /// Builds a listener that has not yet bound or accepted anything; call
    /// [`Self::run`] to start it.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            connections: Mutex::new(HashMap::new()),
            pending_by_id: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            media_port: Observable::new(None),
            broadcast_on: Observable::new(false),
            cancel: new_token(),
        })
    }

    /// Stops the listener: cancels every open connection and the accept loop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The media UDP port announced to viewers, if known yet (§4.4.1).
    #[must_use]
    pub fn media_port(&self) -> &Observable<Option<u16>> {
        &self.media_port
    }

    /// Current/latest broadcast-on flag pushed to paired sessions.
    #[must_use]
    pub fn broadcast_on(&self) -> &Observable<bool> {
        &self.broadcast_on
    }

    /// Records the host's media UDP port once the media listener is ready.
    /// Per §3, this should change at most once per connection's lifetime;
    /// the listener does not itself enforce that — it is the caller's
    /// responsibility to call this only when the port is newly known or has
    /// genuinely changed.
    pub fn set_media_port(&self, port: u16) {
        self.media_port.set(Some(port));
    }

    /// Pending pairings awaiting an operator decision.
    pub async fn pending_pairings(&self) -> Vec<PendingPairing> {
        self.connections
            .lock()
            .await
            .values()
            .filter_map(|e| e.tag.lock().unwrap().pending().cloned())
            .collect()
    }

    /// Currently accepted sessions.
    pub async fn sessions(&self) -> Vec<Session> {
        self.connections
            .lock()
            .await
            .values()
            .filter_map(|e| e.tag.lock().unwrap().session().cloned())
            .collect()
    }

    /// Accepts a pending pairing by id.
    ///
    /// # Errors
    /// Returns [`TransportError::NotRunning`] if no pairing with that id is
    /// currently pending (it may have already been superseded, declined, or
    /// the connection may have closed).
    pub async fn accept_pairing(&self, id: Uuid) -> Result<()> {
        self.send_pairing_command(id, ConnCommand::Accept).await
    }

    /// Declines a pending pairing by id with a human-readable reason.
    ///
    /// # Errors
    /// See [`Self::accept_pairing`].
    pub async fn decline_pairing(&self, id: Uuid, reason: String) -> Result<()> {
        self.send_pairing_command(id, ConnCommand::Decline(reason)).await
    }

    async fn send_pairing_command(&self, id: Uuid, cmd: ConnCommand) -> Result<()> {
        let conn_id = *self.pending_by_id.lock().await.get(&id).ok_or(TransportError::NotRunning)?;
        let connections = self.connections.lock().await;
        let entry = connections.get(&conn_id).ok_or(TransportError::NotRunning)?;
        entry.cmd_tx.send(cmd).await.map_err(|_| TransportError::NotRunning)
    }

    /// Binds the control port, starts advertising, and begins accepting
    /// connections. Runs until `self.cancel()` is called or the listener
    /// socket fails.
    ///
    /// `broadcast_source` is polled at 1 Hz (§4.3.1); only changes are pushed
    /// to paired sessions.
    pub async fn run(
        self: &Arc<Self>,
        advertiser: Arc<dyn ServiceAdvertiser>,
        delegate: Arc<dyn AdvertiseDelegate>,
        service_name: String,
        broadcast_source: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Result<()> {
        let listener = bind_listener(self.config.control_port)?;

        if discovery_allowed(self.config.path_kind) {
            let host = self.clone();
            tokio::spawn(async move {
                advertise_with_backoff(host, advertiser, delegate, service_name).await;
            });
        } else {
            warn!(path_kind = ?self.config.path_kind, "discovery not allowed over this path, skipping advertisement");
        }

        let host = self.clone();
        tokio::spawn(async move {
            poll_broadcast_source(host, broadcast_source).await;
        });

        let host = self.clone();
        tokio::spawn(async move {
            push_media_port_changes(host).await;
        });

        let host = self.clone();
        tokio::spawn(async move {
            push_broadcast_changes(host).await;
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    let host = self.clone();
                    tokio::spawn(async move { host.handle_connection(stream, addr).await });
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let (read_half, mut write_half) = stream.into_split();
        let mut read_half = read_half;

        let (write_tx, mut write_rx) = mpsc::channel::<ControlMessage>(32);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ConnCommand>(4);
        let tag = Arc::new(std::sync::Mutex::new(ConnectionTag::None));
        let conn_cancel = self.cancel.child_token();

        self.connections.lock().await.insert(
            conn_id,
            ConnEntry { tag: tag.clone(), write_tx: write_tx.clone(), cmd_tx, cancel: conn_cancel.clone() },
        );

        let writer_cancel = conn_cancel.clone();
        let writer_task = tokio::spawn(async move {
            let mut hb = interval_at(
                tokio::time::Instant::now() + HEARTBEAT_FIRST_FIRE,
                HEARTBEAT_INTERVAL,
            );
            hb.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut hb_counter = 0i64;
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    msg = write_rx.recv() => {
                        match msg {
                            Some(msg) => if write_line(&mut write_half, &msg).await.is_err() { break },
                            None => break,
                        }
                    }
                    _ = hb.tick() => {
                        hb_counter += 1;
                        if write_line(&mut write_half, &ControlMessage::Heartbeat { hb: hb_counter }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut framer = LineFramer::new();
        let mut buf = [0u8; 4096];
        let remote = addr.to_string();

        'conn: loop {
            tokio::select! {
                _ = conn_cancel.cancelled() => break,
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCommand::Accept) => {
                            self.apply_accept(&tag, &remote, &write_tx).await;
                        }
                        Some(ConnCommand::Decline(reason)) => {
                            let _ = write_tx.send(ControlMessage::HandshakeResponse {
                                ok: false, session_id: None, udp_port: None, message: Some(reason),
                            }).await;
                            self.clear_pending(&tag).await;
                            break 'conn;
                        }
                        None => {}
                    }
                }
                read = read_half.read(&mut buf) => {
                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            for line in framer.push(&buf[..n]) {
                                if let Err(e) = self.handle_line(conn_id, &tag, &remote, &write_tx, &line).await {
                                    if e.is_fatal() {
                                        break 'conn;
                                    }
                                }
                            }
                            if framer.buffered_len() > RECOMMENDED_MAX_BUFFERED {
                                warn!(conn_id, "control receive buffer overflow, closing");
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(conn_id, %e, "control read error");
                            break;
                        }
                    }
                }
            }
        }

        conn_cancel.cancel();
        let _ = writer_task.await;
        self.connections.lock().await.remove(&conn_id);
        self.pending_by_id.lock().await.retain(|_, v| *v != conn_id);
        info!(conn_id, "control connection closed");
    }

    async fn handle_line(
        &self,
        conn_id: u64,
        tag: &Arc<std::sync::Mutex<ConnectionTag>>,
        remote: &str,
        write_tx: &mpsc::Sender<ControlMessage>,
        line: &[u8],
    ) -> Result<()> {
        let Some(msg) = ControlMessage::decode_line(line) else {
            debug!(conn_id, "dropped unparseable control line");
            return Err(TransportError::InvalidMessage(format!("conn {conn_id}: unparseable control line")));
        };

        match msg {
            ControlMessage::HandshakeRequest { role, code, .. } if role != "viewer" => {
                let _ = write_tx
                    .send(ControlMessage::HandshakeResponse {
                        ok: false,
                        session_id: None,
                        udp_port: None,
                        message: Some(format!("unsupported role: {role}")),
                    })
                    .await;
                Err(TransportError::HandshakeRejected(format!("unsupported role: {role}")))
            }
            ControlMessage::HandshakeRequest { code, .. } => {
                self.on_handshake_request(conn_id, tag, remote, write_tx, code).await;
                Ok(())
            }
            ControlMessage::Heartbeat { hb } => {
                debug!(conn_id, hb, "heartbeat received");
                Ok(())
            }
            _ => {
                debug!(conn_id, "ignored host-originated variant received from viewer");
                Ok(())
            }
        }
    }

    async fn on_handshake_request(
        &self,
        conn_id: u64,
        tag: &Arc<std::sync::Mutex<ConnectionTag>>,
        remote: &str,
        write_tx: &mpsc::Sender<ControlMessage>,
        code: String,
    ) {
        let existing = tag.lock().unwrap().clone();
        match existing {
            ConnectionTag::Session(session) => {
                // Idempotent re-answer (§4.3.1).
                self.send_accept_sequence(write_tx, session.id).await;
            }
            ConnectionTag::Pending(_) | ConnectionTag::None => {
                if matches!(existing, ConnectionTag::Pending(_)) {
                    self.pending_by_id.lock().await.retain(|_, v| *v != conn_id);
                }
                if self.config.auto_accept {
                    let session = Session { id: Uuid::new_v4(), remote: remote.to_string(), started_at: Instant::now() };
                    *tag.lock().unwrap() = ConnectionTag::Session(session.clone());
                    self.send_accept_sequence(write_tx, session.id).await;
                } else {
                    let pending = PendingPairing {
                        id: Uuid::new_v4(),
                        connection_id: conn_id,
                        code,
                        remote: remote.to_string(),
                        requested_at: Instant::now(),
                    };
                    self.pending_by_id.lock().await.insert(pending.id, conn_id);
                    *tag.lock().unwrap() = ConnectionTag::Pending(pending);
                }
            }
        }
    }

    async fn apply_accept(
        &self,
        tag: &Arc<std::sync::Mutex<ConnectionTag>>,
        remote: &str,
        write_tx: &mpsc::Sender<ControlMessage>,
    ) {
        let pending_id = match tag.lock().unwrap().pending() {
            Some(p) => p.id,
            None => return,
        };
        let session = Session { id: pending_id, remote: remote.to_string(), started_at: Instant::now() };
        *tag.lock().unwrap() = ConnectionTag::Session(session.clone());
        self.pending_by_id.lock().await.remove(&pending_id);
        self.send_accept_sequence(write_tx, session.id).await;
    }

    async fn clear_pending(&self, tag: &Arc<std::sync::Mutex<ConnectionTag>>) {
        if let Some(p) = tag.lock().unwrap().pending() {
            self.pending_by_id.lock().await.remove(&p.id);
        }
        *tag.lock().unwrap() = ConnectionTag::None;
    }

    /// `HandshakeResponse`, then `MediaParams` if known, then
    /// `BroadcastStatus` — deterministic ordering per the §9 open-question
    /// decision.
    async fn send_accept_sequence(&self, write_tx: &mpsc::Sender<ControlMessage>, session_id: Uuid) {
        let udp_port = self.media_port.get();
        let _ = write_tx
            .send(ControlMessage::HandshakeResponse { ok: true, session_id: Some(session_id), udp_port, message: None })
            .await;
        if let Some(port) = udp_port {
            let _ = write_tx.send(ControlMessage::MediaParams { udp_port: port }).await;
        }
        let _ = write_tx.send(ControlMessage::BroadcastStatus { on: self.broadcast_on.get() }).await;
    }
}

fn bind_listener(port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

async fn write_line(write_half: &mut tokio::net::tcp::OwnedWriteHalf, msg: &ControlMessage) -> Result<()> {
    let bytes = msg.encode_line()?;
    write_half.write_all(&bytes).await?;
    Ok(())
}

async fn advertise_with_backoff(
    host: Arc<HostListener>,
    advertiser: Arc<dyn ServiceAdvertiser>,
    delegate: Arc<dyn AdvertiseDelegate>,
    service_name: String,
) {
    struct AttemptDelegate {
        result_tx: std::sync::Mutex<Option<oneshot::Sender<std::result::Result<String, String>>>>,
        inner: Arc<dyn AdvertiseDelegate>,
    }
    impl AdvertiseDelegate for AttemptDelegate {
        fn on_published(&self, name: &str) {
            self.inner.on_published(name);
            if let Some(tx) = self.result_tx.lock().unwrap().take() {
                let _ = tx.send(Ok(name.to_string()));
            }
        }
        fn on_did_not_publish(&self, error: &str) {
            self.inner.on_did_not_publish(error);
            if let Some(tx) = self.result_tx.lock().unwrap().take() {
                let _ = tx.send(Err(error.to_string()));
            }
        }
    }

    let mut backoff = BACKOFF_START;
    loop {
        let (tx, rx) = oneshot::channel();
        let attempt_delegate = Arc::new(AttemptDelegate { result_tx: std::sync::Mutex::new(Some(tx)), inner: delegate.clone() });
        let handle = advertiser
            .advertise(&host.config.control_service_type, &service_name, host.config.control_port, false, attempt_delegate)
            .await;

        tokio::select! {
            _ = host.cancel.cancelled() => { handle.stop().await; return; }
            result = rx => {
                match result {
                    Ok(Ok(_name)) => {
                        backoff = BACKOFF_START;
                        host.cancel.cancelled().await;
                        handle.stop().await;
                        return;
                    }
                    Ok(Err(error)) => {
                        warn!(%error, backoff_secs = backoff.as_secs(), "advertisement failed, retrying");
                        handle.stop().await;
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = host.cancel.cancelled() => return,
                        }
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                    Err(_) => return,
                }
            }
        }
    }
}

async fn poll_broadcast_source(host: Arc<HostListener>, source: Arc<dyn Fn() -> bool + Send + Sync>) {
    let mut ticker = interval(BROADCAST_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = host.cancel.cancelled() => return,
            _ = ticker.tick() => {
                host.broadcast_on.set(source());
            }
        }
    }
}

async fn push_media_port_changes(host: Arc<HostListener>) {
    let mut rx = host.media_port.subscribe();
    loop {
        tokio::select! {
            _ = host.cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let Some(port) = *rx.borrow() else { continue };
                broadcast_to_sessions(&host, ControlMessage::MediaParams { udp_port: port }).await;
            }
        }
    }
}

async fn push_broadcast_changes(host: Arc<HostListener>) {
    let mut rx = host.broadcast_on.subscribe();
    loop {
        tokio::select! {
            _ = host.cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let on = *rx.borrow();
                broadcast_to_sessions(&host, ControlMessage::BroadcastStatus { on }).await;
            }
        }
    }
}

async fn broadcast_to_sessions(host: &HostListener, msg: ControlMessage) {
    let connections = host.connections.lock().await;
    for entry in connections.values() {
        if entry.tag.lock().unwrap().session().is_some() {
            let _ = entry.write_tx.try_send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertise::memory::MemoryDirectory;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpStream as ClientStream;

    struct NoopDelegate;
    impl AdvertiseDelegate for NoopDelegate {
        fn on_published(&self, _name: &str) {}
        fn on_did_not_publish(&self, _error: &str) {}
    }

    async fn connect_and_handshake(port: u16, code: &str) -> (ClientStream, LineFramer) {
        let stream = ClientStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut stream = stream;
        let req = ControlMessage::HandshakeRequest {
            app: "beamroom".into(),
            ver: 1,
            role: "viewer".into(),
            code: code.to_string(),
        };
        stream.write_all(&req.encode_line().unwrap()).await.unwrap();
        (stream, LineFramer::new())
    }

    async fn read_one(stream: &mut ClientStream, framer: &mut LineFramer) -> ControlMessage {
        loop {
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            for line in framer.push(&buf[..n]) {
                if let Some(msg) = ControlMessage::decode_line(&line) {
                    return msg;
                }
            }
        }
    }

    #[tokio::test]
    async fn auto_accept_sends_response_then_params_then_status() {
        // Bind to an OS-assigned port to discover one, then hand that same
        // number to the listener under test; relies on SO_REUSEADDR, which
        // bind_listener sets.
        let probe = bind_listener(0).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let mut config = Config::default();
        config.control_port = port;
        config.auto_accept = true;
        let host = HostListener::new(config);
        host.set_media_port(49200);

        let dir = MemoryDirectory::new();
        let (adv, _browser) = dir.pair();
        let host_run = host.clone();
        tokio::spawn(async move {
            let _ = host_run
                .run(Arc::new(adv), Arc::new(NoopDelegate), "TestHost".into(), Arc::new(|| false))
                .await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (mut stream, mut framer) = connect_and_handshake(port, "123456").await;
        let first = read_one(&mut stream, &mut framer).await;
        assert!(matches!(first, ControlMessage::HandshakeResponse { ok: true, .. }));
        let second = read_one(&mut stream, &mut framer).await;
        assert_eq!(second, ControlMessage::MediaParams { udp_port: 49200 });
        let third = read_one(&mut stream, &mut framer).await;
        assert_eq!(third, ControlMessage::BroadcastStatus { on: false });

        host.cancel();
    }

    #[tokio::test]
    async fn operator_decline_sends_rejection() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut config = Config::default();
        config.control_port = port;
        let host = HostListener::new(config);

        let dir = MemoryDirectory::new();
        let (adv, _browser) = dir.pair();
        let host_run = host.clone();
        tokio::spawn(async move {
            let _ = host_run
                .run(Arc::new(adv), Arc::new(NoopDelegate), "TestHost".into(), Arc::new(|| false))
                .await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (mut stream, mut framer) = connect_and_handshake(port, "654321").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pending = host.pending_pairings().await;
        assert_eq!(pending.len(), 1);
        host.decline_pairing(pending[0].id, "Declined".into()).await.unwrap();

        let resp = read_one(&mut stream, &mut framer).await;
        assert_eq!(
            resp,
            ControlMessage::HandshakeResponse { ok: false, session_id: None, udp_port: None, message: Some("Declined".into()) }
        );
        host.cancel();
    }
}
