//! The coordinator link: dialing, login, reconnection, heartbeat, and
//! request/response correlation over one tagged-frame TCP stream.
//!
//! # Connection epochs
//!
//! The link reconnects for the life of the process. Each successful dial
//! opens a new *epoch*: the write half is stored tagged with the epoch
//! number, and the read task spawned for that socket remembers it. When
//! a read task dies it tears down only the writer of its own epoch — a
//! task from a previous connection that exits late finds a newer epoch
//! in place and leaves it alone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chatforge_protocol::frame::{self, TaggedFrame};
use chatforge_protocol::{
    CenterPush, CenterRequest, CenterResponse, ChatMessage, ProtocolError, RequestKind,
};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::pending::PendingRequests;
use crate::{Census, PushHandler, UplinkError};

/// Tunables for the coordinator link.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Address of the coordinator to dial.
    pub center_addr: String,
    /// The address clients use to reach this node, announced at login so
    /// the coordinator can hand it to game servers.
    pub public_addr: String,
    /// How long a TCP connect may take before the attempt is abandoned.
    pub connect_timeout: Duration,
    /// How long to wait for the coordinator to answer the login request.
    pub login_timeout: Duration,
    /// Response deadline for the link's own requests (census reports and
    /// chat forwards).
    pub request_timeout: Duration,
    /// Base pause between reconnect attempts; up to a second of jitter is
    /// added so a restarted coordinator is not hit by every node at once.
    pub retry_interval: Duration,
    /// Interval between census heartbeats.
    pub heartbeat_interval: Duration,
    /// Capacity of the chat forward queue. Senders wait when it is full.
    pub forward_capacity: usize,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            center_addr: "127.0.0.1:9100".to_owned(),
            public_addr: "127.0.0.1:9000".to_owned(),
            connect_timeout: Duration::from_secs(2),
            login_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            forward_capacity: 1024,
        }
    }
}

/// Observable lifecycle of the link.
///
/// ```text
///                dial ok          login ok
/// Connecting ───────────→ AwaitingLogin ───────→ Ready
///     ▲                         │                  │
///     │ supervisor retry        │ refused/timeout  │ socket error
///     │                         ▼                  ▼
///     └─────────────────── Disconnected ←──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No live socket. The supervisor will dial again shortly.
    Disconnected,
    /// TCP dial in progress.
    Connecting,
    /// Socket is up; waiting for the coordinator to accept our login.
    AwaitingLogin,
    /// Logged in. Requests and pushes flow.
    Ready,
}

/// Write half of the current socket, tagged with the epoch that opened it.
#[derive(Debug)]
struct EpochWriter {
    epoch: u64,
    half: OwnedWriteHalf,
    /// Cancelling this stops the matching read task. Child of the link's
    /// own token, so shutting the link down stops every epoch too.
    abort: CancellationToken,
}

/// State shared between the link handle and its background tasks.
#[derive(Debug)]
struct LinkShared {
    config: UplinkConfig,
    pending: PendingRequests,
    writer: Mutex<Option<EpochWriter>>,
    state_tx: watch::Sender<LinkState>,
    cancel: CancellationToken,
    next_epoch: AtomicU64,
}

impl LinkShared {
    fn set_state(&self, next: LinkState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "coordinator link state");
        }
    }

    /// Writes one frame to the current socket.
    ///
    /// The writer mutex is held across the whole write so concurrent
    /// requests cannot interleave partial frames. A write error retires
    /// the epoch on the spot; the waiters parked on it resolve with a
    /// lost link.
    async fn write_frame(&self, frame: Bytes) -> Result<(), UplinkError> {
        let mut writer = self.writer.lock().await;
        let Some(current) = writer.as_mut() else {
            return Err(UplinkError::NotConnected);
        };
        let result = async {
            current.half.write_all(&frame).await?;
            current.half.flush().await
        }
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(dead) = writer.take() {
                    dead.abort.cancel();
                }
                drop(writer);
                self.pending.fail_all();
                self.set_state(LinkState::Disconnected);
                Err(UplinkError::SendFailed(err))
            }
        }
    }

    /// Sends `kind` with `parameters` and waits for the matching response.
    async fn request(
        &self,
        kind: RequestKind,
        parameters: Vec<String>,
    ) -> Result<CenterResponse, UplinkError> {
        let id = self.pending.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.register(id, tx);

        let payload = serde_json::to_vec(&CenterRequest::new(kind, parameters))
            .map_err(ProtocolError::Encode)?;
        if let Err(err) = self.write_frame(frame::encode_tagged(id, &payload)).await {
            self.pending.discard(id);
            return Err(err);
        }

        rx.await.map_err(|_| UplinkError::LinkLost)
    }

    /// Retires the socket belonging to `epoch`, if it is still current.
    async fn teardown(&self, epoch: u64) {
        let taken = {
            let mut writer = self.writer.lock().await;
            if writer.as_ref().is_some_and(|w| w.epoch == epoch) {
                writer.take()
            } else {
                None
            }
        };
        if let Some(writer) = taken {
            writer.abort.cancel();
            self.pending.fail_all();
            self.set_state(LinkState::Disconnected);
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Handle to the coordinator link.
///
/// Owns the background tasks keeping the link alive; dropping the handle
/// (or calling [`CenterLink::shutdown`]) stops them and closes the
/// socket.
#[derive(Debug)]
pub struct CenterLink {
    shared: Arc<LinkShared>,
    forward_tx: mpsc::Sender<ChatMessage>,
}

impl CenterLink {
    /// Dials the coordinator, logs in, and starts the background tasks.
    ///
    /// The first connect is fatal on failure: a node that cannot reach
    /// its coordinator at startup is misconfigured, and refusing to come
    /// up beats accepting clients nothing can route for. Drops after
    /// startup are retried by the supervisor instead.
    pub async fn connect<H, C>(
        config: UplinkConfig,
        handler: Arc<H>,
        census: Arc<C>,
    ) -> Result<Self, UplinkError>
    where
        H: PushHandler,
        C: Census,
    {
        let forward_capacity = config.forward_capacity;
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let shared = Arc::new(LinkShared {
            config,
            pending: PendingRequests::default(),
            writer: Mutex::new(None),
            state_tx,
            cancel: CancellationToken::new(),
            next_epoch: AtomicU64::new(1),
        });

        establish(&shared, &handler).await?;

        let (forward_tx, forward_rx) = mpsc::channel(forward_capacity);
        tokio::spawn(run_supervisor(Arc::clone(&shared), handler));
        tokio::spawn(run_heartbeat(Arc::clone(&shared), census));
        tokio::spawn(run_forward(Arc::clone(&shared), forward_rx));

        Ok(CenterLink { shared, forward_tx })
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribes to link state changes.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Ready
    }

    /// Sends a request and waits for the coordinator's response.
    ///
    /// Resolves when the response arrives or the link drops; a caller
    /// that cannot wait indefinitely should wrap this in its own
    /// deadline. Fails fast with [`UplinkError::NotConnected`] while the
    /// link is down.
    pub async fn request(
        &self,
        kind: RequestKind,
        parameters: Vec<String>,
    ) -> Result<CenterResponse, UplinkError> {
        self.shared.request(kind, parameters).await
    }

    /// Queues a validated chat message for forwarding.
    ///
    /// Waits when the queue is full, which pushes back on the read loops
    /// feeding it rather than growing without bound.
    pub async fn forward(&self, message: ChatMessage) -> Result<(), UplinkError> {
        self.forward_tx
            .send(message)
            .await
            .map_err(|_| UplinkError::NotConnected)
    }

    /// Stops the background tasks and closes the socket.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

impl Drop for CenterLink {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Dials the coordinator and runs the login handshake.
///
/// On success the writer holds a fresh epoch, a read task is pumping the
/// socket, and the state is [`LinkState::Ready`].
async fn establish<H: PushHandler>(
    shared: &Arc<LinkShared>,
    handler: &Arc<H>,
) -> Result<(), UplinkError> {
    let addr = shared.config.center_addr.clone();
    shared.set_state(LinkState::Connecting);

    let dial = TcpStream::connect(&addr);
    let stream = match timeout(shared.config.connect_timeout, dial).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            shared.set_state(LinkState::Disconnected);
            return Err(UplinkError::Dial { addr, source });
        }
        Err(_) => {
            shared.set_state(LinkState::Disconnected);
            return Err(UplinkError::DialTimeout { addr });
        }
    };
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(error = %err, "could not set TCP_NODELAY on coordinator socket");
    }

    let epoch = shared.next_epoch.fetch_add(1, Ordering::Relaxed);
    let abort = shared.cancel.child_token();
    let (read_half, write_half) = stream.into_split();
    *shared.writer.lock().await = Some(EpochWriter {
        epoch,
        half: write_half,
        abort: abort.clone(),
    });
    tokio::spawn(run_read(
        Arc::clone(shared),
        Arc::clone(handler),
        read_half,
        epoch,
        abort,
    ));

    shared.set_state(LinkState::AwaitingLogin);
    let login = shared.request(RequestKind::Login, vec![shared.config.public_addr.clone()]);
    let response = match timeout(shared.config.login_timeout, login).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            shared.teardown(epoch).await;
            return Err(err);
        }
        Err(_) => {
            shared.teardown(epoch).await;
            return Err(UplinkError::LoginTimeout(shared.config.login_timeout));
        }
    };
    if !response.is_success() {
        shared.teardown(epoch).await;
        return Err(UplinkError::LoginRefused {
            code: response.code,
            message: response.message,
        });
    }

    shared.set_state(LinkState::Ready);
    tracing::info!(%addr, "logged in to coordinator");
    Ok(())
}

/// Reads frames off one socket epoch until it dies, then retires it.
async fn run_read<H: PushHandler>(
    shared: Arc<LinkShared>,
    handler: Arc<H>,
    mut read_half: OwnedReadHalf,
    epoch: u64,
    abort: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        tokio::select! {
            _ = abort.cancelled() => break,
            read = read_half.read_buf(&mut buf) => match read {
                Ok(0) => {
                    tracing::warn!("coordinator closed the link");
                    break;
                }
                Ok(_) => {
                    if !drain_frames(&shared, &handler, &mut buf) {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "coordinator link read failed");
                    break;
                }
            },
        }
    }
    shared.teardown(epoch).await;
}

/// Splits every complete frame out of `buf` and routes it.
///
/// Returns `false` when the stream is beyond recovery (desynchronized
/// framing) and the connection must drop.
fn drain_frames<H: PushHandler>(
    shared: &Arc<LinkShared>,
    handler: &Arc<H>,
    buf: &mut BytesMut,
) -> bool {
    loop {
        match frame::split_tagged(buf) {
            Ok(Some(frame)) => route_frame(shared, handler, frame),
            Ok(None) => return true,
            Err(err) => {
                tracing::error!(error = %err, "coordinator stream desynchronized");
                return false;
            }
        }
    }
}

fn route_frame<H: PushHandler>(shared: &Arc<LinkShared>, handler: &Arc<H>, frame: TaggedFrame) {
    if frame.is_heartbeat() {
        tracing::trace!("coordinator heartbeat");
        return;
    }
    if frame.correlation_id == 0 {
        match serde_json::from_slice::<CenterPush>(&frame.payload) {
            Ok(push) => {
                // Handlers touch the directory and connection queues;
                // running them on their own task keeps a slow handler
                // from stalling the read loop.
                let handler = Arc::clone(handler);
                tokio::spawn(async move { handler.handle(push).await });
            }
            Err(err) => {
                tracing::warn!(error = %err, "undecodable coordinator push dropped");
            }
        }
        return;
    }
    match serde_json::from_slice::<CenterResponse>(&frame.payload) {
        Ok(response) => shared.pending.complete(frame.correlation_id, response),
        Err(err) => {
            tracing::warn!(
                correlation_id = frame.correlation_id,
                error = %err,
                "undecodable coordinator response dropped"
            );
        }
    }
}

/// Redials whenever the link sits in [`LinkState::Disconnected`].
async fn run_supervisor<H: PushHandler>(shared: Arc<LinkShared>, handler: Arc<H>) {
    loop {
        let jitter_ms: u64 = rand::rng().random_range(0..1_000);
        let pause = shared.config.retry_interval + Duration::from_millis(jitter_ms);
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(pause) => {}
        }
        if *shared.state_tx.borrow() != LinkState::Disconnected {
            continue;
        }
        tracing::info!(addr = %shared.config.center_addr, "reconnecting to coordinator");
        if let Err(err) = establish(&shared, &handler).await {
            tracing::warn!(error = %err, "coordinator reconnect failed");
        }
    }
}

/// Reports connection and player counts on a fixed interval.
async fn run_heartbeat<C: Census>(shared: Arc<LinkShared>, census: Arc<C>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.config.heartbeat_interval) => {}
        }
        if *shared.state_tx.borrow() != LinkState::Ready {
            continue;
        }
        let connections = census.connection_count();
        let players = census.player_count();
        let report = shared.request(
            RequestKind::UpdateClientAndPlayerCount,
            vec![connections.to_string(), players.to_string()],
        );
        match timeout(shared.config.request_timeout, report).await {
            Ok(Ok(response)) if !response.is_success() => {
                tracing::warn!(
                    code = response.code,
                    message = %response.message,
                    "coordinator rejected census report"
                );
            }
            Ok(Ok(_)) => {
                tracing::trace!(connections, players, "census reported");
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "census report failed");
            }
            Err(_) => {
                tracing::warn!("census report timed out");
            }
        }
    }
}

/// Drains the forward queue into `Forward` requests, one at a time.
///
/// Chat is lossy across a dead link: a message that cannot be forwarded
/// is logged and dropped rather than held back, so a coordinator outage
/// never wedges local queues behind stale chat.
async fn run_forward(shared: Arc<LinkShared>, mut forward_rx: mpsc::Receiver<ChatMessage>) {
    loop {
        let message = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            received = forward_rx.recv() => match received {
                Some(message) => message,
                None => return,
            },
        };
        let encoded = match serde_json::to_string(&message) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(error = %err, "chat message failed to encode, dropped");
                continue;
            }
        };
        let send = shared.request(RequestKind::Forward, vec![encoded]);
        match timeout(shared.config.request_timeout, send).await {
            Ok(Ok(response)) if !response.is_success() => {
                tracing::warn!(
                    code = response.code,
                    message = %response.message,
                    "coordinator rejected forwarded chat"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "chat forward failed, message dropped");
            }
            Err(_) => {
                tracing::warn!("chat forward timed out, message dropped");
            }
        }
    }
}

// ===== Tests =====
