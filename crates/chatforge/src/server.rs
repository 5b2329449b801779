//! The chat node itself: builder, accept loop, per-connection tasks,
//! and the background sweep and status tasks.
//!
//! This ties the layers together: framing from the protocol crate, the
//! per-socket queues and registry from the connection crate, the player
//! directory, the coordinator link, and the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use chatforge_connection::{Connection, ConnectionRegistry, run_drain};
use chatforge_directory::{PlayerDirectory, Topology};
use chatforge_protocol::frame;
use chatforge_uplink::{CenterLink, Census, UplinkConfig};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collab::{GameVerifier, PlayerStore, WordFilter};
use crate::config::ServerConfig;
use crate::dispatch;
use crate::error::ChatforgeError;
use crate::push::PushRouter;

// ---------------------------------------------------------------------------
// ServerState
// ---------------------------------------------------------------------------

/// Shared state handed to every task the server spawns.
///
/// Wrapped in `Arc`; the registry, directory, topology, and word filter
/// get their own `Arc`s because the push router holds them too.
pub(crate) struct ServerState<S: PlayerStore, V: GameVerifier, W: WordFilter, T: Topology> {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) directory: Arc<PlayerDirectory>,
    pub(crate) topology: Arc<T>,
    pub(crate) store: S,
    pub(crate) verifier: V,
    pub(crate) words: Arc<W>,
    pub(crate) link: CenterLink,
}

impl<S, V, W, T> ServerState<S, V, W, T>
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    /// Tears down one client connection and its session.
    pub(crate) fn disconnect(&self, conn: &Arc<Connection>) {
        disconnect_client(&self.registry, &self.directory, conn);
    }
}

/// Unbinds, unregisters, and closes one client connection.
///
/// The directory record is only dropped while it still points at this
/// connection; a session that already moved to a newer connection
/// (device takeover) survives its predecessor's teardown.
pub(crate) fn disconnect_client(
    registry: &ConnectionRegistry,
    directory: &PlayerDirectory,
    conn: &Arc<Connection>,
) {
    if let Some(player_id) = conn.take_player() {
        if let Some(record) = directory.get(&player_id) {
            if record.connection == Some(conn.id()) {
                directory.unregister(&player_id);
            }
        }
    }
    conn.force_close();
    registry.unregister(conn.id());
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a chat node.
///
/// # Example
///
/// ```rust,ignore
/// let server = ChatServer::builder()
///     .bind("0.0.0.0:9000")
///     .config(config)
///     .uplink(uplink)
///     .build(store, verifier, words, topology)
///     .await?;
/// server.run().await;
/// ```
pub struct ChatServerBuilder {
    listen_addr: String,
    config: ServerConfig,
    uplink: UplinkConfig,
    topology_changes: Option<watch::Receiver<()>>,
}

impl ChatServerBuilder {
    pub fn new() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".to_owned(),
            config: ServerConfig::default(),
            uplink: UplinkConfig::default(),
            topology_changes: None,
        }
    }

    /// Sets the address the client listener binds.
    pub fn bind(mut self, addr: &str) -> Self {
        self.listen_addr = addr.to_owned();
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn uplink(mut self, config: UplinkConfig) -> Self {
        self.uplink = config;
        self
    }

    /// Subscribes the node to topology changes. On every change the
    /// directory grows rosters for newly announced groups; existing
    /// rosters are left alone.
    pub fn topology_changes(mut self, changes: watch::Receiver<()>) -> Self {
        self.topology_changes = Some(changes);
        self
    }

    /// Connects the coordinator link, binds the client listener, and
    /// returns the ready-to-run server.
    ///
    /// Both steps are fatal on failure: a node that cannot reach its
    /// coordinator or open its listener is misconfigured.
    pub async fn build<S, V, W, T>(
        self,
        store: S,
        verifier: V,
        words: W,
        topology: T,
    ) -> Result<ChatServer<S, V, W, T>, ChatforgeError>
    where
        S: PlayerStore,
        V: GameVerifier,
        W: WordFilter,
        T: Topology,
    {
        let registry = Arc::new(ConnectionRegistry::new());
        let directory = Arc::new(PlayerDirectory::new());
        let topology = Arc::new(topology);
        let words = Arc::new(words);
        directory.ensure_groups(&topology.group_ids());

        let census = Arc::new(ServerCensus {
            registry: Arc::clone(&registry),
            directory: Arc::clone(&directory),
        });
        let router = Arc::new(PushRouter::new(
            Arc::clone(&registry),
            Arc::clone(&directory),
            Arc::clone(&topology),
            Arc::clone(&words),
            self.config.kick_delay,
        ));
        let link = CenterLink::connect(self.uplink, router, census).await?;

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|source| ChatforgeError::Bind {
                addr: self.listen_addr.clone(),
                source,
            })?;

        Ok(ChatServer {
            listener,
            state: Arc::new(ServerState {
                config: self.config,
                registry,
                directory,
                topology,
                store,
                verifier,
                words,
                link,
            }),
            cancel: CancellationToken::new(),
            topology_changes: self.topology_changes,
        })
    }
}

impl Default for ChatServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ChatServer
// ---------------------------------------------------------------------------

/// A running chat node. Call [`run`](Self::run) to start accepting
/// clients.
pub struct ChatServer<S: PlayerStore, V: GameVerifier, W: WordFilter, T: Topology> {
    listener: TcpListener,
    state: Arc<ServerState<S, V, W, T>>,
    cancel: CancellationToken,
    topology_changes: Option<watch::Receiver<()>>,
}

impl<S, V, W, T> ChatServer<S, V, W, T>
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    pub fn builder() -> ChatServerBuilder {
        ChatServerBuilder::new()
    }

    /// The address the listener actually bound, for `bind("...:0")`.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A token that stops the server when cancelled. Clone it before
    /// calling [`run`](Self::run).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the accept loop until the shutdown token fires, then closes
    /// every client connection and the coordinator link.
    pub async fn run(self) {
        info!(addr = ?self.listener.local_addr().ok(), "chat node accepting clients");

        tokio::spawn(run_sweep(
            Arc::clone(&self.state),
            self.cancel.child_token(),
        ));
        tokio::spawn(run_status(
            Arc::clone(&self.state),
            self.cancel.child_token(),
        ));
        if let Some(changes) = self.topology_changes {
            tokio::spawn(run_topology_watch(
                Arc::clone(&self.state),
                changes,
                self.cancel.child_token(),
            ));
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => accept_client(&self.state, stream, peer),
                    Err(err) => error!(error = %err, "accept failed"),
                },
            }
        }

        info!("chat node shutting down");
        self.state.link.shutdown();
        for conn in self.state.registry.all() {
            self.state.disconnect(&conn);
        }
    }
}

/// Registers a fresh connection and spawns its read and drain tasks.
fn accept_client<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    stream: TcpStream,
    peer: SocketAddr,
) where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    // Chat frames are small; waiting to coalesce them only adds latency.
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%peer, error = %err, "set_nodelay failed");
    }
    let (reader, writer) = stream.into_split();

    let conn = Arc::new(Connection::new(peer));
    state.registry.register(Arc::clone(&conn));
    debug!(conn = %conn.id(), %peer, "client connected");

    let drain_conn = Arc::clone(&conn);
    tokio::spawn(async move {
        if let Err(err) = run_drain(drain_conn, writer).await {
            debug!(error = %err, "client drain ended with error");
        }
    });

    let state = Arc::clone(state);
    tokio::spawn(handle_client(state, conn, reader));
}

/// Reads frames until the peer hangs up, the frame stream breaks, or
/// the connection is closed from elsewhere (kick, sweep, shutdown).
async fn handle_client<S, V, W, T>(
    state: Arc<ServerState<S, V, W, T>>,
    conn: Arc<Connection>,
    mut reader: OwnedReadHalf,
) where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    let mut buf = BytesMut::with_capacity(4 * 1024);

    loop {
        tokio::select! {
            _ = conn.closed() => break,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!(conn = %conn.id(), "client hung up");
                    break;
                }
                Ok(_) => {
                    if !drain_inbound(&state, &conn, &mut buf).await {
                        break;
                    }
                }
                Err(err) => {
                    debug!(conn = %conn.id(), error = %err, "client read failed");
                    break;
                }
            },
        }
    }

    state.disconnect(&conn);
    debug!(conn = %conn.id(), "client disconnected");
}

/// Dispatches every complete frame sitting in `buf`. Returns `false`
/// when the stream is broken and the connection has to go.
async fn drain_inbound<S, V, W, T>(
    state: &Arc<ServerState<S, V, W, T>>,
    conn: &Arc<Connection>,
    buf: &mut BytesMut,
) -> bool
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    loop {
        match frame::split_frame(buf) {
            Ok(Some(payload)) => {
                conn.touch();
                if payload.is_empty() {
                    debug!(conn = %conn.id(), "client heartbeat");
                    continue;
                }
                dispatch::handle_payload(state, conn, &payload).await;
            }
            Ok(None) => return true,
            Err(err) => {
                warn!(conn = %conn.id(), error = %err, "broken frame stream, dropping client");
                return false;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Periodically drops connections that have gone quiet. Logged-in
/// sessions die with their connection.
async fn run_sweep<S, V, W, T>(state: Arc<ServerState<S, V, W, T>>, cancel: CancellationToken)
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(state.config.sweep_interval) => {}
        }

        let expired = state
            .registry
            .expired(Instant::now(), state.config.idle_timeout);
        if expired.is_empty() {
            continue;
        }
        for conn in &expired {
            debug!(conn = %conn.id(), peer = %conn.peer(), "dropping idle connection");
            state.disconnect(conn);
        }
        info!(
            reaped = expired.len(),
            connections = state.registry.len(),
            players = state.directory.player_count(),
            "idle sweep finished"
        );
    }
}

/// Logs the node's vitals on a fixed interval.
async fn run_status<S, V, W, T>(state: Arc<ServerState<S, V, W, T>>, cancel: CancellationToken)
where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(state.config.status_interval) => {}
        }
        info!(
            connections = state.registry.len(),
            players = state.directory.player_count(),
            uplink = ?state.link.state(),
            "node status"
        );
    }
}

/// Grows rosters for server groups announced after startup.
async fn run_topology_watch<S, V, W, T>(
    state: Arc<ServerState<S, V, W, T>>,
    mut changes: watch::Receiver<()>,
    cancel: CancellationToken,
) where
    S: PlayerStore,
    V: GameVerifier,
    W: WordFilter,
    T: Topology,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = changes.changed() => {
                if changed.is_err() {
                    // Sender gone; the topology is frozen from here on.
                    return;
                }
                let groups = state.topology.group_ids();
                state.directory.ensure_groups(&groups);
                info!(groups = groups.len(), "topology change applied");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Census
// ---------------------------------------------------------------------------

/// The uplink's view of this node's load.
struct ServerCensus {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<PlayerDirectory>,
}

impl Census for ServerCensus {
    fn connection_count(&self) -> usize {
        self.registry.len()
    }

    fn player_count(&self) -> usize {
        self.directory.player_count()
    }
}

// =========================================================================
// Tests
// =========================================================================
