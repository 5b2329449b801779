//! Per-connection state and the outbound drain loop.
//!
//! Each accepted socket gets one [`Connection`], shared between exactly
//! two tasks: a read task (owned by the server layer) that feeds inbound
//! frames to the dispatcher, and a drain task ([`run_drain`]) that owns
//! the write half and empties the two outbound queues.
//!
//! The queues give server-initiated traffic priority over bulk chat:
//! every queued [`Priority::High`] payload is written before at most one
//! [`Priority::Low`] payload per loop iteration, so a burst of world
//! chat can never starve a kick notice, but low traffic still moves
//! while high traffic flows.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use chatforge_protocol::{PlayerId, frame};

use crate::{ConnectionError, ConnectionId};

/// How long the drain loop parks when both queues are empty. Enqueues
/// wake it early; the park only bounds the wait for state changes.
const DRAIN_PARK: Duration = Duration::from_millis(5);

/// Socket writes slower than this are logged; they mean the peer has
/// stopped reading or the network is in trouble.
const SLOW_SEND: Duration = Duration::from_secs(3);

/// Which outbound queue a payload joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Command replies and server notices (kick, forbid, incoming chat).
    High,
    /// Bulk traffic that may wait behind notices.
    Low,
}

/// Connection lifecycle.
///
/// ```text
///            request_close()            queues drained
///   Open ──────────────────► WaitForClose ──────────► Closed
///     │                                                 ▲
///     └────────── force_close() / write error ──────────┘
/// ```
///
/// `WaitForClose` exists so a farewell reply can still flush: the drain
/// loop keeps writing until both queues are empty, then closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    WaitForClose,
    Closed,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnState::Open => "open",
            ConnState::WaitForClose => "wait-for-close",
            ConnState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct Queues {
    high: VecDeque<Bytes>,
    low: VecDeque<Bytes>,
}

/// One client connection.
///
/// All methods take `&self`; internal mutexes are held only for queue
/// and field access, never across an await.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: Mutex<ConnState>,
    queues: Mutex<Queues>,
    /// Wakes a parked drain loop after an enqueue or state change.
    wake: Notify,
    /// Cancelled exactly once, when the state reaches `Closed`; the read
    /// task selects on this to stop promptly instead of waiting for EOF.
    cancel: CancellationToken,
    last_activity: Mutex<Instant>,
    player: Mutex<Option<PlayerId>>,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Connection {
            id: ConnectionId::next(),
            peer,
            state: Mutex::new(ConnState::Open),
            queues: Mutex::new(Queues::default()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            last_activity: Mutex::new(Instant::now()),
            player: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnState::Closed
    }

    /// Queues `payload` for sending. Payloads enqueued after the
    /// connection closed are dropped.
    pub fn enqueue(&self, priority: Priority, payload: Bytes) {
        if self.is_closed() {
            tracing::trace!(id = %self.id, "dropping payload for closed connection");
            return;
        }
        {
            let mut queues = self.queues.lock().unwrap();
            match priority {
                Priority::High => queues.high.push_back(payload),
                Priority::Low => queues.low.push_back(payload),
            }
        }
        self.wake.notify_one();
    }

    pub(crate) fn pop_high(&self) -> Option<Bytes> {
        self.queues.lock().unwrap().high.pop_front()
    }

    pub(crate) fn pop_low(&self) -> Option<Bytes> {
        self.queues.lock().unwrap().low.pop_front()
    }

    /// Asks the drain loop to flush both queues and then close.
    pub fn request_close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ConnState::Open {
                return;
            }
            *state = ConnState::WaitForClose;
        }
        self.wake.notify_one();
    }

    /// Closes immediately; queued payloads are abandoned.
    pub fn force_close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ConnState::Closed {
                return;
            }
            *state = ConnState::Closed;
        }
        self.cancel.cancel();
        self.wake.notify_one();
    }

    /// Resolves once the connection reaches `Closed`.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Refreshes the activity clock. Called for every inbound frame,
    /// heartbeats included.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// True once the peer has been silent for longer than `timeout`.
    pub fn has_expired(&self, now: Instant, timeout: Duration) -> bool {
        let last = *self.last_activity.lock().unwrap();
        now.saturating_duration_since(last) > timeout
    }

    /// Binds the logged-in player, returning the previous binding.
    pub fn bind_player(&self, player_id: PlayerId) -> Option<PlayerId> {
        self.player.lock().unwrap().replace(player_id)
    }

    pub fn player(&self) -> Option<PlayerId> {
        self.player.lock().unwrap().clone()
    }

    /// Clears and returns the player binding; used during teardown.
    pub fn take_player(&self) -> Option<PlayerId> {
        self.player.lock().unwrap().take()
    }

    /// Backdates the activity clock so expiry paths can be tested
    /// without sleeping.
    #[cfg(test)]
    pub(crate) fn rewind_activity(&self, by: Duration) {
        let mut last = self.last_activity.lock().unwrap();
        *last = last.checked_sub(by).expect("system uptime shorter than rewind");
    }
}

// ---------------------------------------------------------------------------
// Drain loop
// ---------------------------------------------------------------------------

/// Runs the outbound side of one connection until it closes.
///
/// Per iteration: write every queued High payload, then at most one Low
/// payload. When nothing was written, an open connection parks briefly
/// (woken early by enqueues) and a `WaitForClose` connection completes
/// its close. Write errors force-close and surface to the caller.
pub async fn run_drain<W>(
    conn: std::sync::Arc<Connection>,
    mut writer: W,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let mut sent = false;

        while let Some(payload) = conn.pop_high() {
            write_frame(&conn, &mut writer, &payload).await?;
            sent = true;
        }
        if let Some(payload) = conn.pop_low() {
            write_frame(&conn, &mut writer, &payload).await?;
            sent = true;
        }

        if sent {
            if conn.is_closed() {
                break;
            }
            continue;
        }

        match conn.state() {
            ConnState::Closed => break,
            ConnState::WaitForClose => {
                tracing::debug!(id = %conn.id(), "queues drained, completing close");
                conn.force_close();
                break;
            }
            ConnState::Open => {
                tokio::select! {
                    _ = conn.wake.notified() => {}
                    _ = tokio::time::sleep(DRAIN_PARK) => {}
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_frame<W>(
    conn: &Connection,
    writer: &mut W,
    payload: &Bytes,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin + Send,
{
    let encoded = frame::encode_frame(payload);
    let started = Instant::now();
    let result = async {
        writer.write_all(&encoded).await?;
        writer.flush().await
    }
    .await;

    match result {
        Ok(()) => {
            let elapsed = started.elapsed();
            if elapsed > SLOW_SEND {
                tracing::warn!(
                    id = %conn.id(),
                    ?elapsed,
                    bytes = encoded.len(),
                    "slow send to client"
                );
            }
            Ok(())
        }
        Err(e) => {
            conn.force_close();
            Err(ConnectionError::SendFailed(e))
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
