//! Sessions: one per live connection, owning the outbound queue and the
//! liveness flag shared by the read and write pumps.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::models::Event;

pub type SessionId = Uuid;

/// Timing and sizing of the per-connection pumps.
#[derive(Debug, Clone)]
pub struct PumpSettings {
    /// Capacity of the outbound queue.
    pub outbound_queue: usize,
    /// Largest inbound message accepted from the peer.
    pub max_message_bytes: usize,
    /// Idle-read deadline, reset by every inbound frame.
    pub pong_wait: Duration,
    /// Interval between liveness pings; shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Upper bound on a single write, and on waiting for queue space when
    /// replying to the session's own request.
    pub write_wait: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            max_message_bytes: 512,
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Closing,
}

/// Why an event could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Queue full: the peer is not keeping up.
    Full,
    /// The session is closing or its writer is gone.
    Closed,
}

struct SessionInner {
    id: SessionId,
    username: String,
    outbound: mpsc::Sender<Event>,
    liveness: watch::Sender<Liveness>,
}

/// Cheap, cloneable handle to a session. The hub registry, every room the
/// session joined, and both pumps hold one.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    /// Create a session for `username`; the receiver is drained by the write pump.
    pub fn new(username: impl Into<String>, queue_capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (outbound, receiver) = mpsc::channel(queue_capacity.max(1));
        let (liveness, _) = watch::channel(Liveness::Active);
        let handle = Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                username: username.into(),
                outbound,
                liveness,
            }),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn is_closing(&self) -> bool {
        *self.inner.liveness.borrow() == Liveness::Closing
    }

    /// Queue without waiting. Used by room broadcasts so one slow peer never
    /// stalls the room.
    pub fn try_deliver(&self, event: Event) -> Result<(), DeliveryError> {
        if self.is_closing() {
            return Err(DeliveryError::Closed);
        }
        self.inner.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue, waiting at most `wait` for space. Only for replies to the
    /// session's own requests, so the only task that can stall is its reader.
    pub async fn deliver(&self, event: Event, wait: Duration) -> Result<(), DeliveryError> {
        if self.is_closing() {
            return Err(DeliveryError::Closed);
        }
        match tokio::time::timeout(wait, self.inner.outbound.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::Full),
        }
    }

    /// Move to `Closing`. Returns `true` only for the call that made the transition.
    pub fn close(&self) -> bool {
        self.inner.liveness.send_replace(Liveness::Closing) == Liveness::Active
    }

    /// Resolves once the session is closing.
    pub async fn closed(&self) {
        let mut rx = self.inner.liveness.subscribe();
        let _ = rx.wait_for(|state| *state == Liveness::Closing).await;
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("username", &self.inner.username)
            .field("closing", &self.is_closing())
            .finish()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for SessionHandle {}
