use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sensorcast_core::{ConnectionId, Frame, Subscription};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closed,
}

/// Why a write into a connection's sink did not land.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,
    #[error("sink buffer full")]
    Full,
}

/// Why a connection left the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The observer went away (stream dropped) or asked to be removed.
    Disconnected,
    /// A write found the sink closed.
    SinkClosed,
    /// A write found the sink buffer full.
    SinkFull,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::SinkClosed => "sink_closed",
            Self::SinkFull => "sink_full",
            Self::Shutdown => "shutdown",
        }
    }

    /// Closes forced by a failed write rather than by the observer or
    /// the process.
    pub fn is_eviction(self) -> bool {
        matches!(self, Self::SinkClosed | Self::SinkFull)
    }
}

impl From<SinkError> for CloseReason {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Closed => Self::SinkClosed,
            SinkError::Full => Self::SinkFull,
        }
    }
}

/// One observer's outbound channel plus its fixed subscription.
pub struct Connection {
    id: ConnectionId,
    subscription: Subscription,
    sink: mpsc::Sender<Frame>,
    closed: AtomicBool,
    cancel: CancellationToken,
    delivered: AtomicU64,
    dropped: AtomicU64,
    opened_at: Instant,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        sink: mpsc::Sender<Frame>,
        subscription: Subscription,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            subscription,
            sink,
            closed: AtomicBool::new(false),
            cancel,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            ConnectionState::Closed
        } else {
            ConnectionState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Cancelled when the connection closes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Non-blocking write. Never waits on a slow reader.
    pub fn send(&self, frame: Frame) -> Result<(), SinkError> {
        if !self.is_active() {
            return Err(SinkError::Closed);
        }
        match self.sink.try_send(frame) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Closed)
            }
        }
    }

    /// Transition to `Closed`. Returns `true` only for the call that
    /// performed the transition.
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.cancel.cancel();
        }
        first
    }

    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("sensors", &self.subscription.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(capacity: usize) -> (Connection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(
            ConnectionId::new(1),
            tx,
            Subscription::all(),
            CancellationToken::new(),
        );
        (conn, rx)
    }

    #[test]
    fn send_delivers_and_counts() {
        let (conn, mut rx) = make(4);
        conn.send(Frame::Ping).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Frame::Ping);
        assert_eq!(conn.frames_delivered(), 1);
    }

    #[test]
    fn full_buffer_reports_full() {
        let (conn, _rx) = make(1);
        conn.send(Frame::Ping).unwrap();
        assert_eq!(conn.send(Frame::Ping), Err(SinkError::Full));
        assert_eq!(conn.frames_dropped(), 1);
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (conn, rx) = make(4);
        drop(rx);
        assert_eq!(conn.send(Frame::Ping), Err(SinkError::Closed));
    }

    #[test]
    fn close_is_one_shot_and_cancels() {
        let (conn, _rx) = make(4);
        assert!(conn.is_active());
        assert!(conn.close());
        assert!(!conn.close());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.cancel_token().is_cancelled());
    }

    #[test]
    fn closed_connection_rejects_writes() {
        let (conn, mut rx) = make(4);
        conn.close();
        assert_eq!(conn.send(Frame::Ping), Err(SinkError::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_reason_mapping() {
        assert_eq!(CloseReason::from(SinkError::Full), CloseReason::SinkFull);
        assert!(CloseReason::SinkClosed.is_eviction());
        assert!(!CloseReason::Disconnected.is_eviction());
        assert_eq!(CloseReason::Shutdown.as_str(), "shutdown");
    }
}
