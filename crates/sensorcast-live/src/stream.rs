use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use sensorcast_core::{ConnectionId, Frame};

use crate::connection::CloseReason;
use crate::registry::ClientRegistry;

/// Receiving half of a connection, handed to the transport.
///
/// Yields frames in write order. Ends once the connection has been removed
/// and its buffered frames are drained. Dropping the stream removes the
/// connection from the registry.
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
    registry: Arc<ClientRegistry>,
    id: ConnectionId,
}

impl FrameStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Frame>,
        registry: Arc<ClientRegistry>,
        id: ConnectionId,
    ) -> Self {
        Self { rx, registry, id }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Receive the next frame; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Frames already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.registry.remove(self.id, CloseReason::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use sensorcast_core::Subscription;

    #[tokio::test]
    async fn drop_removes_connection() {
        let registry = Arc::new(ClientRegistry::default());
        let (tx, rx) = mpsc::channel(4);
        let conn = registry.register(tx, Subscription::all());
        let stream = FrameStream::new(rx, Arc::clone(&registry), conn.id());

        drop(stream);
        assert!(registry.get(conn.id()).is_none());
        assert!(!conn.is_active());
    }

    #[tokio::test]
    async fn ends_after_removal_and_drain() {
        let registry = Arc::new(ClientRegistry::default());
        let (tx, rx) = mpsc::channel(4);
        let conn = registry.register(tx, Subscription::all());
        let id = conn.id();
        let mut stream = FrameStream::new(rx, Arc::clone(&registry), id);

        conn.send(Frame::Ping).unwrap();
        registry.remove(id, CloseReason::Shutdown);
        drop(conn);

        assert_eq!(stream.next().await, Some(Frame::Ping));
        assert_eq!(stream.next().await, None);
    }
}
