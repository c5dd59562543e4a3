use std::sync::Arc;

use crate::error::CohortTransportError;
use crate::frame::Frame;
use crate::Entity;

/// One authenticated full-duplex stream to a peer.
///
/// Implementations guarantee ordered, reliable delivery of frames and
/// report termination through the two disconnect error kinds:
/// [`CohortTransportError::Closed`] when the local side closed,
/// [`CohortTransportError::Eof`] when the peer finished cleanly.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    /// The authenticated identity of the remote peer.
    fn peer(&self) -> &Entity;

    /// Queue a frame for delivery to the peer.
    async fn send(&self, frame: Frame) -> Result<(), CohortTransportError>;

    /// Wait for the next frame from the peer.
    async fn recv(&self) -> Result<Frame, CohortTransportError>;

    /// Close both directions. Blocked receivers on either side wake up.
    async fn close(&self);
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", self.peer()).finish()
    }
}

/// A transport endpoint bound to one entity.
///
/// In production this is the secure network transport; in tests it is
/// [`crate::LocalTransport`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The identity this endpoint is bound to.
    fn entity(&self) -> &Entity;

    /// Open an authenticated connection to `remote`.
    async fn open(&self, remote: &Entity) -> Result<Arc<dyn Connection>, CohortTransportError>;

    /// Wait for the next inbound connection.
    ///
    /// Returns [`CohortTransportError::Closed`] once the endpoint is
    /// closed.
    async fn accept(&self) -> Result<Arc<dyn Connection>, CohortTransportError>;

    /// Stop accepting and release the endpoint's address.
    async fn close(&self);
}
