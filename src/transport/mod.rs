use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::TransportResult;

pub mod local;
pub mod utils;

pub use local::LocalBus;
pub use utils::spawn_weak_loop;

/// A broadcast medium: endpoints opened with the same name hear each other.
pub trait Broadcast: Send + Sync + Debug {
    /// Bind a new endpoint to the named group.
    fn open(&self, name: &str) -> TransportResult<Arc<dyn Endpoint>>;
}

/// One binding to a named broadcast group.
#[async_trait]
pub trait Endpoint: Send + Sync + Debug {
    /// Deliver a frame to every other endpoint in the group. Returns how many were reached.
    /// The sending endpoint never receives its own frame.
    fn send(&self, frame: Bytes) -> TransportResult<usize>;

    /// Wait for the next frame from a peer. Fails with `Closed` once the endpoint is closed.
    async fn recv(&self) -> TransportResult<Bytes>;

    /// Leave the group. No frame is handed out by `recv` afterwards.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Get transport statistics
    fn stats(&self) -> Option<TransportStats> {
        None
    }

    /// Name of the group this endpoint is bound to
    fn name(&self) -> &str;
}

/// Statistics collected by endpoint implementations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
}

#[async_trait]
impl<T: Endpoint + ?Sized> Endpoint for Arc<T> {
    fn send(&self, frame: Bytes) -> TransportResult<usize> {
        (**self).send(frame)
    }

    async fn recv(&self) -> TransportResult<Bytes> {
        (**self).recv().await
    }

    fn close(&self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn stats(&self) -> Option<TransportStats> {
        (**self).stats()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: Broadcast + ?Sized> Broadcast for Arc<T> {
    fn open(&self, name: &str) -> TransportResult<Arc<dyn Endpoint>> {
        (**self).open(name)
    }
}
