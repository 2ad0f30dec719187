//! In-process broadcast bus.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::{TransportError, TransportResult};
use crate::transport::{Broadcast, Endpoint, TransportStats};

static GLOBAL: LazyLock<LocalBus> = LazyLock::new(LocalBus::new);

#[derive(Debug)]
struct Member {
    id: u64,
    sender: UnboundedSender<Bytes>,
}

#[derive(Debug, Default)]
struct Groups {
    members: RwLock<HashMap<String, Vec<Member>>>,
    next_id: AtomicU64,
}

impl Groups {
    fn fan_out(&self, name: &str, from: u64, frame: &Bytes) -> (usize, usize) {
        let members = self.members.read();
        let Some(group) = members.get(name) else {
            return (0, 0);
        };

        let mut delivered = 0;
        let mut failed = 0;
        for member in group.iter().filter(|m| m.id != from) {
            match member.sender.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed += 1,
            }
        }
        (delivered, failed)
    }

    fn leave(&self, name: &str, id: u64) {
        let mut members = self.members.write();
        if let Some(group) = members.get_mut(name) {
            group.retain(|m| m.id != id);
            if group.is_empty() {
                members.remove(name);
            }
        }
        tracing::trace!(group = name, endpoint = id, "endpoint left");
    }
}

/// Registry of named broadcast groups living in this process.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    groups: Arc<Groups>,
}

impl LocalBus {
    /// Create an isolated bus. Endpoints on different buses never meet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Bind a new endpoint to `name`.
    pub fn connect(&self, name: &str) -> LocalEndpoint {
        let id = self.groups.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded_channel();

        self.groups
            .members
            .write()
            .entry(name.to_string())
            .or_default()
            .push(Member { id, sender });

        tracing::trace!(group = name, endpoint = id, "endpoint joined");

        LocalEndpoint {
            id,
            name: name.to_string(),
            groups: Arc::downgrade(&self.groups),
            receiver: tokio::sync::Mutex::new(receiver),
            closed: AtomicBool::new(false),
            stats: Mutex::new(TransportStats::default()),
        }
    }

    /// Number of endpoints currently bound to `name`.
    pub fn member_count(&self, name: &str) -> usize {
        self.groups
            .members
            .read()
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of groups with at least one member.
    pub fn group_count(&self) -> usize {
        self.groups.members.read().len()
    }
}

impl Broadcast for LocalBus {
    fn open(&self, name: &str) -> TransportResult<Arc<dyn Endpoint>> {
        Ok(Arc::new(self.connect(name)))
    }
}

/// Endpoint handed out by [`LocalBus`].
pub struct LocalEndpoint {
    id: u64,
    name: String,
    groups: Weak<Groups>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<Bytes>>,
    closed: AtomicBool,
    stats: Mutex<TransportStats>,
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn send(&self, frame: Bytes) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let groups = self.groups.upgrade().ok_or(TransportError::Closed)?;

        let (delivered, failed) = groups.fan_out(&self.name, self.id, &frame);

        let mut stats = self.stats.lock();
        stats.messages_sent += 1;
        stats.bytes_sent += frame.len() as u64;
        stats.send_errors += failed as u64;

        Ok(delivered)
    }

    async fn recv(&self) -> TransportResult<Bytes> {
        let mut receiver = self.receiver.lock().await;

        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let frame = receiver.recv().await.ok_or(TransportError::Closed)?;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut stats = self.stats.lock();
        stats.messages_received += 1;
        stats.bytes_received += frame.len() as u64;

        Ok(frame)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping our sender from the group wakes a pending `recv`.
        if let Some(groups) = self.groups.upgrade() {
            groups.leave(&self.name, self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn stats(&self) -> Option<TransportStats> {
        Some(self.stats.lock().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_reaches_peers_not_self() {
        let bus = LocalBus::new();
        let a = bus.connect("room");
        let b = bus.connect("room");
        let c = bus.connect("room");

        let reached = a.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(reached, 2);

        assert_eq!(b.recv().await.unwrap().as_ref(), b"hello");
        assert_eq!(c.recv().await.unwrap().as_ref(), b"hello");

        let own = tokio::time::timeout(Duration::from_millis(50), a.recv()).await;
        assert!(own.is_err(), "sender must not hear itself");
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let bus = LocalBus::new();
        let a = bus.connect("left");
        let b = bus.connect("right");

        assert_eq!(a.send(Bytes::from_static(b"x")).unwrap(), 0);

        let other = tokio::time::timeout(Duration::from_millis(50), b.recv()).await;
        assert!(other.is_err());
    }

    #[tokio::test]
    async fn test_close_wakes_receiver_and_leaves_group() {
        let bus = LocalBus::new();
        let a = Arc::new(bus.connect("room"));
        let b = bus.connect("room");
        assert_eq!(bus.member_count("room"), 2);

        let waiter = {
            let a = a.clone();
            tokio::spawn(async move { a.recv().await })
        };
        tokio::task::yield_now().await;

        a.close();
        assert_eq!(waiter.await.unwrap(), Err(TransportError::Closed));
        assert_eq!(bus.member_count("room"), 1);

        assert_eq!(b.send(Bytes::from_static(b"late")).unwrap(), 0);
        assert_eq!(a.send(Bytes::from_static(b"x")), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_close_discards_buffered_frames() {
        let bus = LocalBus::new();
        let a = bus.connect("room");
        let b = bus.connect("room");

        a.send(Bytes::from_static(b"queued")).unwrap();
        b.close();

        assert_eq!(b.recv().await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_drop_removes_empty_group() {
        let bus = LocalBus::new();
        {
            let _a = bus.connect("temp");
            assert_eq!(bus.group_count(), 1);
        }
        assert_eq!(bus.group_count(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = LocalBus::new();
        let a = bus.connect("room");
        let b = bus.connect("room");

        a.send(Bytes::from_static(b"test")).unwrap();
        b.recv().await.unwrap();

        let stats = a.stats().unwrap();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.bytes_sent, 4);

        let stats = b.stats().unwrap();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.bytes_received, 4);
    }

    #[tokio::test]
    async fn test_open_through_broadcast_trait() {
        let bus = LocalBus::new();
        let a = bus.open("room").unwrap();
        let b = bus.open("room").unwrap();
        assert_eq!(a.name(), "room");

        a.send(Bytes::from_static(b"ping")).unwrap();
        assert_eq!(b.recv().await.unwrap().as_ref(), b"ping");
    }
}
