//! Named channel: fire-and-forget events and request/response calls over a broadcast group.

mod pending;
mod registry;
mod response;
pub mod typed;

pub use response::AwaitResponse;
pub use typed::{AwaitSpec, EventSpec};

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

use self::pending::{PendingRequest, PendingTable};
use self::registry::{AwaitHandler, EventListener, HandlerRegistry};
use crate::codec::{Codec, JsonCodec};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::message::Message;
use crate::message::types::{RequestId, ResponseFault};
use crate::transport::{Broadcast, Endpoint, LocalBus, TransportStats, spawn_weak_loop};

/// Counters kept by a channel instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub events_sent: u64,
    pub events_received: u64,
    pub requests_sent: u64,
    pub requests_received: u64,
    pub responses_sent: u64,
    pub timeouts: u64,
    pub unhandled_requests: u64,
    pub protocol_errors: u64,
    pub listener_panics: u64,
    pub transport: Option<TransportStats>,
}

/// Where a request came from, and so where its answer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Peer,
}

struct Inner<C: Codec> {
    name: String,
    config: ChannelConfig,
    codec: C,
    endpoint: Arc<dyn Endpoint>,
    runtime: Handle,
    registry: Mutex<HandlerRegistry>,
    pending: Mutex<PendingTable>,
    destroyed: AtomicBool,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<ChannelStats>,
}

/// One endpoint of a named broadcast channel.
///
/// Instances created with the same name see each other's events and requests; instances with
/// different names are isolated. Clones share the same instance. The instance is torn down by
/// [`Channel::destroy`] or when the last clone is dropped; handlers that capture a clone keep it
/// alive until `destroy` is called.
pub struct Channel<C: Codec = JsonCodec> {
    inner: Arc<Inner<C>>,
}

impl Channel<JsonCodec> {
    /// Open `name` on the process-wide bus with the default configuration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(name: &str) -> Result<Self> {
        Self::with_config(name, ChannelConfig::default())
    }

    pub fn with_config(name: &str, config: ChannelConfig) -> Result<Self> {
        Self::open(&LocalBus::global(), name, config)
    }

    /// Open `name` on an explicit broadcast medium.
    pub fn open(transport: &dyn Broadcast, name: &str, config: ChannelConfig) -> Result<Self> {
        Self::open_with_codec(transport, name, config, JsonCodec)
    }
}

impl<C: Codec> Channel<C> {
    pub fn open_with_codec(
        transport: &dyn Broadcast,
        name: &str,
        config: ChannelConfig,
        codec: C,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| ChannelError::Runtime(e.to_string()))?;
        let endpoint = transport.open(name)?;

        let inner = Arc::new(Inner {
            name: name.to_string(),
            config,
            codec,
            endpoint: endpoint.clone(),
            runtime: runtime.clone(),
            registry: Mutex::new(HandlerRegistry::default()),
            pending: Mutex::new(PendingTable::default()),
            destroyed: AtomicBool::new(false),
            receive_task: Mutex::new(None),
            stats: Mutex::new(ChannelStats::default()),
        });

        let task = spawn_weak_loop(&runtime, Arc::downgrade(&inner), endpoint, |inner, frame| {
            inner.receive(frame)
        });
        *inner.receive_task.lock() = Some(task);

        tracing::debug!(channel = name, "channel opened");
        Ok(Self { inner })
    }

    /// Register a listener for `action`. Every listener runs on every matching event, in
    /// registration order. Payloads that do not decode as `P` are logged and skipped.
    pub fn on_event<P, F>(&self, action: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        let action = action.into();
        if self.is_destroyed() {
            tracing::debug!(channel = %self.inner.name, %action, "listener ignored after destroy");
            return;
        }

        let label = action.clone();
        let listener: EventListener = Arc::new(move |payload: &Value| {
            match P::deserialize(payload) {
                Ok(payload) => handler(payload),
                Err(e) => tracing::warn!(
                    action = %label,
                    error = %e,
                    "event payload does not match listener type"
                ),
            }
        });

        self.inner.registry.lock().add_listener(action, listener);
    }

    /// Register the await handler for `action`, silently replacing any previous one.
    pub fn on_await<P, R, E, F, Fut>(&self, action: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let action = action.into();
        if self.is_destroyed() {
            tracing::debug!(channel = %self.inner.name, %action, "handler ignored after destroy");
            return;
        }

        let handler: AwaitHandler = Arc::new(move |payload: Value| {
            let call = serde_json::from_value::<P>(payload).map(&handler);
            async move {
                let output = call
                    .map_err(|e| format!("Invalid payload: {}", e))?
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::to_value(output).map_err(|e| format!("Invalid result: {}", e))
            }
            .boxed()
        });

        let replaced = self
            .inner
            .registry
            .lock()
            .set_await_handler(action.clone(), handler);
        if replaced {
            tracing::debug!(channel = %self.inner.name, %action, "await handler replaced");
        }
    }

    /// Run the local listeners for `action`, then broadcast the event to every peer.
    ///
    /// Local listeners have all run when this returns. Listener failures are logged, never
    /// returned; errors only come from encoding `payload` or using a destroyed channel.
    pub fn send_event<P: Serialize + ?Sized>(&self, action: &str, payload: &P) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        self.inner.send_event(action, payload)
    }

    /// Issue a request with the configured timeout.
    pub fn send_await<P, R>(&self, action: &str, payload: &P) -> AwaitResponse<R>
    where
        P: Serialize + ?Sized,
    {
        self.send_await_with_timeout(action, payload, self.inner.config.request_timeout)
    }

    /// Issue a request that fails with [`ChannelError::Timeout`] if no answer arrives in time.
    ///
    /// The request is registered and broadcast before this returns.
    pub fn send_await_with_timeout<P, R>(
        &self,
        action: &str,
        payload: &P,
        timeout: Duration,
    ) -> AwaitResponse<R>
    where
        P: Serialize + ?Sized,
    {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => return AwaitResponse::failed(e.into()),
        };

        match self.inner.begin_request(action, payload, timeout) {
            Ok((request_id, reply)) => AwaitResponse::waiting(request_id, reply),
            Err(e) => AwaitResponse::failed(e),
        }
    }

    /// Leave the broadcast group, fail every outstanding request with [`ChannelError::Closed`]
    /// and drop all handlers. Calling it again is a no-op.
    pub fn destroy(&self) {
        self.inner.teardown();
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Requests issued by this instance still waiting for an answer.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn listener_count(&self, action: &str) -> usize {
        self.inner.registry.lock().listener_count(action)
    }

    pub fn has_await_handler(&self, action: &str) -> bool {
        self.inner.registry.lock().await_handler(action).is_some()
    }

    pub fn stats(&self) -> ChannelStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.transport = self.inner.endpoint.stats();
        stats
    }
}

impl<C: Codec> Inner<C> {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn send_event(&self, action: &str, payload: Value) -> Result<()> {
        if self.is_destroyed() {
            return Err(ChannelError::Closed);
        }

        // The transport never echoes our own broadcast, so local listeners run here.
        self.dispatch_event(action, &payload);

        let frame = Message::event(action, payload).encode(&self.codec)?;
        let peers = self.endpoint.send(frame)?;
        self.stats.lock().events_sent += 1;

        tracing::trace!(channel = %self.name, action, peers, "event sent");
        Ok(())
    }

    fn begin_request(
        self: &Arc<Self>,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<(RequestId, oneshot::Receiver<Result<Value>>)> {
        if self.is_destroyed() {
            return Err(ChannelError::Closed);
        }

        let (reply, receiver) = oneshot::channel();
        let local_payload = self.config.self_delivery.then(|| payload.clone());

        let request_id = {
            let mut pending = self.pending.lock();
            let request_id = loop {
                let id = RequestId::generate();
                if !pending.contains(&id) {
                    break id;
                }
            };

            let frame =
                Message::request(request_id.clone(), action, payload).encode(&self.codec)?;
            let peers = self.endpoint.send(frame)?;
            let reach = peers + usize::from(local_payload.is_some());

            pending.insert(request_id.clone(), PendingRequest::new(action, reply, reach));
            let timer = self.schedule_timeout(request_id.clone(), action, timeout);
            pending.set_timer(&request_id, timer);

            tracing::debug!(channel = %self.name, action, %request_id, peers, "request sent");
            request_id
        };
        self.stats.lock().requests_sent += 1;

        if let Some(payload) = local_payload {
            let dispatched =
                self.handle_request(request_id.clone(), action.to_string(), payload, Origin::Local);
            if let Err(e) = dispatched {
                tracing::debug!(channel = %self.name, %request_id, error = %e, "not handled locally");
            }
        }

        Ok((request_id, receiver))
    }

    fn schedule_timeout(
        self: &Arc<Self>,
        request_id: RequestId,
        action: &str,
        timeout: Duration,
    ) -> AbortHandle {
        let owner = Arc::downgrade(self);
        let action = action.to_string();

        self.runtime
            .spawn(async move {
                tokio::time::sleep(timeout).await;

                let Some(inner) = owner.upgrade() else {
                    return;
                };
                let expired = inner.pending.lock().take(&request_id);
                if let Some(entry) = expired {
                    inner.stats.lock().timeouts += 1;
                    tracing::debug!(channel = %inner.name, %action, %request_id, "request timed out");
                    entry.fail(ChannelError::Timeout {
                        action,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            })
            .abort_handle()
    }

    fn receive(self: &Arc<Self>, frame: Bytes) {
        if self.is_destroyed() {
            return;
        }

        if let Err(e) = self.dispatch(&frame) {
            if let ChannelError::Protocol(_) = e {
                self.stats.lock().protocol_errors += 1;
                tracing::warn!(channel = %self.name, error = %e, "dropping malformed message");
            } else {
                tracing::warn!(channel = %self.name, error = %e, "message dispatch failed");
            }
        }
    }

    fn dispatch(self: &Arc<Self>, frame: &[u8]) -> Result<()> {
        match Message::decode(&self.codec, frame)? {
            Message::Event { action, payload } => {
                self.stats.lock().events_received += 1;
                self.dispatch_event(&action, &payload);
                Ok(())
            }
            Message::Request {
                request_id,
                action,
                payload,
            } => {
                self.stats.lock().requests_received += 1;
                self.handle_request(request_id, action, payload, Origin::Peer)
            }
            Message::Response {
                request_id,
                result,
                error,
            } => {
                self.handle_response(request_id, result, error);
                Ok(())
            }
        }
    }

    fn dispatch_event(&self, action: &str, payload: &Value) {
        let listeners = self.registry.lock().listeners(action);

        for listener in listeners {
            // destroy() may land on another thread while an earlier listener runs.
            if self.is_destroyed() {
                tracing::debug!(channel = %self.name, action, "dispatch stopped by destroy");
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(payload)));
            if let Err(panic) = outcome {
                self.stats.lock().listener_panics += 1;
                tracing::error!(
                    channel = %self.name,
                    action,
                    panic = %panic_message(panic.as_ref()),
                    "event listener panicked"
                );
            }
        }
    }

    /// Run the await handler for a request, or answer `unhandled` and raise the fault here.
    fn handle_request(
        self: &Arc<Self>,
        request_id: RequestId,
        action: String,
        payload: Value,
        origin: Origin,
    ) -> Result<()> {
        let handler = self.registry.lock().await_handler(&action);
        let Some(handler) = handler else {
            self.stats.lock().unhandled_requests += 1;
            self.answer(origin, Message::fault(request_id, ResponseFault::Unhandled));
            return Err(ChannelError::UnhandledAction { action });
        };

        let owner = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let reply = match run_handler(&handler, payload).await {
                Ok(result) => Message::reply(request_id, result),
                Err(message) => {
                    tracing::error!(%action, %request_id, error = %message, "await handler failed");
                    Message::fault(request_id, ResponseFault::Handler { message })
                }
            };

            if let Some(inner) = owner.upgrade() {
                inner.answer(origin, reply);
            }
        });

        Ok(())
    }

    fn answer(&self, origin: Origin, reply: Message) {
        match origin {
            Origin::Local => {
                if let Message::Response {
                    request_id,
                    result,
                    error,
                } = reply
                {
                    self.handle_response(request_id, result, error);
                }
            }
            Origin::Peer => {
                if self.is_destroyed() {
                    return;
                }
                let sent = reply
                    .encode(&self.codec)
                    .and_then(|frame| Ok(self.endpoint.send(frame)?));
                match sent {
                    Ok(_) => self.stats.lock().responses_sent += 1,
                    Err(e) => {
                        tracing::debug!(channel = %self.name, error = %e, "response not sent")
                    }
                }
            }
        }
    }

    fn handle_response(
        &self,
        request_id: RequestId,
        result: Option<Value>,
        error: Option<ResponseFault>,
    ) {
        match error {
            Some(ResponseFault::Unhandled) => {
                let exhausted = self.pending.lock().mark_unhandled(&request_id);
                if let Some(entry) = exhausted {
                    let action = entry.action.clone();
                    tracing::debug!(channel = %self.name, %action, %request_id, "no handler reached");
                    entry.fail(ChannelError::UnhandledAction { action });
                }
            }
            Some(ResponseFault::Handler { message }) => {
                let answered = self.pending.lock().take(&request_id);
                if let Some(entry) = answered {
                    let action = entry.action.clone();
                    entry.fail(ChannelError::Handler { action, message });
                }
            }
            None => {
                // Responses to other instances' requests land here too and find nothing.
                let answered = self.pending.lock().take(&request_id);
                if let Some(entry) = answered {
                    entry.resolve(result.unwrap_or(Value::Null));
                }
            }
        }
    }

    fn teardown(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.endpoint.close();
        if let Some(task) = self.receive_task.lock().take() {
            task.abort();
        }

        let orphaned = self.pending.lock().drain();
        let rejected = orphaned.len();
        for entry in orphaned {
            entry.fail(ChannelError::Closed);
        }

        // Handlers may own channel clones; drop them outside the lock.
        let registry = std::mem::take(&mut *self.registry.lock());
        drop(registry);

        tracing::debug!(channel = %self.name, rejected, "channel destroyed");
    }
}

impl<C: Codec> Drop for Inner<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_handler(handler: &AwaitHandler, payload: Value) -> std::result::Result<Value, String> {
    let future = panic::catch_unwind(AssertUnwindSafe(|| handler(payload)))
        .map_err(|panic| format!("Handler panicked: {}", panic_message(panic.as_ref())))?;

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(format!("Handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<C: Codec> Clone for Channel<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("destroyed", &self.is_destroyed())
            .field("pending_requests", &self.pending_requests())
            .field("codec", &self.inner.codec)
            .finish()
    }
}
