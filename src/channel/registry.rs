//! Local handler registry.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type AwaitHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, String>> + Send + Sync>;

/// Event listeners (many per action, in registration order) and await handlers (one per action).
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    listeners: HashMap<String, Vec<EventListener>>,
    await_handlers: HashMap<String, AwaitHandler>,
}

impl HandlerRegistry {
    pub fn add_listener(&mut self, action: String, listener: EventListener) {
        self.listeners.entry(action).or_default().push(listener);
    }

    /// Snapshot of the listeners for `action`, so they can run without the registry locked.
    pub fn listeners(&self, action: &str) -> Vec<EventListener> {
        self.listeners.get(action).cloned().unwrap_or_default()
    }

    pub fn listener_count(&self, action: &str) -> usize {
        self.listeners.get(action).map(Vec::len).unwrap_or(0)
    }

    /// Returns true if a previous handler was replaced.
    pub fn set_await_handler(&mut self, action: String, handler: AwaitHandler) -> bool {
        self.await_handlers.insert(action, handler).is_some()
    }

    pub fn await_handler(&self, action: &str) -> Option<AwaitHandler> {
        self.await_handlers.get(action).cloned()
    }
}
