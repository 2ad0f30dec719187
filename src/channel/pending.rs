//! Table of requests issued by this instance that are still waiting for an answer.
//!
//! Removal from the table is the only way an entry completes, so whichever of
//! response, timeout, or teardown removes it first decides the outcome and the
//! others find nothing to do.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{ChannelError, Result};
use crate::message::types::RequestId;

pub(crate) type Reply = oneshot::Sender<Result<Value>>;

pub(crate) struct PendingRequest {
    pub action: String,
    reply: Reply,
    timer: Option<AbortHandle>,
    /// Instances reached by the request that have not reported a missing handler.
    awaiting: usize,
}

impl PendingRequest {
    pub fn new(action: impl Into<String>, reply: Reply, awaiting: usize) -> Self {
        Self {
            action: action.into(),
            reply,
            timer: None,
            awaiting,
        }
    }

    pub fn resolve(self, result: Value) {
        self.complete(Ok(result));
    }

    pub fn fail(self, error: ChannelError) {
        self.complete(Err(error));
    }

    fn complete(self, outcome: Result<Value>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have dropped its future; nothing is waiting then.
        let _ = self.reply.send(outcome);
    }
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, id: RequestId, request: PendingRequest) {
        self.entries.insert(id, request);
    }

    pub fn set_timer(&mut self, id: &RequestId, timer: AbortHandle) {
        match self.entries.get_mut(id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Atomic check-and-remove; `None` means someone else already completed the request.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(id)
    }

    /// Record that one reached instance has no handler. Returns the entry once none are left.
    pub fn mark_unhandled(&mut self, id: &RequestId) -> Option<PendingRequest> {
        let entry = self.entries.get_mut(id)?;
        entry.awaiting = entry.awaiting.saturating_sub(1);
        if entry.awaiting == 0 {
            self.entries.remove(id)
        } else {
            None
        }
    }

    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(awaiting: usize) -> (PendingRequest, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (PendingRequest::new("sum", tx, awaiting), rx)
    }

    #[tokio::test]
    async fn test_take_is_single_shot() {
        let mut table = PendingTable::default();
        let id = RequestId::from_raw("r1");
        let (request, rx) = entry(1);
        table.insert(id.clone(), request);

        let first = table.take(&id).unwrap();
        assert!(table.take(&id).is_none());
        assert!(table.is_empty());

        first.resolve(Value::from(5));
        assert_eq!(rx.await.unwrap().unwrap(), Value::from(5));
    }

    #[tokio::test]
    async fn test_unhandled_needs_every_reached_instance() {
        let mut table = PendingTable::default();
        let id = RequestId::from_raw("r2");
        let (request, rx) = entry(2);
        table.insert(id.clone(), request);

        assert!(table.mark_unhandled(&id).is_none());
        assert_eq!(table.len(), 1);

        let exhausted = table.mark_unhandled(&id).unwrap();
        assert!(table.is_empty());

        let action = exhausted.action.clone();
        exhausted.fail(ChannelError::UnhandledAction { action });
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::UnhandledAction { ref action } if action == "sum"));
    }

    #[tokio::test]
    async fn test_timer_aborted_on_completion() {
        let mut table = PendingTable::default();
        let id = RequestId::from_raw("r3");
        let (request, _rx) = entry(1);
        table.insert(id.clone(), request);

        let timer = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        table.set_timer(&id, timer.abort_handle());

        table.take(&id).unwrap().resolve(Value::Null);
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_timer_for_missing_entry_is_aborted() {
        let mut table = PendingTable::default();
        let timer = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        table.set_timer(&RequestId::from_raw("gone"), timer.abort_handle());
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_drain() {
        let mut table = PendingTable::default();
        let (a, rx_a) = entry(1);
        let (b, rx_b) = entry(1);
        table.insert(RequestId::from_raw("a"), a);
        table.insert(RequestId::from_raw("b"), b);

        for orphan in table.drain() {
            orphan.fail(ChannelError::Closed);
        }
        assert!(table.is_empty());
        assert!(rx_a.await.unwrap().unwrap_err().is_closed());
        assert!(rx_b.await.unwrap().unwrap_err().is_closed());
    }
}
