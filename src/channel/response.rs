use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::{ChannelError, Result};
use crate::message::types::RequestId;

enum State {
    Failed(Option<ChannelError>),
    Waiting {
        request_id: RequestId,
        reply: oneshot::Receiver<Result<Value>>,
    },
}

/// Eventual answer to a `send_await` call.
///
/// The request is already registered and broadcast when this is returned; polling only waits
/// for it to complete. Completes exactly once, with the decoded result or a [`ChannelError`].
#[must_use = "the answer is lost unless the response is awaited"]
pub struct AwaitResponse<R> {
    state: State,
    _output: PhantomData<fn() -> R>,
}

impl<R> AwaitResponse<R> {
    pub(crate) fn waiting(request_id: RequestId, reply: oneshot::Receiver<Result<Value>>) -> Self {
        Self {
            state: State::Waiting { request_id, reply },
            _output: PhantomData,
        }
    }

    pub(crate) fn failed(error: ChannelError) -> Self {
        Self {
            state: State::Failed(Some(error)),
            _output: PhantomData,
        }
    }

    /// Id the request went out with, unless it failed before being sent.
    pub fn request_id(&self) -> Option<&RequestId> {
        match &self.state {
            State::Waiting { request_id, .. } => Some(request_id),
            State::Failed(_) => None,
        }
    }
}

impl<R: DeserializeOwned> Future for AwaitResponse<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(ChannelError::Closed))),
            State::Waiting { reply, .. } => match Pin::new(reply).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(Ok(value))) => {
                    Poll::Ready(serde_json::from_value(value).map_err(ChannelError::from))
                }
                Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(error)),
                // Sender dropped without an answer: the owning channel is gone.
                Poll::Ready(Err(_)) => Poll::Ready(Err(ChannelError::Closed)),
            },
        }
    }
}

impl<R> std::fmt::Debug for AwaitResponse<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwaitResponse")
            .field("request_id", &self.request_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decodes_result() {
        let (tx, rx) = oneshot::channel();
        let response: AwaitResponse<u32> = AwaitResponse::waiting(RequestId::from_raw("r"), rx);
        assert_eq!(response.request_id().unwrap().as_str(), "r");

        tx.send(Ok(Value::from(200))).unwrap();
        assert_eq!(response.await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_mismatched_result_is_serialization_error() {
        let (tx, rx) = oneshot::channel();
        let response: AwaitResponse<u32> = AwaitResponse::waiting(RequestId::from_raw("r"), rx);

        tx.send(Ok(Value::from("two hundred"))).unwrap();
        let err = response.await.unwrap_err();
        assert!(matches!(err, ChannelError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_dropped_sender_is_closed() {
        let (tx, rx) = oneshot::channel::<Result<Value>>();
        let response: AwaitResponse<()> = AwaitResponse::waiting(RequestId::from_raw("r"), rx);
        drop(tx);
        assert!(response.await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_failed_before_send() {
        let response: AwaitResponse<()> = AwaitResponse::failed(ChannelError::Closed);
        assert!(response.request_id().is_none());
        assert!(response.await.unwrap_err().is_closed());
    }
}
