//! Compile-time checked action schemas.
//!
//! An action is declared once as a type implementing [`EventSpec`] or [`AwaitSpec`]; the typed
//! methods on [`Channel`] then only accept the matching payload and result types.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use super::{AwaitResponse, Channel};
use crate::codec::Codec;
use crate::error::Result;

/// A fire-and-forget event and the shape of its payload.
pub trait EventSpec {
    const ACTION: &'static str;
    type Payload: Serialize + DeserializeOwned + Send + 'static;
}

/// A request/response action: the payload it takes and the result it produces.
pub trait AwaitSpec {
    const ACTION: &'static str;
    type Payload: Serialize + DeserializeOwned + Send + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

impl<C: Codec> Channel<C> {
    /// Typed [`Channel::on_event`].
    pub fn listen<E, F>(&self, handler: F)
    where
        E: EventSpec,
        F: Fn(E::Payload) + Send + Sync + 'static,
    {
        self.on_event::<E::Payload, F>(E::ACTION, handler);
    }

    /// Typed [`Channel::send_event`].
    pub fn emit<E: EventSpec>(&self, payload: &E::Payload) -> Result<()> {
        self.send_event(E::ACTION, payload)
    }

    /// Typed [`Channel::on_await`].
    pub fn serve<A, Err, F, Fut>(&self, handler: F)
    where
        A: AwaitSpec,
        Err: Display + Send + 'static,
        F: Fn(A::Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<A::Output, Err>> + Send + 'static,
    {
        self.on_await::<A::Payload, A::Output, Err, F, Fut>(A::ACTION, handler);
    }

    /// Typed [`Channel::send_await`].
    pub fn request<A: AwaitSpec>(&self, payload: &A::Payload) -> AwaitResponse<A::Output> {
        self.send_await(A::ACTION, payload)
    }

    /// Typed [`Channel::send_await_with_timeout`].
    pub fn request_with_timeout<A: AwaitSpec>(
        &self,
        payload: &A::Payload,
        timeout: Duration,
    ) -> AwaitResponse<A::Output> {
        self.send_await_with_timeout(A::ACTION, payload, timeout)
    }
}
