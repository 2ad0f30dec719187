//! xbus - typed events and request/response calls over a named local broadcast channel
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod transport;

pub use channel::{AwaitResponse, AwaitSpec, Channel, ChannelStats, EventSpec};
pub use codec::{Codec, JsonCodec};
pub use config::{ChannelConfig, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ChannelError, Result, TransportError, TransportResult};
pub use message::Message;
pub use message::types::{RequestId, ResponseFault};
pub use transport::local::LocalEndpoint;
pub use transport::{Broadcast, Endpoint, LocalBus, TransportStats};

#[cfg(feature = "codec-cbor")]
pub use codec::CborCodec;
#[cfg(feature = "codec-messagepack")]
pub use codec::MessagePackCodec;

/// Open `name` on the process-wide bus with the default configuration.
pub fn create(name: &str) -> Result<Channel> {
    Channel::create(name)
}
