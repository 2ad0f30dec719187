use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Configuration for a channel instance.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// How long `send_await` waits for an answer before failing with a timeout.
    pub request_timeout: Duration,
    /// Whether requests are also offered to this instance's own await handlers.
    pub self_delivery: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            self_delivery: true,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_self_delivery(mut self, enabled: bool) -> Self {
        self.self_delivery = enabled;
        self
    }
}
