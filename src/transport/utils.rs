use bytes::Bytes;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::transport::Endpoint;

/// Spawns a background task that feeds every received frame to `action` while the owner exists.
///
/// The loop ends when the endpoint is closed or the owner is dropped.
pub fn spawn_weak_loop<T: Send + Sync + 'static>(
    runtime: &Handle,
    owner: Weak<T>,
    endpoint: Arc<dyn Endpoint>,
    mut action: impl FnMut(&Arc<T>, Bytes) + Send + 'static,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            let frame = match endpoint.recv().await {
                Ok(frame) => frame,
                Err(_) => break,
            };

            if let Some(strong) = owner.upgrade() {
                action(&strong, frame);
            } else {
                // Owner dropped, stop the loop
                break;
            }
        }
    })
}
