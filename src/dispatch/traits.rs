// Dispatcher trait: the seam between the worker and the messaging endpoint.
//
// GraphDispatcher is the real implementation; tests substitute scripted ones.

use async_trait::async_trait;

use super::error::DispatchError;

/// One outbound direct-message call. Implementations make exactly one
/// attempt per call; retrying is the caller's job.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), DispatchError>;
}
