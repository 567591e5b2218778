// Outbound delivery: the messaging-endpoint client, its error kinds,
// the retry controller and the outbound throttle.

pub mod error;
pub mod graph;
pub mod rate_limit;
pub mod retry;
pub mod traits;

pub use error::DispatchError;
pub use traits::Dispatcher;
