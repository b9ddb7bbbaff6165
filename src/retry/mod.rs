//! Retry layer: write-path recovery.
//!
//! - [`RetryPolicy`]: bounded exponential-backoff retry with error
//!   classification
//! - [`ActionQueue`]: FIFO of actions deferred while offline
//! - [`RetryCoordinator`]: decides retry, queue, or surface, and replays
//!   the queue when connectivity returns
//!
//! Operations may run more than once. Callers must make them idempotent or
//! attach a dedupe key the remote side honours.

mod coordinator;
mod policy;
mod queue;

pub use coordinator::*;
pub use policy::*;
pub use queue::*;
