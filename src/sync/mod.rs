//! Sync layer: from feed deltas to friend events.
//!
//! Implements:
//! - Per-friend motion tracking ([`FriendTracker`])
//! - Throttled recomputation and snapshot diffing ([`SyncOrchestrator`])
//! - Typed, sequenced output ([`FriendUpdate`])

mod event;
mod orchestrator;
mod tracker;

pub use event::*;
pub use orchestrator::*;
pub use tracker::*;
