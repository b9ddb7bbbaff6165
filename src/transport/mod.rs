//! Transport layer: feed subscription supervision.
//!
//! - **Backoff**: [`ExponentialBackoff`] with bounded, seedable jitter
//! - **Connection state machine**: [`ConnectionState`] driven by
//!   [`ConnectionSupervisor`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Sync layer (orchestrator)           │
//! ├─────────────────────────────────────────┤
//! │     Transport layer                     │  ← This module
//! │   subscribe, heartbeat, reconnect       │
//! ├─────────────────────────────────────────┤
//! │     FriendFeed (remote backend)         │
//! └─────────────────────────────────────────┘
//! ```

mod backoff;
mod supervisor;

pub use backoff::*;
pub use supervisor::*;
