//! # Proximity Sync
//!
//! Real-time friend proximity synchronization engine.
//!
//! Keeps a live, reconnecting subscription to a remote friend-location feed,
//! turns location deltas into ordered proximity snapshots for the current
//! user, and recovers from transient failures without losing or duplicating
//! state:
//!
//! - **Supervision**: explicit connection state machine with heartbeat
//!   detection and jittered exponential reconnect
//! - **Throttling**: recomputation only when the roster changed, the user
//!   moved, or the interval elapsed
//! - **Events**: typed, sequenced appear / move / disappear updates
//! - **Recovery**: bounded retry for writes, with an offline FIFO replayed
//!   when connectivity returns
//!
//! ## Feature Flags
//!
//! - `transport` (default): backoff and connection supervision
//! - `sync` (default): per-friend tracking and the orchestrator
//! - `retry` (default): retry policy, action queue, coordinator
//! - `client` (default): the [`ProximityEngine`] handle
//! - `serde`: `Serialize`/`Deserialize` on configuration types
//!
//! ## Modules
//!
//! - [`core`]: data model, constants, errors, collaborator traits (always included)
//! - [`proximity`]: distance computation and recomputation throttle (always included)
//! - [`transport`]: connection supervision (requires `transport` feature)
//! - [`sync`]: orchestrator and friend events (requires `sync` feature)
//! - [`retry`]: write-path recovery (requires `retry` feature)
//! - [`client`]: engine handle (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use proximity_sync::prelude::*;
//!
//! let now = Instant::now();
//! let mut friends = FriendSet::new();
//! friends.apply_sample(FriendLocationSample::new(
//!     FriendId::new("ada"),
//!     GeoPoint::new(51.5007, -0.1246),
//!     5.0,
//!     now,
//! ));
//!
//! let user = UserLocation::new(GeoPoint::new(51.5014, -0.1419), 10.0, now);
//! let snapshot = ProximityComputer::default().compute(&user, &friends, now);
//!
//! assert_eq!(snapshot.len(), 1);
//! assert!(snapshot.entries[0].distance_meters > 1_000.0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Proximity computation (always included)
pub mod proximity;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Sync layer (feature-gated)
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;

// Retry layer (feature-gated)
#[cfg(feature = "retry")]
#[cfg_attr(docsrs, doc(cfg(feature = "retry")))]
pub mod retry;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

#[cfg(all(test, feature = "transport"))]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::proximity::{
        ProximityCache, ProximityComputer, ProximityEntry, ProximitySnapshot, RecomputeReason,
        ThrottleConfig,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        BackoffConfig, ConnectionFailure, ConnectionState, ConnectionSupervisor, SupervisorConfig,
    };

    #[cfg(feature = "sync")]
    pub use crate::sync::{
        FriendEvent, FriendPhase, FriendUpdate, OrchestratorConfig, SyncOrchestrator,
        TrackerConfig,
    };

    #[cfg(feature = "retry")]
    pub use crate::retry::{
        Action, ActionId, ExecuteOutcome, QueueEvent, QueueEventKind, QueuedActionCompleted,
        RetryPolicy,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{EngineConfig, EngineConfigBuilder, ProximityEngine};
}

// Re-export commonly used items at crate root
pub use crate::core::{
    EngineError, FeedError, FeedEvent, FriendFeed, FriendId, GeoPoint, OperationError, UserId,
};

#[cfg(feature = "transport")]
pub use crate::transport::ConnectionState;

#[cfg(feature = "client")]
pub use crate::client::{EngineConfig, ProximityEngine};
