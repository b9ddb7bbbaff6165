//! Typed friend-update events.

use std::sync::Arc;

use crate::core::FriendId;
use crate::proximity::{ProximityEntry, ProximitySnapshot, RecomputeReason};

/// A friend-level change derived from feed deltas and recomputations.
#[derive(Debug, Clone, PartialEq)]
pub enum FriendEvent {
    /// First snapshot containing the friend. Emitted once per appearance.
    Appeared {
        /// The friend.
        friend_id: FriendId,
        /// Entry in the snapshot that introduced the friend.
        entry: ProximityEntry,
    },
    /// The friend's entry changed position or motion between snapshots.
    Moved {
        /// The friend.
        friend_id: FriendId,
        /// Entry in the previous snapshot.
        from: ProximityEntry,
        /// Entry in the new snapshot.
        to: ProximityEntry,
    },
    /// The friend left the roster or stopped sharing.
    Disappeared {
        /// The friend.
        friend_id: FriendId,
        /// Last published entry, if the friend was in the last snapshot.
        last: Option<ProximityEntry>,
    },
    /// The friend started or stopped moving.
    MotionChanged {
        /// The friend.
        friend_id: FriendId,
        /// New motion state.
        moving: bool,
    },
    /// Ordering or distances changed with no friend appearing or leaving.
    RosterRecomputed {
        /// The new snapshot.
        snapshot: Arc<ProximitySnapshot>,
        /// What triggered the recomputation.
        reason: RecomputeReason,
    },
}

impl FriendEvent {
    /// The friend this event is about, if it concerns a single friend.
    pub fn friend_id(&self) -> Option<&FriendId> {
        match self {
            FriendEvent::Appeared { friend_id, .. }
            | FriendEvent::Moved { friend_id, .. }
            | FriendEvent::Disappeared { friend_id, .. }
            | FriendEvent::MotionChanged { friend_id, .. } => Some(friend_id),
            FriendEvent::RosterRecomputed { .. } => None,
        }
    }
}

/// A [`FriendEvent`] stamped with its position in the engine's output.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendUpdate {
    /// Monotonic, starting at 1, for ordering diagnostics.
    pub sequence: u64,
    /// The event.
    pub event: FriendEvent,
}
