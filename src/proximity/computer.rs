//! Proximity computation.
//!
//! [`ProximityComputer::compute`] is pure: the same user location, roster,
//! and clock reading always produce the same snapshot, including the
//! ordering of equidistant friends.

use std::time::{Duration, Instant};

use crate::core::{DEFAULT_MAX_PROCESSED_FRIENDS, FriendId, FriendSet, GeoPoint, UserLocation};

/// Proximity of one friend relative to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityEntry {
    /// The friend.
    pub friend_id: FriendId,
    /// The friend's reported position.
    pub position: GeoPoint,
    /// Great-circle distance from the user.
    pub distance_meters: f64,
    /// Bearing from the user, `None` when co-located.
    pub bearing_degrees: Option<f64>,
    /// Accuracy radius of the friend's sample.
    pub accuracy_meters: f64,
    /// Whether the friend's sample reports movement.
    pub is_moving: bool,
    /// Age of the underlying sample at computation time.
    pub staleness: Duration,
}

/// An immutable, fully consistent proximity result.
///
/// Entries are sorted by ascending distance, ties broken by friend id.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximitySnapshot {
    /// Ordered entries, one per located friend.
    pub entries: Vec<ProximityEntry>,
    /// Whether the roster exceeded the processing bound and was cut.
    pub truncated: bool,
    /// When the snapshot was computed.
    pub computed_at: Instant,
}

impl ProximitySnapshot {
    /// Snapshot with no entries.
    pub fn empty(computed_at: Instant) -> Self {
        Self {
            entries: Vec::new(),
            truncated: false,
            computed_at,
        }
    }

    /// Look up a friend's entry.
    pub fn get(&self, id: &FriendId) -> Option<&ProximityEntry> {
        self.entries.iter().find(|entry| &entry.friend_id == id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Friend ids in snapshot order.
    pub fn ids(&self) -> impl Iterator<Item = &FriendId> {
        self.entries.iter().map(|entry| &entry.friend_id)
    }

    /// Nearest friend, if any.
    pub fn nearest(&self) -> Option<&ProximityEntry> {
        self.entries.first()
    }
}

/// Turns a user location and roster into an ordered snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ProximityComputer {
    max_processed_friends: usize,
}

impl Default for ProximityComputer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PROCESSED_FRIENDS)
    }
}

impl ProximityComputer {
    /// Create a computer that processes at most `max_processed_friends`.
    pub fn new(max_processed_friends: usize) -> Self {
        Self {
            max_processed_friends,
        }
    }

    /// Processing bound.
    pub fn max_processed_friends(&self) -> usize {
        self.max_processed_friends
    }

    /// Compute the snapshot.
    ///
    /// Only located friends are candidates. When there are more than the
    /// bound, the first `max_processed_friends` by id are processed and the
    /// snapshot is marked truncated.
    pub fn compute(
        &self,
        user: &UserLocation,
        friends: &FriendSet,
        now: Instant,
    ) -> ProximitySnapshot {
        let located = friends.located_count();
        let truncated = located > self.max_processed_friends;

        // `located()` iterates in id order, so `take` is a stable cut by id.
        let mut entries: Vec<ProximityEntry> = friends
            .located()
            .take(self.max_processed_friends)
            .map(|sample| ProximityEntry {
                friend_id: sample.friend_id.clone(),
                position: sample.position,
                distance_meters: user.position.distance_to(&sample.position),
                bearing_degrees: user.position.bearing_to(&sample.position),
                accuracy_meters: sample.accuracy_meters,
                is_moving: sample.is_moving,
                staleness: now.saturating_duration_since(sample.captured_at),
            })
            .collect();

        entries.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.friend_id.cmp(&b.friend_id))
        });

        if truncated {
            tracing::debug!(
                located,
                processed = entries.len(),
                "friend set exceeds processing bound, snapshot truncated"
            );
        }

        ProximitySnapshot {
            entries,
            truncated,
            computed_at: now,
        }
    }
}
