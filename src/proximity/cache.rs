//! Recomputation throttle.
//!
//! [`ProximityCache`] remembers the inputs of the last computation and decides
//! whether a new one is warranted. It is a throttle only; callers may always
//! force a recomputation.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::computer::ProximitySnapshot;
use crate::core::{
    DEFAULT_MOVEMENT_THRESHOLD_METERS, DEFAULT_RECOMPUTE_INTERVAL, Fingerprint, FriendSet,
    UserLocation,
};

/// Throttle thresholds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleConfig {
    /// Recompute when the last computation is older than this.
    pub recompute_interval: Duration,
    /// Recompute when the user moved further than this.
    pub movement_threshold_meters: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            recompute_interval: DEFAULT_RECOMPUTE_INTERVAL,
            movement_threshold_meters: DEFAULT_MOVEMENT_THRESHOLD_METERS,
        }
    }
}

/// Why a recomputation ran.
///
/// When several conditions hold at once the first in declaration order is
/// reported; any one of them is sufficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecomputeReason {
    /// No previous computation.
    Initial,
    /// Roster membership, location presence, or sharing flags changed.
    RosterChanged,
    /// The recompute interval elapsed.
    IntervalElapsed,
    /// The user moved beyond the movement threshold.
    UserMoved {
        /// Distance moved since the last computation.
        meters: f64,
    },
    /// The caller bypassed the throttle.
    Forced,
}

impl fmt::Display for RecomputeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecomputeReason::Initial => f.write_str("initial"),
            RecomputeReason::RosterChanged => f.write_str("roster changed"),
            RecomputeReason::IntervalElapsed => f.write_str("interval elapsed"),
            RecomputeReason::UserMoved { meters } => write!(f, "user moved {meters:.1}m"),
            RecomputeReason::Forced => f.write_str("forced"),
        }
    }
}

/// Inputs and output of the last computation. Always replaced as a whole.
#[derive(Debug, Clone)]
pub struct CacheState {
    /// User location used.
    pub last_user_location: UserLocation,
    /// Roster fingerprint used.
    pub last_fingerprint: Fingerprint,
    /// When it was computed.
    pub last_computed_at: Instant,
    /// The result.
    pub last_result: Arc<ProximitySnapshot>,
}

/// Last-computation cache and throttle.
#[derive(Debug, Clone, Default)]
pub struct ProximityCache {
    config: ThrottleConfig,
    state: Option<CacheState>,
}

impl ProximityCache {
    /// Create an empty cache.
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Throttle configuration.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Whether a recomputation is warranted.
    pub fn should_recompute(&self, user: &UserLocation, friends: &FriendSet, now: Instant) -> bool {
        self.recompute_reason(user, friends, now).is_some()
    }

    /// The first condition that warrants recomputation, if any.
    pub fn recompute_reason(
        &self,
        user: &UserLocation,
        friends: &FriendSet,
        now: Instant,
    ) -> Option<RecomputeReason> {
        let Some(state) = &self.state else {
            return Some(RecomputeReason::Initial);
        };

        if friends.fingerprint() != state.last_fingerprint {
            return Some(RecomputeReason::RosterChanged);
        }

        if now.saturating_duration_since(state.last_computed_at) > self.config.recompute_interval {
            return Some(RecomputeReason::IntervalElapsed);
        }

        let meters = state.last_user_location.position.distance_to(&user.position);
        if meters > self.config.movement_threshold_meters {
            return Some(RecomputeReason::UserMoved { meters });
        }

        None
    }

    /// Record a completed computation, replacing the previous state whole.
    pub fn store(
        &mut self,
        user: UserLocation,
        fingerprint: Fingerprint,
        result: Arc<ProximitySnapshot>,
    ) {
        self.state = Some(CacheState {
            last_user_location: user,
            last_fingerprint: fingerprint,
            last_computed_at: result.computed_at,
            last_result: result,
        });
    }

    /// Current state, if anything was computed.
    pub fn state(&self) -> Option<&CacheState> {
        self.state.as_ref()
    }

    /// Last result, if anything was computed.
    pub fn last_result(&self) -> Option<Arc<ProximitySnapshot>> {
        self.state.as_ref().map(|s| Arc::clone(&s.last_result))
    }

    /// Whether the last result was truncated.
    pub fn was_truncated(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.last_result.truncated)
    }

    /// Forget the last computation.
    pub fn clear(&mut self) {
        self.state = None;
    }
}
