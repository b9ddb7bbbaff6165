//! Per-friend motion state machine.
//!
//! ```text
//! Absent ─sample─▶ Appearing ─announced─▶ Idle ◀──▶ Moving
//!                                           │          │
//!                                           └─removed──┴─▶ Disappearing ─▶ Absent
//! ```
//!
//! Trackers only exist between the first sample and eviction, so `Absent`
//! is never observed on a live tracker; it is the state reported for
//! untracked friends.

use std::time::{Duration, Instant};

use crate::core::{
    DEFAULT_JITTER_THRESHOLD_METERS, DEFAULT_QUIET_PERIOD, FriendLocationSample, GeoPoint,
};

/// Tracker thresholds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerConfig {
    /// Displacement below which a new sample is treated as GPS noise.
    pub jitter_threshold_meters: f64,
    /// A moving friend with no samples for this long becomes idle.
    pub quiet_period: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            jitter_threshold_meters: DEFAULT_JITTER_THRESHOLD_METERS,
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

/// Lifecycle phase of a tracked friend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FriendPhase {
    /// Not tracked.
    Absent,
    /// First sample received; not yet announced.
    Appearing,
    /// Announced and stationary.
    Idle,
    /// Announced and moving.
    Moving,
    /// Removed; about to be evicted.
    Disappearing,
}

/// Motion change caused by a sample or a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionChange {
    /// Idle to moving.
    Started,
    /// Moving to idle.
    Stopped,
}

/// State machine for one friend.
#[derive(Debug, Clone)]
pub struct FriendTracker {
    phase: FriendPhase,
    last_position: GeoPoint,
    last_sample_at: Instant,
    last_flagged_moving: bool,
}

impl FriendTracker {
    /// Start tracking on the first sample. `received_at` is the local clock
    /// reading, not the sample's capture time.
    pub fn new(sample: &FriendLocationSample, received_at: Instant) -> Self {
        Self {
            phase: FriendPhase::Appearing,
            last_position: sample.position,
            last_sample_at: received_at,
            last_flagged_moving: sample.is_moving,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> FriendPhase {
        self.phase
    }

    /// Whether the appear event has been emitted.
    pub fn is_announced(&self) -> bool {
        matches!(self.phase, FriendPhase::Idle | FriendPhase::Moving)
    }

    /// Position of the last sample.
    pub fn last_position(&self) -> GeoPoint {
        self.last_position
    }

    /// `Appearing -> Idle`, once.
    pub fn mark_announced(&mut self) -> bool {
        if self.phase != FriendPhase::Appearing {
            return false;
        }
        self.phase = FriendPhase::Idle;
        true
    }

    /// Feed a newly accepted sample.
    ///
    /// A moving friend stops as soon as the sample's `is_moving` flag clears,
    /// wherever it landed. Friends that never set the flag stop once a sample
    /// stays within the jitter threshold.
    pub fn observe(
        &mut self,
        sample: &FriendLocationSample,
        received_at: Instant,
        config: &TrackerConfig,
    ) -> Option<MotionChange> {
        let displacement = self.last_position.distance_to(&sample.position);
        let jittered = displacement <= config.jitter_threshold_meters;
        let flag_cleared = self.last_flagged_moving && !sample.is_moving;
        self.last_position = sample.position;
        self.last_sample_at = received_at;
        self.last_flagged_moving = sample.is_moving;

        match self.phase {
            FriendPhase::Idle if !jittered || sample.is_moving => {
                self.phase = FriendPhase::Moving;
                Some(MotionChange::Started)
            }
            FriendPhase::Moving if flag_cleared || (jittered && !sample.is_moving) => {
                self.phase = FriendPhase::Idle;
                Some(MotionChange::Stopped)
            }
            _ => None,
        }
    }

    /// When a moving friend goes quiet, if it is moving.
    pub fn quiet_deadline(&self, config: &TrackerConfig) -> Option<Instant> {
        (self.phase == FriendPhase::Moving).then(|| self.last_sample_at + config.quiet_period)
    }

    /// `Moving -> Idle` if the quiet period has elapsed.
    pub fn check_quiet(&mut self, now: Instant, config: &TrackerConfig) -> Option<MotionChange> {
        let deadline = self.quiet_deadline(config)?;
        if now < deadline {
            return None;
        }
        self.phase = FriendPhase::Idle;
        Some(MotionChange::Stopped)
    }

    /// Enter `Disappearing`. Returns whether a disappear event is owed,
    /// i.e. whether the friend was ever announced.
    pub fn disappear(&mut self) -> bool {
        let owed = self.is_announced();
        self.phase = FriendPhase::Disappearing;
        owed
    }
}
