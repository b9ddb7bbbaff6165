//! Sync orchestrator.
//!
//! Turns feed deltas and user location updates into proximity snapshots and
//! typed [`FriendEvent`]s. All state is owned here and mutated through
//! `&mut self`, so it must live on a single sequencer.
//!
//! Per friend, events are emitted in the order their causing deltas were
//! applied. Each call runs to completion before returning, so there is no
//! interleaving between deltas.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, watch};

use super::event::{FriendEvent, FriendUpdate};
use super::tracker::{FriendPhase, FriendTracker, MotionChange, TrackerConfig};
use crate::core::{
    DEFAULT_MAX_PROCESSED_FRIENDS, EVENT_CHANNEL_CAPACITY, FeedEvent, FriendId,
    FriendLocationSample, FriendSet, InputError, RosterMember, SampleOutcome, UserLocation,
};
use crate::proximity::geo::COINCIDENT_EPSILON_METERS;
use crate::proximity::{
    ProximityCache, ProximityComputer, ProximitySnapshot, RecomputeReason, ThrottleConfig,
};

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrchestratorConfig {
    /// Recomputation throttle.
    pub throttle: ThrottleConfig,
    /// Per-friend motion thresholds.
    pub tracker: TrackerConfig,
    /// Processing bound for a single computation.
    pub max_processed_friends: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            tracker: TrackerConfig::default(),
            max_processed_friends: DEFAULT_MAX_PROCESSED_FRIENDS,
        }
    }
}

impl OrchestratorConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(format!("{name} must be a non-negative number, got {value}"))
            }
        };
        non_negative("movement threshold", self.throttle.movement_threshold_meters)?;
        non_negative("jitter threshold", self.tracker.jitter_threshold_meters)?;
        if self.tracker.quiet_period.is_zero() {
            return Err("quiet period must be non-zero".into());
        }
        if self.max_processed_friends == 0 {
            return Err("max processed friends must be at least 1".into());
        }
        Ok(())
    }
}

/// Owns the roster, the proximity cache, and per-friend trackers.
#[derive(Debug)]
pub struct SyncOrchestrator {
    tracker_config: TrackerConfig,
    friends: FriendSet,
    user: Option<UserLocation>,
    cache: ProximityCache,
    computer: ProximityComputer,
    trackers: BTreeMap<FriendId, FriendTracker>,
    sequence: u64,
    events_tx: broadcast::Sender<FriendUpdate>,
    snapshot_tx: watch::Sender<Option<Arc<ProximitySnapshot>>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator with an empty roster and no user location.
    pub fn new(config: OrchestratorConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            tracker_config: config.tracker,
            friends: FriendSet::new(),
            user: None,
            cache: ProximityCache::new(config.throttle),
            computer: ProximityComputer::new(config.max_processed_friends),
            trackers: BTreeMap::new(),
            sequence: 0,
            events_tx,
            snapshot_tx,
        }
    }

    /// Observe friend updates.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FriendUpdate> {
        self.events_tx.subscribe()
    }

    /// Observe the latest snapshot.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<ProximitySnapshot>>> {
        self.snapshot_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<FriendUpdate> {
        self.events_tx.clone()
    }

    /// Latest snapshot, if one was computed.
    pub fn snapshot(&self) -> Option<Arc<ProximitySnapshot>> {
        self.cache.last_result()
    }

    /// Current roster.
    pub fn friends(&self) -> &FriendSet {
        &self.friends
    }

    /// Last accepted user location.
    pub fn user_location(&self) -> Option<&UserLocation> {
        self.user.as_ref()
    }

    /// Recomputation cache.
    pub fn cache(&self) -> &ProximityCache {
        &self.cache
    }

    /// Lifecycle phase of a friend.
    pub fn phase(&self, id: &FriendId) -> FriendPhase {
        self.trackers
            .get(id)
            .map_or(FriendPhase::Absent, FriendTracker::phase)
    }

    /// Sequence number of the last emitted event (0 before any).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Apply one feed delta.
    pub fn handle_feed_event(&mut self, event: FeedEvent, now: Instant) {
        match event {
            FeedEvent::Sample(sample) => {
                if let Err(error) = self.apply_sample(sample, now) {
                    tracing::warn!(%error, "dropping invalid feed sample");
                }
            }
            FeedEvent::RosterUpsert(member) => self.upsert_member(member, now),
            FeedEvent::RosterRemove(id) => self.remove_friend(&id, now),
            FeedEvent::RosterReplaced(members) => self.replace_roster(members, now),
            FeedEvent::Heartbeat => {}
        }
    }

    /// Apply a location sample.
    pub fn apply_sample(
        &mut self,
        sample: FriendLocationSample,
        now: Instant,
    ) -> Result<SampleOutcome, InputError> {
        sample.validate()?;

        let outcome = self.friends.apply_sample(sample.clone());
        let id = sample.friend_id.clone();
        match &outcome {
            SampleOutcome::Accepted { joined, .. } => {
                if *joined {
                    tracing::debug!(friend = %id, "friend joined via sample");
                }
                let motion = match self.trackers.get_mut(&id) {
                    Some(tracker) => tracker.observe(&sample, now, &self.tracker_config),
                    None => {
                        self.trackers
                            .insert(id.clone(), FriendTracker::new(&sample, now));
                        None
                    }
                };
                if let Some(change) = motion {
                    self.emit(FriendEvent::MotionChanged {
                        friend_id: id,
                        moving: change == MotionChange::Started,
                    });
                }
                self.maybe_recompute(now, false, false);
            }
            SampleOutcome::Superseded => {
                tracing::trace!(friend = %id, "dropping superseded sample");
            }
            SampleOutcome::SharingDisabled => {
                tracing::debug!(friend = %id, "dropping sample, sharing disabled");
            }
        }
        Ok(outcome)
    }

    /// Add a friend or change their sharing flag.
    pub fn upsert_member(&mut self, member: RosterMember, now: Instant) {
        let id = member.friend_id.clone();
        let change = self.friends.upsert(member);
        tracing::debug!(friend = %id, ?change, "roster upsert");
        let departed = self.evict_departed();
        self.maybe_recompute(now, false, departed);
    }

    /// Remove a friend from the roster.
    pub fn remove_friend(&mut self, id: &FriendId, now: Instant) {
        if self.friends.remove(id).is_none() {
            tracing::debug!(friend = %id, "ignoring removal of unknown friend");
            return;
        }
        tracing::debug!(friend = %id, "friend removed from roster");
        let departed = self.evict_departed();
        self.maybe_recompute(now, false, departed);
    }

    /// Replace the whole roster.
    pub fn replace_roster(&mut self, members: Vec<RosterMember>, now: Instant) {
        let removed = self.friends.replace_roster(members);
        tracing::debug!(
            members = self.friends.len(),
            removed = removed.len(),
            "roster replaced"
        );
        let departed = self.evict_departed();
        self.maybe_recompute(now, false, departed);
    }

    /// Accept a new user location. The first one always computes.
    pub fn update_user_location(
        &mut self,
        location: UserLocation,
        now: Instant,
    ) -> Result<(), InputError> {
        location.validate()?;
        self.user = Some(location);
        self.maybe_recompute(now, false, false);
        Ok(())
    }

    /// Recompute now, bypassing the throttle. No-op without a user location.
    pub fn refresh(&mut self, now: Instant) {
        self.maybe_recompute(now, true, false);
    }

    /// Earliest instant at which a moving friend goes quiet.
    pub fn next_quiet_deadline(&self) -> Option<Instant> {
        self.trackers
            .values()
            .filter_map(|tracker| tracker.quiet_deadline(&self.tracker_config))
            .min()
    }

    /// Move friends whose quiet period elapsed back to idle.
    pub fn expire_quiet(&mut self, now: Instant) {
        let config = &self.tracker_config;
        let stopped: Vec<FriendId> = self
            .trackers
            .iter_mut()
            .filter_map(|(id, tracker)| tracker.check_quiet(now, config).map(|_| id.clone()))
            .collect();
        for friend_id in stopped {
            tracing::trace!(friend = %friend_id, "quiet period elapsed");
            self.emit(FriendEvent::MotionChanged {
                friend_id,
                moving: false,
            });
        }
    }

    /// Evict trackers of friends that no longer have a location. Returns
    /// whether any disappear event was emitted.
    fn evict_departed(&mut self) -> bool {
        let friends = &self.friends;
        let departed: Vec<FriendId> = self
            .trackers
            .keys()
            .filter(|id| !friends.get(id).is_some_and(|entry| entry.sample.is_some()))
            .cloned()
            .collect();

        let last = self.cache.last_result();
        let mut announced = false;
        for friend_id in departed {
            let Some(mut tracker) = self.trackers.remove(&friend_id) else {
                continue;
            };
            if tracker.disappear() {
                let last = last.as_ref().and_then(|s| s.get(&friend_id)).cloned();
                self.emit(FriendEvent::Disappeared { friend_id, last });
                announced = true;
            } else {
                tracing::trace!(friend = %friend_id, "evicting unannounced friend");
            }
        }
        announced
    }

    fn maybe_recompute(&mut self, now: Instant, forced: bool, departed: bool) {
        let Some(user) = self.user.clone() else {
            tracing::trace!("no user location yet, skipping computation");
            return;
        };
        let reason = if forced {
            Some(RecomputeReason::Forced)
        } else {
            self.cache.recompute_reason(&user, &self.friends, now)
        };
        let Some(reason) = reason else {
            tracing::trace!("recomputation throttled");
            return;
        };

        let previous = self.cache.last_result();
        let snapshot = Arc::new(self.computer.compute(&user, &self.friends, now));
        self.cache
            .store(user, self.friends.fingerprint(), Arc::clone(&snapshot));
        tracing::debug!(
            %reason,
            entries = snapshot.len(),
            truncated = snapshot.truncated,
            "proximity recomputed"
        );
        self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));
        self.publish_diff(previous.as_deref(), snapshot, reason, departed);
    }

    fn publish_diff(
        &mut self,
        previous: Option<&ProximitySnapshot>,
        snapshot: Arc<ProximitySnapshot>,
        reason: RecomputeReason,
        departed: bool,
    ) {
        let jitter = self.tracker_config.jitter_threshold_meters;
        let mut membership_changed = departed;
        let mut moved = BTreeSet::new();

        for entry in &snapshot.entries {
            let appeared = self
                .trackers
                .get_mut(&entry.friend_id)
                .is_some_and(FriendTracker::mark_announced);
            if appeared {
                membership_changed = true;
                self.emit(FriendEvent::Appeared {
                    friend_id: entry.friend_id.clone(),
                    entry: entry.clone(),
                });
                continue;
            }

            let Some(before) = previous.and_then(|p| p.get(&entry.friend_id)) else {
                continue;
            };
            let shift = before.position.distance_to(&entry.position);
            if shift > jitter || before.is_moving != entry.is_moving {
                moved.insert(entry.friend_id.clone());
                self.emit(FriendEvent::Moved {
                    friend_id: entry.friend_id.clone(),
                    from: before.clone(),
                    to: entry.clone(),
                });
            }
        }

        if membership_changed {
            return;
        }
        let reshaped = match previous {
            None => true,
            Some(previous) => {
                !previous.ids().eq(snapshot.ids())
                    || snapshot.entries.iter().any(|entry| {
                        !moved.contains(&entry.friend_id)
                            && previous.get(&entry.friend_id).is_some_and(|before| {
                                (before.distance_meters - entry.distance_meters).abs()
                                    > COINCIDENT_EPSILON_METERS
                            })
                    })
            }
        };
        if reshaped || matches!(reason, RecomputeReason::Forced) {
            self.emit(FriendEvent::RosterRecomputed { snapshot, reason });
        }
    }

    fn emit(&mut self, event: FriendEvent) {
        self.sequence += 1;
        tracing::trace!(sequence = self.sequence, ?event, "friend event");
        // Nobody listening is fine; the snapshot watch still carries state.
        let _ = self.events_tx.send(FriendUpdate {
            sequence: self.sequence,
            event,
        });
    }
}
