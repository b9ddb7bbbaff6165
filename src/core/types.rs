//! Data model shared by every layer: identities, location samples, and the
//! friend roster.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use blake2::{Blake2s256, Digest};

use super::constants::MOVING_SPEED_THRESHOLD_MPS;
use super::error::InputError;
use crate::proximity::geo;

/// Stable identity of a friend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FriendId(String);

impl FriendId {
    /// Create a friend id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FriendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FriendId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identity of the local user (the subscription key for the remote feed).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Create a user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point. Use [`GeoPoint::validate`] before trusting external input.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check that the coordinates are finite and in range.
    pub fn validate(&self) -> Result<(), InputError> {
        let ok = self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude);
        if ok {
            Ok(())
        } else {
            Err(InputError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        geo::haversine_distance(self, other)
    }

    /// Initial bearing towards `other`, or `None` if the points coincide.
    pub fn bearing_to(&self, other: &GeoPoint) -> Option<f64> {
        geo::initial_bearing(self, other)
    }
}

fn validate_accuracy(accuracy_meters: f64) -> Result<(), InputError> {
    if accuracy_meters.is_finite() && accuracy_meters >= 0.0 {
        Ok(())
    } else {
        Err(InputError::InvalidAccuracy(accuracy_meters))
    }
}

/// One location report for a friend, as received from the feed.
///
/// Samples are immutable; a later sample for the same friend supersedes an
/// earlier one.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendLocationSample {
    /// Whose location this is.
    pub friend_id: FriendId,
    /// Reported position.
    pub position: GeoPoint,
    /// Horizontal accuracy radius in meters.
    pub accuracy_meters: f64,
    /// Course over ground, `[0, 360)`.
    pub heading_degrees: Option<f64>,
    /// Ground speed in meters per second.
    pub speed_mps: Option<f64>,
    /// Whether the friend is moving.
    pub is_moving: bool,
    /// When the sample was captured.
    pub captured_at: Instant,
}

impl FriendLocationSample {
    /// Create a stationary sample with no heading or speed.
    pub fn new(
        friend_id: FriendId,
        position: GeoPoint,
        accuracy_meters: f64,
        captured_at: Instant,
    ) -> Self {
        Self {
            friend_id,
            position,
            accuracy_meters,
            heading_degrees: None,
            speed_mps: None,
            is_moving: false,
            captured_at,
        }
    }

    /// Set the heading (normalised into `[0, 360)`).
    pub fn with_heading(mut self, heading_degrees: f64) -> Self {
        self.heading_degrees = Some(heading_degrees.rem_euclid(360.0));
        self
    }

    /// Set the speed; `is_moving` is derived from it.
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps.max(0.0));
        self.is_moving = speed_mps > MOVING_SPEED_THRESHOLD_MPS;
        self
    }

    /// Override the derived moving flag.
    pub fn with_moving(mut self, is_moving: bool) -> Self {
        self.is_moving = is_moving;
        self
    }

    /// Validate coordinates and accuracy.
    pub fn validate(&self) -> Result<(), InputError> {
        self.position.validate()?;
        validate_accuracy(self.accuracy_meters)
    }
}

/// The local device's best-known location.
#[derive(Debug, Clone, PartialEq)]
pub struct UserLocation {
    /// Reported position.
    pub position: GeoPoint,
    /// Horizontal accuracy radius in meters.
    pub accuracy_meters: f64,
    /// Course over ground, `[0, 360)`.
    pub heading_degrees: Option<f64>,
    /// Ground speed in meters per second.
    pub speed_mps: Option<f64>,
    /// Whether the user is moving.
    pub is_moving: bool,
    /// When the location was captured.
    pub captured_at: Instant,
}

impl UserLocation {
    /// Create a stationary user location.
    pub fn new(position: GeoPoint, accuracy_meters: f64, captured_at: Instant) -> Self {
        Self {
            position,
            accuracy_meters,
            heading_degrees: None,
            speed_mps: None,
            is_moving: false,
            captured_at,
        }
    }

    /// Set the speed; `is_moving` is derived from it.
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps.max(0.0));
        self.is_moving = speed_mps > MOVING_SPEED_THRESHOLD_MPS;
        self
    }

    /// Validate coordinates and accuracy.
    pub fn validate(&self) -> Result<(), InputError> {
        self.position.validate()?;
        validate_accuracy(self.accuracy_meters)
    }
}

/// Roster membership as published by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterMember {
    /// The friend.
    pub friend_id: FriendId,
    /// Whether the friend currently shares their location.
    pub sharing_enabled: bool,
}

impl RosterMember {
    /// A member who shares their location.
    pub fn sharing(friend_id: impl Into<FriendId>) -> Self {
        Self {
            friend_id: friend_id.into(),
            sharing_enabled: true,
        }
    }

    /// A member who does not share their location.
    pub fn hidden(friend_id: impl Into<FriendId>) -> Self {
        Self {
            friend_id: friend_id.into(),
            sharing_enabled: false,
        }
    }
}

impl From<String> for FriendId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Roster fingerprint.
///
/// XOR of a per-friend digest over (id, has-location, sharing-enabled), so
/// it is independent of insertion order and can be updated one entry at a
/// time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn toggle(&mut self, digest: &[u8; 32]) {
        for (acc, byte) in self.0.iter_mut().zip(digest) {
            *acc ^= byte;
        }
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A roster entry: sharing flag plus the latest accepted sample, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendEntry {
    /// Whether the friend shares their location.
    pub sharing_enabled: bool,
    /// Latest accepted sample.
    pub sample: Option<FriendLocationSample>,
}

impl FriendEntry {
    fn digest(&self, id: &FriendId) -> [u8; 32] {
        let mut hasher = Blake2s256::new();
        hasher.update((id.0.len() as u64).to_le_bytes());
        hasher.update(id.0.as_bytes());
        hasher.update([self.sample.is_some() as u8, self.sharing_enabled as u8]);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}

/// Result of offering a sample to the roster.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Stored. Carries the sample it replaced.
    Accepted {
        /// Previously stored sample.
        previous: Option<FriendLocationSample>,
        /// Whether the friend was added to the roster by this sample.
        joined: bool,
    },
    /// Older than the stored sample; dropped.
    Superseded,
    /// Friend does not share their location; dropped.
    SharingDisabled,
}

/// Result of a roster membership update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    /// Friend was not on the roster.
    Added,
    /// Sharing flag changed.
    Updated,
    /// Nothing changed.
    Unchanged,
}

/// The current roster keyed by friend id, with an incrementally maintained
/// fingerprint.
#[derive(Debug, Clone, Default)]
pub struct FriendSet {
    entries: BTreeMap<FriendId, FriendEntry>,
    fingerprint: Fingerprint,
}

impl FriendSet {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of friends on the roster.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Look up a friend.
    pub fn get(&self, id: &FriendId) -> Option<&FriendEntry> {
        self.entries.get(id)
    }

    /// Whether a friend is on the roster.
    pub fn contains(&self, id: &FriendId) -> bool {
        self.entries.contains_key(id)
    }

    /// Friend ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &FriendId> {
        self.entries.keys()
    }

    /// Friends with a location, in ascending id order.
    pub fn located(&self) -> impl Iterator<Item = &FriendLocationSample> {
        self.entries.values().filter_map(|entry| entry.sample.as_ref())
    }

    /// Number of friends with a location.
    pub fn located_count(&self) -> usize {
        self.located().count()
    }

    /// Add a friend or update their sharing flag. Disabling sharing drops the
    /// stored sample.
    pub fn upsert(&mut self, member: RosterMember) -> RosterChange {
        let RosterMember {
            friend_id,
            sharing_enabled,
        } = member;

        match self.entries.get(&friend_id) {
            Some(entry) if entry.sharing_enabled == sharing_enabled => RosterChange::Unchanged,
            Some(entry) => {
                let sample = if sharing_enabled {
                    entry.sample.clone()
                } else {
                    None
                };
                self.replace(
                    friend_id,
                    FriendEntry {
                        sharing_enabled,
                        sample,
                    },
                );
                RosterChange::Updated
            }
            None => {
                self.replace(
                    friend_id,
                    FriendEntry {
                        sharing_enabled,
                        sample: None,
                    },
                );
                RosterChange::Added
            }
        }
    }

    /// Remove a friend from the roster.
    pub fn remove(&mut self, id: &FriendId) -> Option<FriendEntry> {
        let entry = self.entries.remove(id)?;
        self.fingerprint.toggle(&entry.digest(id));
        Some(entry)
    }

    /// Replace the whole roster, keeping samples of members that stay and
    /// still share. Returns the ids that were removed.
    pub fn replace_roster(&mut self, members: Vec<RosterMember>) -> Vec<FriendId> {
        let keep: std::collections::BTreeSet<&FriendId> =
            members.iter().map(|m| &m.friend_id).collect();
        let removed: Vec<FriendId> = self
            .entries
            .keys()
            .filter(|id| !keep.contains(id))
            .cloned()
            .collect();
        for id in &removed {
            self.remove(id);
        }
        for member in members {
            self.upsert(member);
        }
        removed
    }

    /// Offer a new sample. Unknown friends join the roster with sharing
    /// enabled; samples older than the stored one are dropped.
    pub fn apply_sample(&mut self, sample: FriendLocationSample) -> SampleOutcome {
        let (previous, joined) = match self.entries.get(&sample.friend_id) {
            Some(entry) if !entry.sharing_enabled => return SampleOutcome::SharingDisabled,
            Some(FriendEntry {
                sample: Some(current),
                ..
            }) if current.captured_at > sample.captured_at => return SampleOutcome::Superseded,
            Some(entry) => (entry.sample.clone(), false),
            None => (None, true),
        };

        let id = sample.friend_id.clone();
        self.replace(
            id,
            FriendEntry {
                sharing_enabled: true,
                sample: Some(sample),
            },
        );
        SampleOutcome::Accepted { previous, joined }
    }

    fn replace(&mut self, id: FriendId, entry: FriendEntry) {
        let digest = entry.digest(&id);
        if let Some(old) = self.entries.get(&id) {
            self.fingerprint.toggle(&old.digest(&id));
        }
        self.fingerprint.toggle(&digest);
        self.entries.insert(id, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(id: &str, lat: f64, at: Instant) -> FriendLocationSample {
        FriendLocationSample::new(FriendId::new(id), GeoPoint::new(lat, 0.0), 5.0, at)
    }

    fn full_rehash(set: &FriendSet) -> Fingerprint {
        let mut fp = Fingerprint::default();
        for (id, entry) in &set.entries {
            fp.toggle(&entry.digest(id));
        }
        fp
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let mut a = FriendSet::new();
        a.upsert(RosterMember::sharing("alice"));
        a.upsert(RosterMember::sharing("bob"));

        let mut b = FriendSet::new();
        b.upsert(RosterMember::sharing("bob"));
        b.upsert(RosterMember::sharing("alice"));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(hex::encode(a.fingerprint().as_bytes()), hex::encode([0u8; 32]));
    }

    #[test]
    fn test_fingerprint_tracks_location_presence_not_position() {
        let now = Instant::now();
        let mut set = FriendSet::new();
        set.upsert(RosterMember::sharing("alice"));
        let without = set.fingerprint();

        set.apply_sample(sample("alice", 10.0, now));
        let with = set.fingerprint();
        assert_ne!(without, with);

        set.apply_sample(sample("alice", 11.0, now + Duration::from_secs(1)));
        assert_eq!(set.fingerprint(), with);
    }

    #[test]
    fn test_incremental_fingerprint_matches_rehash() {
        let now = Instant::now();
        let mut set = FriendSet::new();
        set.upsert(RosterMember::sharing("a"));
        set.upsert(RosterMember::hidden("b"));
        set.apply_sample(sample("c", 1.0, now));
        set.upsert(RosterMember::sharing("b"));
        set.remove(&FriendId::new("a"));
        set.upsert(RosterMember::hidden("c"));
        assert_eq!(set.fingerprint(), full_rehash(&set));
    }

    #[test]
    fn test_remove_restores_fingerprint() {
        let mut set = FriendSet::new();
        set.upsert(RosterMember::sharing("alice"));
        let before = set.fingerprint();
        set.upsert(RosterMember::sharing("bob"));
        set.remove(&FriendId::new("bob"));
        assert_eq!(set.fingerprint(), before);
    }

    #[test]
    fn test_disabling_sharing_drops_sample() {
        let now = Instant::now();
        let mut set = FriendSet::new();
        set.apply_sample(sample("alice", 1.0, now));
        assert_eq!(set.located_count(), 1);

        assert_eq!(set.upsert(RosterMember::hidden("alice")), RosterChange::Updated);
        assert_eq!(set.located_count(), 0);
        assert_eq!(
            set.apply_sample(sample("alice", 2.0, now)),
            SampleOutcome::SharingDisabled
        );
    }

    #[test]
    fn test_older_sample_is_superseded() {
        let now = Instant::now();
        let mut set = FriendSet::new();
        set.apply_sample(sample("alice", 1.0, now + Duration::from_secs(5)));
        assert_eq!(set.apply_sample(sample("alice", 2.0, now)), SampleOutcome::Superseded);
        let stored = set.get(&FriendId::new("alice")).and_then(|e| e.sample.as_ref());
        assert_eq!(stored.map(|s| s.position.latitude), Some(1.0));
    }

    #[test]
    fn test_sample_for_unknown_friend_joins() {
        let mut set = FriendSet::new();
        let outcome = set.apply_sample(sample("carol", 1.0, Instant::now()));
        assert_eq!(
            outcome,
            SampleOutcome::Accepted {
                previous: None,
                joined: true
            }
        );
        assert!(set.get(&FriendId::new("carol")).is_some_and(|e| e.sharing_enabled));
    }

    #[test]
    fn test_replace_roster_reports_removed() {
        let now = Instant::now();
        let mut set = FriendSet::new();
        set.apply_sample(sample("a", 1.0, now));
        set.upsert(RosterMember::sharing("b"));

        let removed =
            set.replace_roster(vec![RosterMember::sharing("a"), RosterMember::sharing("c")]);
        assert_eq!(removed, vec![FriendId::new("b")]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.located_count(), 1);
    }

    #[test]
    fn test_speed_derives_moving() {
        let s = sample("a", 0.0, Instant::now()).with_speed(3.0).with_heading(-90.0);
        assert!(s.is_moving);
        assert_eq!(s.heading_degrees, Some(270.0));
        let s = s.with_speed(0.1);
        assert!(!s.is_moving);
    }

    #[test]
    fn test_validation() {
        assert!(GeoPoint::new(91.0, 0.0).validate().is_err());
        assert!(GeoPoint::new(0.0, f64::NAN).validate().is_err());
        assert!(GeoPoint::new(-45.0, 179.9).validate().is_ok());
        let bad =
            FriendLocationSample::new("a".into(), GeoPoint::new(0.0, 0.0), -1.0, Instant::now());
        assert!(matches!(bad.validate(), Err(InputError::InvalidAccuracy(_))));
    }
}
