//! Engine defaults.
//!
//! Every configurable knob takes its default from here. Values that are not
//! configurable (earth radius, channel capacities) are fixed.

use std::time::Duration;

// =============================================================================
// GEODESY
// =============================================================================

/// Mean earth radius used by the spherical (haversine) approximation.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Speed above which a sample is considered moving when the feed does not
/// say so explicitly.
pub const MOVING_SPEED_THRESHOLD_MPS: f64 = 0.5;

// =============================================================================
// PROXIMITY THROTTLE
// =============================================================================

/// Recompute at least this often while deltas keep arriving.
pub const DEFAULT_RECOMPUTE_INTERVAL: Duration = Duration::from_millis(10_000);

/// Recompute when the user has moved further than this since the last
/// computation.
pub const DEFAULT_MOVEMENT_THRESHOLD_METERS: f64 = 20.0;

/// Upper bound on friends processed by a single computation.
pub const DEFAULT_MAX_PROCESSED_FRIENDS: usize = 1000;

// =============================================================================
// FRIEND TRACKING
// =============================================================================

/// Position changes at or below this are treated as GPS jitter.
pub const DEFAULT_JITTER_THRESHOLD_METERS: f64 = 2.0;

/// A moving friend with no new sample for this long settles back to idle.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5);

// =============================================================================
// CONNECTION SUPERVISION
// =============================================================================

/// First reconnect delay.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Jitter applied to every backoff delay (fraction, ±).
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.2;

/// Connected with no liveness signal for this long means degraded.
pub const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(30);

/// Bound on a single subscribe attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// WRITE RETRY
// =============================================================================

/// Attempts per write before giving up (or queueing when offline).
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first write retry.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Write retry delay ceiling (1s, 2s, 4s).
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(4);

// =============================================================================
// CHANNELS
// =============================================================================

/// Capacity of broadcast event streams and the sequencer inbox.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
