//! Collaborator interfaces.
//!
//! The engine does not talk to any particular database. Implement
//! [`FriendFeed`] over whatever push-capable channel the backend offers.

use std::future::Future;

use super::error::FeedError;
use super::types::{FriendId, FriendLocationSample, RosterMember, UserId};

/// One item from the remote friend feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A new location sample for a friend.
    Sample(FriendLocationSample),
    /// A friend joined the roster or changed their sharing flag.
    RosterUpsert(RosterMember),
    /// A friend left the roster.
    RosterRemove(FriendId),
    /// Full roster resync, typically sent right after (re)subscribing.
    RosterReplaced(Vec<RosterMember>),
    /// Transport-level liveness signal. Carries no data.
    Heartbeat,
}

impl FeedEvent {
    /// Whether the event carries data for the sequencer (everything but
    /// heartbeats).
    pub fn is_data(&self) -> bool {
        !matches!(self, FeedEvent::Heartbeat)
    }
}

/// Source of friend-location deltas keyed by user id.
///
/// # Example
///
/// ```ignore
/// struct FirestoreFeed { client: Client }
///
/// impl FriendFeed for FirestoreFeed {
///     type Subscription = FirestoreListener;
///
///     async fn subscribe(&self, user: &UserId) -> Result<Self::Subscription, FeedError> {
///         self.client.listen(user.as_str()).await.map_err(|e| FeedError::Network(e.to_string()))
///     }
/// }
/// ```
pub trait FriendFeed: Send + Sync + 'static {
    /// Live subscription handle. Dropping it unsubscribes.
    type Subscription: FeedSubscription;

    /// Open a subscription for `user`.
    fn subscribe(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<Self::Subscription, FeedError>> + Send;
}

/// An open subscription yielding feed events.
pub trait FeedSubscription: Send + 'static {
    /// Wait for the next event.
    ///
    /// `None` means the remote closed the stream; the supervisor treats it as
    /// a transport failure and reconnects.
    ///
    /// Must be cancel-safe: the supervisor races it against the heartbeat
    /// timer, and a dropped future must not lose an event.
    fn next_event(&mut self) -> impl Future<Output = Option<Result<FeedEvent, FeedError>>> + Send;
}
