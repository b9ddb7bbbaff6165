//! Connection supervision for the remote friend feed.
//!
//! [`ConnectionSupervisor`] owns one logical subscription and its
//! [`ConnectionState`]. A single driver task performs every transition, so
//! transitions never overlap:
//!
//! ```text
//!  Disconnected ──start()──▶ Connecting ──ok──▶ Connected ◀──liveness──┐
//!                               ▲   │                │                   │
//!                               │  err         no liveness in W          │
//!                               │   ▼                ▼                   │
//!                   backoff ── Failed ◀──err── Degraded ─────────────────┘
//! ```
//!
//! Any state goes to `Disconnected` on `stop()`, which is the only terminal
//! transition.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use crate::core::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_WINDOW, EVENT_CHANNEL_CAPACITY, FeedError,
    FeedEvent, FeedSubscription, FriendFeed, UserId,
};

/// Feed connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not subscribed.
    Disconnected,
    /// Subscribe attempt in progress.
    Connecting,
    /// Subscribed and receiving liveness.
    Connected,
    /// Subscribed, but no liveness within the heartbeat window. Data already
    /// received stays usable.
    Degraded,
    /// Last attempt failed; a reconnect is scheduled.
    Failed,
}

impl ConnectionState {
    /// Whether a subscription is open (connected or degraded).
    pub fn is_subscribed(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Structured record of a failed attempt, published with every `Failed`
/// transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionFailure {
    /// Consecutive failures including this one.
    pub attempt: u32,
    /// Delay before the next attempt.
    pub retry_in: Duration,
    /// Underlying cause.
    pub error: FeedError,
}

/// Supervisor configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SupervisorConfig {
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Liveness window before `Degraded`.
    pub heartbeat_window: Duration,
    /// Bound on a single subscribe attempt.
    pub connect_timeout: Duration,
    /// Fixed jitter seed (tests); `None` seeds from the OS.
    pub jitter_seed: Option<u64>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::reconnect(),
            heartbeat_window: DEFAULT_HEARTBEAT_WINDOW,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            jitter_seed: None,
        }
    }
}

impl SupervisorConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), String> {
        self.backoff.validate()?;
        if self.heartbeat_window.is_zero() {
            return Err("heartbeat window must be non-zero".into());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect timeout must be non-zero".into());
        }
        Ok(())
    }
}

/// Owns the feed subscription and its connection state.
///
/// Data events (everything except heartbeats) are forwarded to the
/// `events` channel given at construction.
pub struct ConnectionSupervisor<F: FriendFeed> {
    feed: Arc<F>,
    user_id: UserId,
    config: SupervisorConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    failure_tx: broadcast::Sender<ConnectionFailure>,
    events_tx: mpsc::Sender<FeedEvent>,
    task: Option<JoinHandle<()>>,
}

impl<F: FriendFeed> ConnectionSupervisor<F> {
    /// Create a stopped supervisor.
    pub fn new(
        feed: Arc<F>,
        user_id: UserId,
        config: SupervisorConfig,
        events_tx: mpsc::Sender<FeedEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (failure_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            feed,
            user_id,
            config,
            state_tx: Arc::new(state_tx),
            failure_tx,
            events_tx,
            task: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions. New receivers see the current state only.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Observe failed attempts.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ConnectionFailure> {
        self.failure_tx.subscribe()
    }

    /// Whether the driver task is running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Begin subscribing. No-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let driver = Driver {
            feed: Arc::clone(&self.feed),
            user_id: self.user_id.clone(),
            heartbeat_window: self.config.heartbeat_window,
            connect_timeout: self.config.connect_timeout,
            backoff: ExponentialBackoff::from_seed(
                self.config.backoff.clone(),
                self.config.jitter_seed,
            ),
            state_tx: Arc::clone(&self.state_tx),
            failure_tx: self.failure_tx.clone(),
            events_tx: self.events_tx.clone(),
        };
        tracing::debug!(user = %self.user_id, "starting feed supervisor");
        self.task = Some(tokio::spawn(driver.run()));
    }

    /// Tear down the subscription and any pending reconnect.
    ///
    /// When this returns the driver task has exited, the state is
    /// `Disconnected`, and nothing further is published.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancellation or a clean exit, either way the task is gone.
            let _ = task.await;
        }
        publish(&self.state_tx, ConnectionState::Disconnected);
        tracing::debug!(user = %self.user_id, "feed supervisor stopped");
    }
}

impl<F: FriendFeed> Drop for ConnectionSupervisor<F> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn publish(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        tracing::debug!(from = %current, to = %next, "connection state transition");
        *current = next;
        true
    });
}

enum PumpExit {
    /// The subscription failed or closed; reconnect.
    Failed(FeedError),
    /// Nobody consumes events anymore; stop.
    ConsumerGone,
}

struct Driver<F: FriendFeed> {
    feed: Arc<F>,
    user_id: UserId,
    heartbeat_window: Duration,
    connect_timeout: Duration,
    backoff: ExponentialBackoff,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    failure_tx: broadcast::Sender<ConnectionFailure>,
    events_tx: mpsc::Sender<FeedEvent>,
}

impl<F: FriendFeed> Driver<F> {
    async fn run(mut self) {
        loop {
            publish(&self.state_tx, ConnectionState::Connecting);

            let subscribed =
                tokio::time::timeout(self.connect_timeout, self.feed.subscribe(&self.user_id))
                    .await;
            let error = match subscribed {
                Ok(Ok(subscription)) => {
                    self.backoff.reset();
                    publish(&self.state_tx, ConnectionState::Connected);
                    tracing::info!(user = %self.user_id, "feed subscription established");
                    match self.pump(subscription).await {
                        PumpExit::Failed(error) => error,
                        PumpExit::ConsumerGone => {
                            publish(&self.state_tx, ConnectionState::Disconnected);
                            tracing::debug!("event consumer dropped, supervisor exiting");
                            return;
                        }
                    }
                }
                Ok(Err(error)) => error,
                Err(_) => FeedError::Timeout,
            };

            publish(&self.state_tx, ConnectionState::Failed);
            let retry_in = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            tracing::warn!(
                user = %self.user_id,
                attempt,
                ?retry_in,
                %error,
                "feed connection failed, scheduling reconnect"
            );
            // No failure subscribers is fine.
            let _ = self.failure_tx.send(ConnectionFailure {
                attempt,
                retry_in,
                error,
            });
            tokio::time::sleep(retry_in).await;
        }
    }

    async fn pump(&mut self, mut subscription: F::Subscription) -> PumpExit {
        let mut deadline = Instant::now() + self.heartbeat_window;
        let mut degraded = false;

        loop {
            tokio::select! {
                next = subscription.next_event() => match next {
                    Some(Ok(event)) => {
                        deadline = Instant::now() + self.heartbeat_window;
                        if degraded {
                            degraded = false;
                            publish(&self.state_tx, ConnectionState::Connected);
                            tracing::info!(user = %self.user_id, "feed liveness restored");
                        }
                        if event.is_data() && self.events_tx.send(event).await.is_err() {
                            return PumpExit::ConsumerGone;
                        }
                    }
                    Some(Err(error)) => return PumpExit::Failed(error),
                    None => return PumpExit::Failed(FeedError::Closed),
                },
                () = tokio::time::sleep_until(deadline), if !degraded => {
                    degraded = true;
                    publish(&self.state_tx, ConnectionState::Degraded);
                    tracing::warn!(
                        user = %self.user_id,
                        window = ?self.heartbeat_window,
                        "no feed liveness within heartbeat window"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FriendId, FriendLocationSample, GeoPoint, RosterMember};
    use crate::testing::{ScriptedFeed, SubscribeOutcome};
    use tokio::sync::broadcast::error::TryRecvError;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            jitter_seed: Some(11),
            ..SupervisorConfig::default()
        }
    }

    fn supervisor(
        feed: &ScriptedFeed,
        config: SupervisorConfig,
    ) -> (ConnectionSupervisor<ScriptedFeed>, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let sup = ConnectionSupervisor::new(Arc::new(feed.clone()), UserId::new("me"), config, tx);
        (sup, rx)
    }

    async fn wait_for(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
        rx.wait_for(|s| *s == state)
            .await
            .unwrap_or_else(|_| panic!("state channel closed waiting for {state}"));
    }

    fn within(delay: Duration, nominal: Duration, jitter: f64) -> bool {
        let d = delay.as_secs_f64();
        let n = nominal.as_secs_f64();
        d >= n * (1.0 - jitter) - 1e-9 && d <= n * (1.0 + jitter) + 1e-9
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_forwards_data_events() {
        let feed = ScriptedFeed::accepting();
        let (mut sup, mut events) = supervisor(&feed, config());
        let mut state = sup.subscribe_state();
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        sup.start();
        wait_for(&mut state, ConnectionState::Connected).await;

        let sample = FriendLocationSample::new(
            FriendId::new("f1"),
            GeoPoint::new(1.0, 2.0),
            3.0,
            std::time::Instant::now(),
        );
        assert!(feed.send(FeedEvent::Heartbeat));
        assert!(feed.send(FeedEvent::RosterUpsert(RosterMember::sharing("f1"))));
        assert!(feed.send(FeedEvent::Sample(sample.clone())));

        assert_eq!(
            events.recv().await,
            Some(FeedEvent::RosterUpsert(RosterMember::sharing("f1")))
        );
        assert_eq!(events.recv().await, Some(FeedEvent::Sample(sample)));
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_without_liveness_then_recovers() {
        let feed = ScriptedFeed::accepting();
        let (mut sup, _events) = supervisor(&feed, config());
        let mut state = sup.subscribe_state();

        sup.start();
        wait_for(&mut state, ConnectionState::Connected).await;
        let connected_at = Instant::now();

        wait_for(&mut state, ConnectionState::Degraded).await;
        assert!(connected_at.elapsed() >= DEFAULT_HEARTBEAT_WINDOW);

        assert!(feed.send(FeedEvent::Heartbeat));
        wait_for(&mut state, ConnectionState::Connected).await;
        assert_eq!(feed.subscribe_calls(), 1);
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_then_resets_after_connect() {
        let feed = ScriptedFeed::accepting();
        let refused = FeedError::Network("refused".into());
        feed.push_outcome(SubscribeOutcome::Reject(refused.clone()));
        feed.push_outcome(SubscribeOutcome::Reject(refused.clone()));
        feed.push_outcome(SubscribeOutcome::Reject(refused.clone()));

        let cfg = config();
        let backoff = cfg.backoff.clone();
        let (mut sup, _events) = supervisor(&feed, cfg);
        let mut failures = sup.subscribe_failures();
        let mut state = sup.subscribe_state();
        sup.start();

        for attempt in 1..=3u32 {
            let failure = failures.recv().await.unwrap();
            assert_eq!(failure.attempt, attempt);
            assert_eq!(failure.error, refused);
            assert!(within(failure.retry_in, backoff.nominal(attempt - 1), backoff.jitter));
        }

        wait_for(&mut state, ConnectionState::Connected).await;
        assert!(feed.fail_active(FeedError::Network("reset".into())));

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.attempt, 1);
        assert!(within(failure.retry_in, backoff.base_delay, backoff.jitter));
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delay_never_exceeds_max() {
        let feed = ScriptedFeed::failing();
        let cfg = config();
        let max = cfg.backoff.max_delay;
        let (mut sup, _events) = supervisor(&feed, cfg);
        let mut failures = sup.subscribe_failures();
        sup.start();

        for _ in 0..15 {
            let failure = failures.recv().await.unwrap();
            assert!(failure.retry_in <= max, "{:?} > {max:?}", failure.retry_in);
        }
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_a_failure() {
        let feed = ScriptedFeed::accepting();
        feed.push_outcome(SubscribeOutcome::Hang);
        let (mut sup, _events) = supervisor(&feed, config());
        let mut failures = sup.subscribe_failures();
        let mut state = sup.subscribe_state();
        sup.start();

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.error, FeedError::Timeout);
        wait_for(&mut state, ConnectionState::Connected).await;
        assert_eq!(feed.subscribe_calls(), 2);
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_triggers_reconnect() {
        let feed = ScriptedFeed::accepting();
        let (mut sup, _events) = supervisor(&feed, config());
        let mut failures = sup.subscribe_failures();
        let mut state = sup.subscribe_state();
        sup.start();

        wait_for(&mut state, ConnectionState::Connected).await;
        feed.close_active();
        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.error, FeedError::Closed);

        wait_for(&mut state, ConnectionState::Connected).await;
        assert_eq!(feed.subscribe_calls(), 2);
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_after_stop() {
        let feed = ScriptedFeed::failing();
        let (mut sup, mut events) = supervisor(&feed, config());
        let mut failures = sup.subscribe_failures();
        let mut state = sup.subscribe_state();
        sup.start();

        // Let it fail a couple of times so a backoff sleep is in flight.
        failures.recv().await.unwrap();
        failures.recv().await.unwrap();

        sup.stop().await;
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
        while failures.try_recv().is_ok() {}
        let calls = feed.subscribe_calls();

        tokio::time::sleep(Duration::from_secs(300)).await;

        assert!(!state.has_changed().unwrap_or(true));
        assert!(matches!(failures.try_recv(), Err(TryRecvError::Empty)));
        assert!(events.try_recv().is_err());
        assert_eq!(feed.subscribe_calls(), calls);
        assert!(!sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_restartable() {
        let feed = ScriptedFeed::accepting();
        let (mut sup, _events) = supervisor(&feed, config());
        let mut state = sup.subscribe_state();

        sup.start();
        sup.start();
        wait_for(&mut state, ConnectionState::Connected).await;
        assert_eq!(feed.subscribe_calls(), 1);

        sup.stop().await;
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        sup.start();
        wait_for(&mut state, ConnectionState::Connected).await;
        assert_eq!(feed.subscribe_calls(), 2);
        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_exits_when_consumer_dropped() {
        let feed = ScriptedFeed::accepting();
        let (mut sup, events) = supervisor(&feed, config());
        let mut state = sup.subscribe_state();
        sup.start();
        wait_for(&mut state, ConnectionState::Connected).await;

        drop(events);
        assert!(feed.send(FeedEvent::RosterRemove(FriendId::new("x"))));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!sup.is_running());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        sup.stop().await;
    }
}
