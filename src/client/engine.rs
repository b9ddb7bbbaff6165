//! The proximity engine.
//!
//! One sequencer task owns the [`SyncOrchestrator`] and the
//! [`RetryCoordinator`]. Feed events, commands from the handle, connection
//! transitions, reachability changes, quiet-period timers, and retry
//! completions are all multiplexed onto it, so state is never shared and
//! never locked. The [`ConnectionSupervisor`] runs beside it and forwards
//! feed events over a channel.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::config::EngineConfig;
use crate::core::{
    EVENT_CHANNEL_CAPACITY, EngineError, ExecuteError, FeedEvent, FriendFeed, UserId,
    UserLocation,
};
use crate::proximity::ProximitySnapshot;
use crate::retry::{Action, ActionId, ExecuteOutcome, ExecuteReply, QueueEvent, RetryCoordinator};
use crate::sync::{FriendUpdate, SyncOrchestrator};
use crate::transport::{ConnectionFailure, ConnectionState, ConnectionSupervisor};

enum Command {
    UpdateUserLocation(UserLocation),
    Refresh,
    Execute {
        action: Action,
        reply: ExecuteReply,
    },
    Cancel {
        id: ActionId,
        reply: oneshot::Sender<bool>,
    },
    QueueDepth {
        reply: oneshot::Sender<usize>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Local clock reading on the tokio timeline (honours paused test time).
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Handle to a running engine.
///
/// Dropping the handle without calling [`ProximityEngine::stop`] aborts
/// the background tasks.
pub struct ProximityEngine<F: FriendFeed> {
    user_id: UserId,
    supervisor: ConnectionSupervisor<F>,
    commands: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
    snapshot_rx: watch::Receiver<Option<Arc<ProximitySnapshot>>>,
    events_tx: broadcast::Sender<FriendUpdate>,
    queue_tx: broadcast::Sender<QueueEvent>,
}

impl<F: FriendFeed> ProximityEngine<F> {
    /// Validate `config`, subscribe to `feed` for `user_id`, and spawn the
    /// sequencer.
    ///
    /// `reachability` is the network reachability signal. With `None`, the
    /// feed connection stands in for it: a failed connection counts as
    /// offline and a re-established one as online. Must be called from
    /// within a tokio runtime.
    pub fn start(
        feed: F,
        user_id: UserId,
        config: EngineConfig,
        reachability: Option<watch::Receiver<bool>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let (feed_tx, feed_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut supervisor = ConnectionSupervisor::new(
            Arc::new(feed),
            user_id.clone(),
            config.supervisor,
            feed_tx,
        );

        let orchestrator = SyncOrchestrator::new(config.orchestrator);
        let follow_connection = reachability.is_none();
        let reachability = reachability.unwrap_or_else(|| watch::channel(true).1);
        let online = *reachability.borrow();
        let coordinator = RetryCoordinator::new(config.retry, online);

        let (commands, command_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let snapshot_rx = orchestrator.subscribe_snapshot();
        let events_tx = orchestrator.event_sender();
        let queue_tx = coordinator.event_sender();

        let sequencer = Sequencer {
            orchestrator,
            coordinator,
            commands: command_rx,
            feed: feed_rx,
            connection: supervisor.subscribe_state(),
            last_connection: ConnectionState::Disconnected,
            follow_connection,
            reachability,
        };
        let task = tokio::spawn(sequencer.run());
        supervisor.start();
        tracing::info!(user = %user_id, online, "proximity engine started");

        Ok(Self {
            user_id,
            supervisor,
            commands,
            task: Some(task),
            snapshot_rx,
            events_tx,
            queue_tx,
        })
    }

    /// The user this engine subscribes for.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Whether the engine is running.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Feed a new location from the location source.
    pub async fn update_user_location(&self, location: UserLocation) -> Result<(), EngineError> {
        location.validate()?;
        self.send(Command::UpdateUserLocation(location)).await
    }

    /// Recompute now, bypassing the throttle.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        self.send(Command::Refresh).await
    }

    /// Run a write operation with retry, queuing it if the device is
    /// offline when retries run out.
    pub async fn execute(&self, action: Action) -> Result<ExecuteOutcome, ExecuteError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Execute { action, reply })
            .await
            .map_err(|_| ExecuteError::Shutdown)?;
        outcome.await.map_err(|_| ExecuteError::Shutdown)?
    }

    /// Cancel a queued action. Returns whether it was still queued.
    pub async fn cancel_queued(&self, id: ActionId) -> Result<bool, EngineError> {
        let (reply, cancelled) = oneshot::channel();
        self.send(Command::Cancel { id, reply }).await?;
        cancelled.await.map_err(|_| EngineError::Shutdown)
    }

    /// Number of queued actions.
    pub async fn queue_depth(&self) -> Result<usize, EngineError> {
        let (reply, depth) = oneshot::channel();
        self.send(Command::QueueDepth { reply }).await?;
        depth.await.map_err(|_| EngineError::Shutdown)
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Observe connection state. Late subscribers see the current state only.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe_state()
    }

    /// Observe failed connection attempts.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ConnectionFailure> {
        self.supervisor.subscribe_failures()
    }

    /// Observe friend updates.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FriendUpdate> {
        self.events_tx.subscribe()
    }

    /// Observe queue changes.
    pub fn subscribe_queue(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue_tx.subscribe()
    }

    /// Observe the latest snapshot.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<ProximitySnapshot>>> {
        self.snapshot_rx.clone()
    }

    /// Latest snapshot, if one was computed. Immutable and safe to keep.
    pub fn snapshot(&self) -> Option<Arc<ProximitySnapshot>> {
        self.snapshot_rx.borrow().clone()
    }

    /// Stop the supervisor, then the sequencer, and wait for both.
    ///
    /// After this returns nothing new is published on any stream, and
    /// commands fail with a shutdown error.
    pub async fn stop(&mut self) {
        self.supervisor.stop().await;
        let Some(task) = self.task.take() else {
            return;
        };
        let (reply, stopped) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            // Err only if the sequencer already exited.
            let _ = stopped.await;
        }
        if let Err(error) = task.await {
            if error.is_panic() {
                tracing::error!(%error, "engine sequencer panicked");
            }
        }
        tracing::info!(user = %self.user_id, "proximity engine stopped");
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Shutdown)
    }
}

impl<F: FriendFeed> Drop for ProximityEngine<F> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Sequencer {
    orchestrator: SyncOrchestrator,
    coordinator: RetryCoordinator,
    commands: mpsc::Receiver<Command>,
    feed: mpsc::Receiver<FeedEvent>,
    connection: watch::Receiver<ConnectionState>,
    last_connection: ConnectionState,
    follow_connection: bool,
    reachability: watch::Receiver<bool>,
}

impl Sequencer {
    async fn run(mut self) {
        let mut connection_open = true;
        let mut reachability_open = true;

        loop {
            let quiet_at = self
                .orchestrator
                .next_quiet_deadline()
                .map(Instant::from_std);
            let quiet = tokio::time::sleep_until(quiet_at.unwrap_or_else(Instant::now));

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("engine handle dropped, sequencer exiting");
                        self.coordinator.shutdown();
                        break;
                    };
                    if !self.handle(command) {
                        break;
                    }
                }
                Some(event) = self.feed.recv() => {
                    self.orchestrator.handle_feed_event(event, now());
                }
                changed = self.connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let state = *self.connection.borrow_and_update();
                        self.on_connection(state);
                    }
                    Err(_) => connection_open = false,
                },
                changed = self.reachability.changed(), if reachability_open => match changed {
                    Ok(()) => {
                        let online = *self.reachability.borrow_and_update();
                        self.coordinator.set_online(online);
                    }
                    Err(_) => reachability_open = false,
                },
                () = quiet, if quiet_at.is_some() => {
                    self.orchestrator.expire_quiet(now());
                }
                completion = self.coordinator.next_completion() => {
                    self.coordinator.on_completion(completion);
                }
            }
        }
    }

    fn on_connection(&mut self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.last_connection, state);
        if !self.follow_connection {
            if state == ConnectionState::Connected {
                self.coordinator.on_connectivity_restored();
            }
            return;
        }
        match state {
            ConnectionState::Connected | ConnectionState::Degraded => {
                self.coordinator.set_online(true);
            }
            ConnectionState::Failed => self.coordinator.set_online(false),
            // A reconnect attempt straight out of a live subscription means
            // the Failed transition was coalesced away.
            ConnectionState::Connecting if previous.is_subscribed() => {
                self.coordinator.set_online(false);
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }
    }

    /// Apply one command. Returns `false` once the sequencer should exit.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::UpdateUserLocation(location) => {
                if let Err(error) = self.orchestrator.update_user_location(location, now()) {
                    tracing::warn!(%error, "dropping invalid user location");
                }
            }
            Command::Refresh => self.orchestrator.refresh(now()),
            Command::Execute { action, reply } => {
                self.coordinator.submit(action, reply);
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.coordinator.cancel(id));
            }
            Command::QueueDepth { reply } => {
                let _ = reply.send(self.coordinator.queue_depth());
            }
            Command::Stop { reply } => {
                self.coordinator.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}
