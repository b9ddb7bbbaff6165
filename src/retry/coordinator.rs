//! Retry coordinator.
//!
//! Runs write operations under the [`RetryPolicy`], queues transient
//! failures while offline, and replays the queue strictly in order when
//! connectivity returns.
//!
//! All bookkeeping happens through `&mut self` on the engine's sequencer.
//! Attempts run in spawned tasks; their final disposition comes back
//! through [`RetryCoordinator::next_completion`] and is applied with
//! [`RetryCoordinator::on_completion`].

use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::policy::RetryPolicy;
use super::queue::{Action, ActionId, ActionQueue, QueuedAction};
use crate::core::{
    EVENT_CHANNEL_CAPACITY, ErrorClass, ExecuteError, OperationError, RetryFailure,
};

/// Non-error result of `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The operation succeeded.
    Completed,
    /// The device is offline; the operation will be replayed later.
    Queued(ActionId),
}

/// A queued action that finally succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedActionCompleted {
    /// Identity.
    pub id: ActionId,
    /// Description of the operation.
    pub description: String,
    /// When it was first queued.
    pub enqueued_at: Instant,
    /// Time from enqueue to completion.
    pub latency: Duration,
    /// Replays it took, including the successful one.
    pub replays: u32,
}

/// What happened to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEventKind {
    /// An action was queued for later replay.
    Enqueued {
        /// Identity.
        id: ActionId,
        /// Description of the operation.
        description: String,
    },
    /// A replay failed while offline; the action stays at the head.
    Requeued {
        /// Identity.
        id: ActionId,
        /// Why the replay failed.
        failure: RetryFailure,
    },
    /// A replay succeeded.
    Completed(QueuedActionCompleted),
    /// A replay failed terminally and needs user attention.
    Failed {
        /// Identity.
        id: ActionId,
        /// Why it failed.
        failure: RetryFailure,
    },
    /// A queued action was cancelled.
    Cancelled {
        /// Identity.
        id: ActionId,
    },
    /// A queued action was discarded because the coordinator shut down
    /// before it could be replayed.
    Discarded {
        /// Identity.
        id: ActionId,
        /// Description of the operation.
        description: String,
    },
}

/// A queue change with the resulting depth.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEvent {
    /// The change.
    pub kind: QueueEventKind,
    /// Depth after the change.
    pub depth: usize,
}

/// Reply channel for an `execute` call.
pub type ExecuteReply = oneshot::Sender<Result<ExecuteOutcome, ExecuteError>>;

/// Final disposition of a spawned attempt.
#[derive(Debug)]
pub struct Completion(CompletionKind);

#[derive(Debug)]
enum CompletionKind {
    Direct {
        id: ActionId,
        action: Action,
        reply: ExecuteReply,
        result: Result<(), RetryFailure>,
    },
    Replay {
        id: ActionId,
        result: Result<(), RetryFailure>,
    },
}

/// Classifies, retries, queues, and replays write operations.
#[derive(Debug)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    queue: ActionQueue,
    online: bool,
    next_id: u64,
    replaying: Option<ActionId>,
    direct: JoinSet<Completion>,
    replays: JoinSet<(ActionId, Result<(), RetryFailure>)>,
    events_tx: broadcast::Sender<QueueEvent>,
}

impl RetryCoordinator {
    /// Create a coordinator with an empty queue.
    pub fn new(policy: RetryPolicy, online: bool) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            policy,
            queue: ActionQueue::new(),
            online,
            next_id: 0,
            replaying: None,
            direct: JoinSet::new(),
            replays: JoinSet::new(),
            events_tx,
        }
    }

    /// Observe queue changes.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<QueueEvent> {
        self.events_tx.clone()
    }

    /// Whether the device is considered online.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Actions waiting (including one being replayed).
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Queued ids, head first.
    pub fn queued_ids(&self) -> Vec<ActionId> {
        self.queue.ids()
    }

    /// Start executing `action`. The outcome is sent on `reply` once the
    /// attempts finish.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&mut self, action: Action, reply: ExecuteReply) -> ActionId {
        self.next_id += 1;
        let id = ActionId::new(self.next_id);
        let policy = self.policy.clone();
        tracing::debug!(%id, operation = action.description(), "executing operation");

        self.direct.spawn(async move {
            let result = policy
                .run(action.description(), id.get(), || action.invoke())
                .await;
            Completion(CompletionKind::Direct {
                id,
                action,
                reply,
                result,
            })
        });
        id
    }

    /// Update the reachability flag. Going online drains the queue.
    pub fn set_online(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;
        tracing::info!(online, depth = self.queue.len(), "reachability changed");
        if online {
            self.drain();
        }
    }

    /// Connectivity-restored signal (e.g. the feed reconnected). Drains the
    /// queue if online.
    pub fn on_connectivity_restored(&mut self) {
        self.drain();
    }

    /// Remove a queued action. Returns whether it was queued.
    pub fn cancel(&mut self, id: ActionId) -> bool {
        if self.queue.remove(id).is_none() {
            return false;
        }
        if self.replaying == Some(id) {
            self.replays.abort_all();
            self.replaying = None;
        }
        tracing::info!(%id, depth = self.queue.len(), "queued action cancelled");
        self.publish(QueueEventKind::Cancelled { id });
        self.drain();
        true
    }

    /// Wait for the next spawned attempt to finish. Pending forever when
    /// nothing is in flight. Cancel-safe.
    pub async fn next_completion(&mut self) -> Completion {
        loop {
            tokio::select! {
                Some(joined) = self.direct.join_next() => match joined {
                    Ok(completion) => return completion,
                    Err(error) if error.is_cancelled() => {}
                    Err(error) => tracing::error!(%error, "operation task panicked"),
                },
                Some(joined) = self.replays.join_next() => match joined {
                    Ok((id, result)) => return Completion(CompletionKind::Replay { id, result }),
                    Err(error) if error.is_cancelled() => {}
                    Err(error) => {
                        tracing::error!(%error, "replay task panicked");
                        if let Some(id) = self.replaying {
                            let failure = self.panicked(id);
                            return Completion(CompletionKind::Replay {
                                id,
                                result: Err(failure),
                            });
                        }
                    }
                },
                else => std::future::pending::<()>().await,
            }
        }
    }

    /// Apply a finished attempt.
    pub fn on_completion(&mut self, completion: Completion) {
        match completion.0 {
            CompletionKind::Direct {
                id,
                action,
                reply,
                result,
            } => self.finish_direct(id, action, reply, result),
            CompletionKind::Replay { id, result } => self.finish_replay(id, result),
        }
    }

    /// Abort in-flight attempts and discard the queue, head first. Every
    /// discarded action is reported with a [`QueueEventKind::Discarded`].
    pub fn shutdown(&mut self) {
        self.direct.abort_all();
        self.replays.abort_all();
        self.replaying = None;
        if !self.queue.is_empty() {
            tracing::warn!(
                depth = self.queue.len(),
                ids = ?self.queue.ids(),
                "discarding queued actions on shutdown"
            );
        }
        while let Some(dropped) = self.queue.pop_front() {
            self.publish(QueueEventKind::Discarded {
                id: dropped.id,
                description: dropped.action.description().to_owned(),
            });
        }
    }

    fn finish_direct(
        &mut self,
        id: ActionId,
        action: Action,
        reply: ExecuteReply,
        result: Result<(), RetryFailure>,
    ) {
        let outcome = match result {
            Ok(()) => {
                tracing::debug!(%id, operation = action.description(), "operation completed");
                Ok(ExecuteOutcome::Completed)
            }
            Err(failure) if failure.class.is_retryable() && !self.online => {
                let description = action.description().to_owned();
                self.queue.push_back(QueuedAction {
                    id,
                    action,
                    enqueued_at: Instant::now(),
                    replays: 0,
                });
                tracing::info!(
                    %id,
                    operation = %description,
                    depth = self.queue.len(),
                    %failure,
                    "offline, operation queued for replay"
                );
                self.publish(QueueEventKind::Enqueued { id, description });
                Ok(ExecuteOutcome::Queued(id))
            }
            Err(failure) => {
                tracing::error!(%id, %failure, "operation failed");
                Err(ExecuteError::Failed(failure))
            }
        };
        if reply.send(outcome).is_err() {
            tracing::debug!(%id, "caller stopped waiting for outcome");
        }
    }

    fn finish_replay(&mut self, id: ActionId, result: Result<(), RetryFailure>) {
        if self.replaying == Some(id) {
            self.replaying = None;
        }

        match result {
            Ok(()) => match self.queue.remove(id) {
                Some(done) => {
                    let completed = QueuedActionCompleted {
                        id,
                        description: done.action.description().to_owned(),
                        enqueued_at: done.enqueued_at,
                        latency: done.enqueued_at.elapsed(),
                        replays: done.replays,
                    };
                    tracing::info!(
                        %id,
                        latency = ?completed.latency,
                        depth = self.queue.len(),
                        "queued action completed"
                    );
                    self.publish(QueueEventKind::Completed(completed));
                }
                None => tracing::debug!(%id, "replay finished for an action no longer queued"),
            },
            Err(failure) if failure.class.is_retryable() && !self.online => {
                if self.queue.contains(id) {
                    tracing::warn!(%id, %failure, "replay failed while offline, keeping at head");
                    self.publish(QueueEventKind::Requeued { id, failure });
                }
                // Draining resumes on the next connectivity signal.
                return;
            }
            Err(failure) => {
                if self.queue.remove(id).is_some() {
                    tracing::error!(%id, %failure, "queued action failed");
                    self.publish(QueueEventKind::Failed { id, failure });
                }
            }
        }
        self.drain();
    }

    fn drain(&mut self) {
        if !self.online || self.replaying.is_some() {
            return;
        }
        let depth = self.queue.len();
        let Some(head) = self.queue.front_mut() else {
            return;
        };
        head.replays += 1;
        let id = head.id;
        let replay = head.replays;
        let action = head.action.clone();
        self.replaying = Some(id);
        tracing::debug!(%id, replay, depth, "replaying queued action");

        let policy = self.policy.clone();
        let salt = id.get() ^ (u64::from(replay) << 32);
        self.replays.spawn(async move {
            let result = policy
                .run(action.description(), salt, || action.invoke())
                .await;
            (id, result)
        });
    }

    fn panicked(&self, id: ActionId) -> RetryFailure {
        let operation = self
            .queue
            .get(id)
            .map_or_else(|| id.to_string(), |queued| queued.action.description().to_owned());
        RetryFailure {
            operation,
            attempts: 0,
            class: ErrorClass::Permanent,
            cause: OperationError::Other("operation panicked".into()),
        }
    }

    fn publish(&self, kind: QueueEventKind) {
        // No subscribers is fine.
        let _ = self.events_tx.send(QueueEvent {
            kind,
            depth: self.queue.len(),
        });
    }
}
