//! Offline action queue.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::time::Instant;

use crate::core::OperationError;

/// Identity of a submitted write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId(u64);

impl ActionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value. Allocated monotonically, starting at 1.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Boxed future returned by an [`Action`].
pub type OperationFuture = Pin<Box<dyn Future<Output = Result<(), OperationError>> + Send>>;

/// A replayable write operation.
///
/// The closure may run more than once (retries, replays). It must be safe to
/// repeat, or carry a dedupe key the remote honours.
#[derive(Clone)]
pub struct Action {
    description: Arc<str>,
    op: Arc<dyn Fn() -> OperationFuture + Send + Sync>,
}

impl Action {
    /// Wrap an async closure.
    pub fn new<F, Fut>(description: impl Into<String>, op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        let description: String = description.into();
        Self {
            description: description.into(),
            op: Arc::new(move || -> OperationFuture { Box::pin(op()) }),
        }
    }

    /// Description for logs and UI.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Start one attempt.
    pub fn invoke(&self) -> OperationFuture {
        (self.op)()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// An action waiting for connectivity.
#[derive(Debug, Clone)]
pub struct QueuedAction {
    /// Identity.
    pub id: ActionId,
    /// The operation.
    pub action: Action,
    /// When it was first queued.
    pub enqueued_at: Instant,
    /// Replays started so far.
    pub replays: u32,
}

/// Strict FIFO of deferred actions.
///
/// An action stays in the queue while its replay is in flight, so the depth
/// counts it until it completes, fails, or is cancelled.
#[derive(Debug, Default)]
pub struct ActionQueue {
    items: VecDeque<QueuedAction>,
}

impl ActionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    pub fn push_back(&mut self, action: QueuedAction) {
        self.items.push_back(action);
    }

    /// Take the head of the queue.
    pub fn pop_front(&mut self) -> Option<QueuedAction> {
        self.items.pop_front()
    }

    /// Head of the queue.
    pub fn front(&self) -> Option<&QueuedAction> {
        self.items.front()
    }

    /// Head of the queue, mutably.
    pub fn front_mut(&mut self) -> Option<&mut QueuedAction> {
        self.items.front_mut()
    }

    /// Remove an action wherever it sits.
    pub fn remove(&mut self, id: ActionId) -> Option<QueuedAction> {
        let index = self.items.iter().position(|item| item.id == id)?;
        self.items.remove(index)
    }

    /// Look up a queued action.
    pub fn get(&self, id: ActionId) -> Option<&QueuedAction> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Whether an action is queued.
    pub fn contains(&self, id: ActionId) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    /// Queued ids, head first.
    pub fn ids(&self) -> Vec<ActionId> {
        self.items.iter().map(|item| item.id).collect()
    }

    /// Depth.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(id: u64) -> QueuedAction {
        QueuedAction {
            id: ActionId::new(id),
            action: Action::new(format!("op {id}"), || async { Ok(()) }),
            enqueued_at: Instant::now(),
            replays: 0,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = ActionQueue::new();
        for id in 1..=3 {
            queue.push_back(queued(id));
        }
        assert_eq!(queue.ids(), vec![ActionId::new(1), ActionId::new(2), ActionId::new(3)]);
        assert_eq!(queue.front().map(|q| q.action.description()), Some("op 1"));
    }

    #[test]
    fn test_remove_from_middle() {
        let mut queue = ActionQueue::new();
        for id in 1..=3 {
            queue.push_back(queued(id));
        }
        let removed = queue.remove(ActionId::new(2));
        assert_eq!(removed.map(|q| q.id), Some(ActionId::new(2)));
        assert!(!queue.contains(ActionId::new(2)));
        assert_eq!(queue.ids(), vec![ActionId::new(1), ActionId::new(3)]);
        assert!(queue.remove(ActionId::new(9)).is_none());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_action_is_replayable() {
        let action = Action::new("ping", || async { Err(OperationError::Timeout) });
        assert_eq!(action.invoke().await, Err(OperationError::Timeout));
        assert_eq!(action.clone().invoke().await, Err(OperationError::Timeout));
        assert_eq!(format!("{action:?}"), "Action { description: \"ping\", .. }");
        assert_eq!(ActionId::new(7).to_string(), "#7");
    }
}
