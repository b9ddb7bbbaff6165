//! In-memory scripted feed for tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::core::{FeedError, FeedEvent, FeedSubscription, FriendFeed, UserId};

/// What the next `subscribe` call does.
#[derive(Debug, Clone)]
pub(crate) enum SubscribeOutcome {
    Accept,
    Reject(FeedError),
    Hang,
}

#[derive(Debug)]
struct Script {
    outcomes: VecDeque<SubscribeOutcome>,
    fallback: SubscribeOutcome,
    subscribe_calls: u32,
    active: Option<mpsc::UnboundedSender<Result<FeedEvent, FeedError>>>,
}

/// A feed whose subscribe results and stream contents are driven by the test.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedFeed {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFeed {
    /// Every subscribe succeeds unless scripted otherwise.
    pub(crate) fn accepting() -> Self {
        Self::with_fallback(SubscribeOutcome::Accept)
    }

    /// Every subscribe fails with a network error unless scripted otherwise.
    pub(crate) fn failing() -> Self {
        Self::with_fallback(SubscribeOutcome::Reject(FeedError::Network(
            "connection refused".into(),
        )))
    }

    fn with_fallback(fallback: SubscribeOutcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                outcomes: VecDeque::new(),
                fallback,
                subscribe_calls: 0,
                active: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("script lock poisoned")
    }

    /// Queue the outcome of a future subscribe call.
    pub(crate) fn push_outcome(&self, outcome: SubscribeOutcome) {
        self.lock().outcomes.push_back(outcome);
    }

    /// Number of subscribe calls so far.
    pub(crate) fn subscribe_calls(&self) -> u32 {
        self.lock().subscribe_calls
    }

    /// Deliver an event on the active subscription.
    pub(crate) fn send(&self, event: FeedEvent) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(event)).is_ok())
    }

    /// Fail the active subscription.
    pub(crate) fn fail_active(&self, error: FeedError) -> bool {
        self.lock()
            .active
            .take()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Close the active subscription from the remote side.
    pub(crate) fn close_active(&self) {
        self.lock().active = None;
    }
}

impl FriendFeed for ScriptedFeed {
    type Subscription = ScriptedSubscription;

    fn subscribe(
        &self,
        _user: &UserId,
    ) -> impl Future<Output = Result<Self::Subscription, FeedError>> + Send {
        let outcome = {
            let mut script = self.lock();
            script.subscribe_calls += 1;
            let outcome = script
                .outcomes
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone());
            match outcome {
                SubscribeOutcome::Accept => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    script.active = Some(tx);
                    Ok(Some(ScriptedSubscription { rx }))
                }
                SubscribeOutcome::Reject(error) => Err(error),
                SubscribeOutcome::Hang => Ok(None),
            }
        };

        async move {
            match outcome {
                Ok(Some(subscription)) => Ok(subscription),
                Ok(None) => std::future::pending().await,
                Err(error) => Err(error),
            }
        }
    }
}

/// Subscription half of [`ScriptedFeed`].
#[derive(Debug)]
pub(crate) struct ScriptedSubscription {
    rx: mpsc::UnboundedReceiver<Result<FeedEvent, FeedError>>,
}

impl FeedSubscription for ScriptedSubscription {
    fn next_event(&mut self) -> impl Future<Output = Option<Result<FeedEvent, FeedError>>> + Send {
        self.rx.recv()
    }
}

#[cfg(feature = "retry")]
pub(crate) use recording::RecordingRemote;

#[cfg(feature = "retry")]
mod recording {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::core::OperationError;
    use crate::retry::Action;

    /// A write endpoint that is either up (records the call) or down
    /// (fails with a network error).
    #[derive(Debug, Clone, Default)]
    pub(crate) struct RecordingRemote {
        up: Arc<AtomicBool>,
        calls: Arc<AtomicU32>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingRemote {
        pub(crate) fn up() -> Self {
            let remote = Self::default();
            remote.set_up(true);
            remote
        }

        pub(crate) fn down() -> Self {
            Self::default()
        }

        pub(crate) fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::SeqCst);
        }

        /// Attempts made so far, successful or not.
        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        /// Names of successful calls, in order.
        pub(crate) fn log(&self) -> Vec<String> {
            self.log.lock().expect("log lock poisoned").clone()
        }

        pub(crate) fn action(&self, name: &str) -> Action {
            let remote = self.clone();
            let name = name.to_owned();
            Action::new(name.clone(), move || {
                let remote = remote.clone();
                let name = name.clone();
                async move {
                    remote.calls.fetch_add(1, Ordering::SeqCst);
                    if remote.up.load(Ordering::SeqCst) {
                        remote.log.lock().expect("log lock poisoned").push(name);
                        Ok(())
                    } else {
                        Err(OperationError::Network("unreachable".into()))
                    }
                }
            })
        }
    }
}
