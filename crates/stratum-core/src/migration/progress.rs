//! Progress reporting and state broadcast.
//!
//! The reporter owns the single current [`MigrationState`]. Every transition
//! is pushed to each subscriber's unbounded queue while the state lock is
//! held, so all subscribers see the same transitions in the same order and a
//! slow subscriber never blocks the migration.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::error::MigrationError;
use super::state::{MigrationProgress, MigrationResult, MigrationState};

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<MigrationState>,
}

struct ReporterInner {
    state: MigrationState,
    subscribers: Vec<Subscriber>,
}

/// Holder of the current migration state.
pub struct ProgressReporter {
    inner: Mutex<ReporterInner>,
    next_subscription_id: AtomicU64,
}

impl ProgressReporter {
    /// Create a reporter in the `NotStarted` state.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ReporterInner {
                state: MigrationState::NotStarted,
                subscribers: Vec::new(),
            }),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Snapshot of the current state.
    pub fn current_state(&self) -> MigrationState {
        self.inner.lock().state.clone()
    }

    /// Progress of the running plan, if steps are executing.
    pub fn current_progress(&self) -> Option<MigrationProgress> {
        self.inner.lock().state.progress().cloned()
    }

    /// Subscribe to state transitions.
    ///
    /// The subscription yields the current state first, then every later
    /// transition.
    pub fn subscribe(&self) -> StateSubscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(inner.state.clone());
        inner.subscribers.push(Subscriber { id, tx });

        tracing::debug!(subscription_id = id, "state subscription created");

        StateSubscription { id, rx }
    }

    /// Stop delivering transitions to a subscription.
    ///
    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, subscription_id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != subscription_id);
        let removed = inner.subscribers.len() != before;
        if removed {
            tracing::debug!(subscription_id, "state subscription removed");
        }
        removed
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    /// Report that a non-empty plan was accepted.
    pub fn report_preparation_started(&self) {
        self.transition(MigrationState::Preparing);
    }

    /// Report that the store snapshot is being taken.
    pub fn report_backup_started(&self) {
        self.transition(MigrationState::BackingUp);
    }

    /// Report that step execution began.
    pub fn report_migration_started(&self, progress: MigrationProgress) {
        self.transition(MigrationState::InProgress(progress));
    }

    /// Report a committed step.
    pub fn update_progress(&self, progress: MigrationProgress) {
        self.transition(MigrationState::InProgress(progress));
    }

    /// Report that a backup is being restored.
    pub fn report_restoration_started(&self) {
        self.transition(MigrationState::Restoring);
    }

    /// Report a successful (or unnecessary) run.
    pub fn report_migration_completed(&self, result: MigrationResult) {
        self.transition(MigrationState::Completed(result));
    }

    /// Report a failed run.
    pub fn report_migration_failed(&self, error: MigrationError) {
        self.transition(MigrationState::Failed(error));
    }

    /// Return to `NotStarted` so the reporter can serve a new attempt.
    pub fn reset(&self) {
        self.transition(MigrationState::NotStarted);
    }

    fn transition(&self, next: MigrationState) {
        let mut inner = self.inner.lock();

        if !inner.state.can_transition_to(&next) {
            tracing::warn!(
                from = inner.state.name(),
                to = next.name(),
                "unexpected migration state transition"
            );
        }
        tracing::trace!(state = %next, "migration state changed");

        inner
            .subscribers
            .retain(|subscriber| subscriber.tx.send(next.clone()).is_ok());
        inner.state = next;
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared progress reporter handle.
pub type SharedProgressReporter = Arc<ProgressReporter>;

/// Ordered stream of state transitions for one observer.
///
/// Dropping the subscription unsubscribes it on the next broadcast.
#[derive(Debug)]
pub struct StateSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<MigrationState>,
}

impl StateSubscription {
    /// Subscription ID, for [`ProgressReporter::unsubscribe`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next transition. None once unsubscribed.
    pub async fn recv(&mut self) -> Option<MigrationState> {
        self.rx.recv().await
    }

    /// Take the next buffered transition without waiting.
    pub fn try_recv(&mut self) -> Option<MigrationState> {
        self.rx.try_recv().ok()
    }

    /// Drain every buffered transition.
    pub fn drain(&mut self) -> Vec<MigrationState> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for StateSubscription {
    type Item = MigrationState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
