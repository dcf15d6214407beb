//! State reconciliation for inbound lifecycle signals.
//!
//! The reconciler consumes normalized [`StateChangeSignal`]s and drives the
//! job state machine through the store's compare-and-swap transition. The
//! transition table is explicit and typed:
//!
//! | signal           | expected          | target    | side effect                    |
//! |------------------|-------------------|-----------|--------------------------------|
//! | LaunchConfirmed  | Pending           | Running   | record external analysis ID    |
//! | Succeeded        | Running           | Succeeded | completion hooks, publish      |
//! | Failed           | Running           | Failed    | completion hooks, publish      |
//! | AbortRequested   | Pending / Running | Aborted   | engine abort iff was Running   |
//! | any              | terminal          | no-op     | duplicate discard              |
//! | any              | other mismatch    | reject    | anomaly, logged, not retried   |
//!
//! The one exception to reject-on-mismatch is the abort: it has two valid
//! source states, so a lost CAS race re-reads and retries from the new state
//! a bounded number of times before anything is reported as an anomaly.
//!
//! Side effects run only after the store transition commits, and a hook
//! failure never rolls the transition back: transitions are at-most-once,
//! side effects at-least-once.

use std::sync::Arc;

use async_trait::async_trait;

use crate::analysis::{AnalysisJob, AnalysisStatus};
use crate::engine::AnalysisEngine;
use crate::error::{Error, Result};
use crate::events::publish_state_change;
use crate::ingest::{SignalKind, StateChangeSignal};
use crate::outbox::EventPublisher;
use crate::retry::RetryPolicy;
use crate::store::{CasResult, JobStore, TransitionUpdate};
use wesrun_core::AnalysisId;

/// Bounded CAS retries for an abort that races another transition, such as
/// a launch confirmation landing between the read and the swap.
const ABORT_CAS_ATTEMPTS: u32 = 3;

/// What a signal did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transition committed; carries the new status.
    Applied(AnalysisStatus),
    /// The signal re-described a transition that already happened.
    Duplicate,
    /// The signal arrived against an unexpected non-terminal state. This
    /// indicates an ordering bug or a race and is surfaced for inspection,
    /// never retried automatically.
    Anomaly {
        /// The status actually found.
        actual: AnalysisStatus,
    },
}

/// Side effects dispatched after a job reaches a terminal state.
///
/// Implementations fetch the engine's log directory, sync output artifacts,
/// and so on. Hooks must be idempotent: a hook may run more than once for
/// the same transition, but never for a transition that did not commit.
#[async_trait]
pub trait CompletionHooks: Send + Sync {
    /// Called once per committed terminal transition.
    async fn on_completed(&self, job: &AnalysisJob) -> Result<()>;
}

/// Hooks that do nothing. Default for deployments without artifact sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompletionHooks;

#[async_trait]
impl CompletionHooks for NoopCompletionHooks {
    async fn on_completed(&self, _job: &AnalysisJob) -> Result<()> {
        Ok(())
    }
}

/// Applies state-change signals to the job store.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn AnalysisEngine>,
    publisher: Arc<dyn EventPublisher>,
    hooks: Arc<dyn CompletionHooks>,
    retry: RetryPolicy,
    event_source: String,
}

impl Reconciler {
    /// Creates a reconciler over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn AnalysisEngine>,
        publisher: Arc<dyn EventPublisher>,
        hooks: Arc<dyn CompletionHooks>,
        retry: RetryPolicy,
        event_source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            engine,
            publisher,
            hooks,
            retry,
            event_source: event_source.into(),
        }
    }

    /// Applies one signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the signal references a job this
    /// system never created, or a storage error if the store fails. Every
    /// other path resolves to an [`Outcome`].
    #[tracing::instrument(
        skip(self, signal),
        fields(job = %signal.job_tag, kind = ?signal.kind)
    )]
    pub async fn handle(&self, signal: &StateChangeSignal) -> Result<Outcome> {
        let id = signal.job_tag;
        let job = self
            .store
            .get(&id)
            .await?
            .ok_or(Error::NotFound { id })?;

        let (expected, target, update) = match signal.kind {
            SignalKind::LaunchConfirmed => (
                AnalysisStatus::Pending,
                AnalysisStatus::Running,
                TransitionUpdate::default().with_external_id(&signal.external_analysis_id),
            ),
            SignalKind::Succeeded => (
                AnalysisStatus::Running,
                AnalysisStatus::Succeeded,
                TransitionUpdate::default(),
            ),
            SignalKind::Failed => (
                AnalysisStatus::Running,
                AnalysisStatus::Failed,
                TransitionUpdate::default(),
            ),
            SignalKind::AbortRequested => return self.handle_abort(&id, job).await,
        };

        self.apply(&id, expected, target, update).await
    }

    /// Aborts from whichever non-terminal state the job is observed in.
    ///
    /// An abort has two valid source states, so a transition that commits
    /// between the read and the swap (a launch confirmation, typically) is
    /// not an anomaly. Re-read and retry the CAS from the new state, up to
    /// [`ABORT_CAS_ATTEMPTS`] times.
    async fn handle_abort(&self, id: &AnalysisId, mut job: AnalysisJob) -> Result<Outcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if job.is_terminal() {
                return Ok(Outcome::Duplicate);
            }
            let outcome = self
                .apply(
                    id,
                    job.status,
                    AnalysisStatus::Aborted,
                    TransitionUpdate::default(),
                )
                .await?;
            match outcome {
                Outcome::Anomaly { actual }
                    if !actual.is_terminal() && attempt < ABORT_CAS_ATTEMPTS =>
                {
                    tracing::debug!(%actual, attempt, "abort raced a transition; re-reading");
                    job = self
                        .store
                        .get(id)
                        .await?
                        .ok_or(Error::NotFound { id: *id })?;
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Runs a single CAS and the post-commit side effects.
    async fn apply(
        &self,
        id: &AnalysisId,
        expected: AnalysisStatus,
        target: AnalysisStatus,
        update: TransitionUpdate,
    ) -> Result<Outcome> {
        match self.store.transition(id, expected, target, update).await? {
            CasResult::Applied(updated) => {
                tracing::info!(from = %expected, to = %target, "transition committed");
                self.publish(&updated).await;

                if target == AnalysisStatus::Aborted && expected == AnalysisStatus::Running {
                    self.abort_on_engine(&updated).await;
                }
                if target.is_terminal() {
                    self.run_completion_hooks(&updated).await;
                }
                Ok(Outcome::Applied(target))
            }
            CasResult::NotFound => Err(Error::NotFound { id: *id }),
            CasResult::StateMismatch { actual } => {
                if actual == target || actual.is_terminal() {
                    tracing::debug!(%actual, "discarding duplicate signal");
                    Ok(Outcome::Duplicate)
                } else {
                    tracing::warn!(
                        %expected,
                        %actual,
                        "signal arrived against unexpected state"
                    );
                    Ok(Outcome::Anomaly { actual })
                }
            }
        }
    }

    /// Publishes the state-change event for a committed transition. The
    /// transition stands even if publication ultimately fails.
    async fn publish(&self, job: &AnalysisJob) {
        let result = self
            .retry
            .run("publish_state_change", || {
                publish_state_change(self.publisher.as_ref(), &self.event_source, job)
            })
            .await;
        if let Err(err) = result {
            tracing::error!(job = %job.id, error = %err, "failed to publish state change");
        }
    }

    /// Issues the abort command for a job that was running when the abort
    /// committed. `AlreadyFinished` is a valid answer: the terminal state is
    /// still correct.
    async fn abort_on_engine(&self, job: &AnalysisJob) {
        let Some(external_id) = job.external_analysis_id.clone() else {
            tracing::warn!(job = %job.id, "running job has no external analysis ID");
            return;
        };
        let result = self
            .retry
            .run("abort_analysis", || self.engine.abort(&external_id))
            .await;
        if let Err(err) = result {
            tracing::error!(job = %job.id, error = %err, "abort command failed");
        }
    }

    async fn run_completion_hooks(&self, job: &AnalysisJob) {
        let result = self
            .retry
            .run("completion_hooks", || self.hooks.on_completed(job))
            .await;
        if let Err(err) = result {
            tracing::error!(job = %job.id, error = %err, "completion hooks failed");
        }
    }
}
