//! Launch and abort orchestration.
//!
//! [`AnalysisService`] is the entry point the API façade calls. It validates
//! requests against the current store state, records an optimistic
//! transition first, and only then talks to the external engine — so the
//! persisted record is always at least as pessimistic as reality.
//!
//! Launch is asynchronous: a successful return means the engine accepted
//! the command. The `RUNNING` transition (and the recorded external
//! analysis ID) arrive later as a launch-confirmed signal through the
//! reconciler.

use std::sync::Arc;

use crate::analysis::{AnalysisJob, AnalysisStatus, PayloadRef};
use crate::engine::{AnalysisEngine, LaunchCommand, LaunchDecision};
use crate::error::{Error, Result};
use crate::events::publish_state_change;
use crate::ingest::DEFAULT_TAG_KEY;
use crate::outbox::EventPublisher;
use crate::retry::RetryPolicy;
use crate::store::{CasResult, JobStore, TransitionUpdate};

/// Bounded CAS retries for the abort race (launch confirmation landing
/// between the read and the swap).
const ABORT_CAS_ATTEMPTS: u32 = 3;

/// A validated request to launch an analysis.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// User-supplied label for the analysis.
    pub name: String,
    /// Pointer to the externally stored launch parameters.
    pub payload_ref: PayloadRef,
}

/// Launch/abort orchestrator and read façade over the job store.
pub struct AnalysisService {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn AnalysisEngine>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
    event_source: String,
    tag_key: String,
}

impl AnalysisService {
    /// Creates a service over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn AnalysisEngine>,
        publisher: Arc<dyn EventPublisher>,
        retry: RetryPolicy,
        event_source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            engine,
            publisher,
            retry,
            event_source: event_source.into(),
            tag_key: DEFAULT_TAG_KEY.to_string(),
        }
    }

    /// Overrides the technical-tag key embedded in launch commands.
    #[must_use]
    pub fn with_tag_key(mut self, tag_key: impl Into<String>) -> Self {
        self.tag_key = tag_key.into();
        self
    }

    /// Launches a new analysis.
    ///
    /// Creates the job in `PENDING`, then issues the launch command. The
    /// returned record is still `PENDING`; confirmation arrives through the
    /// reconciler. If the engine rejects the launch synchronously (or the
    /// retry budget is spent), the job is marked `FAILED` with the reason
    /// and the rejection is surfaced to the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if the request fails validation
    /// - [`Error::DuplicateName`] if an active job already carries the name
    /// - [`Error::Engine`] if the engine rejected the launch
    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    pub async fn launch(&self, request: LaunchRequest) -> Result<AnalysisJob> {
        if request.name.trim().is_empty() {
            return Err(Error::malformed("analysis name must not be empty"));
        }
        request.payload_ref.validate()?;

        let existing = self.store.find_by_name(&request.name).await?;
        if existing.iter().any(|job| !job.is_terminal()) {
            return Err(Error::DuplicateName { name: request.name });
        }

        let job = AnalysisJob::new(request.name, request.payload_ref);
        let id = job.id;
        self.store.create(job.clone()).await?;
        tracing::info!(job = %id, "analysis created");

        let command = LaunchCommand {
            analysis_id: id,
            name: job.name.clone(),
            payload_ref: job.payload_ref.clone(),
            technical_tags: vec![format!("{}={}", self.tag_key, id)],
        };

        let decision = self
            .retry
            .run("launch_analysis", || self.engine.launch(command.clone()))
            .await;

        match decision {
            Ok(LaunchDecision::Accepted {
                external_analysis_id,
            }) => {
                // Accepted only acknowledges the command; the ID is
                // persisted when the launch-confirmed signal commits.
                tracing::info!(job = %id, external = %external_analysis_id, "launch accepted");
                Ok(job)
            }
            Ok(LaunchDecision::Rejected { reason }) => {
                tracing::warn!(job = %id, %reason, "launch rejected");
                self.fail_pending(&id, &reason).await?;
                Err(Error::engine(reason))
            }
            Err(err) => {
                tracing::error!(job = %id, error = %err, "launch command failed");
                self.fail_pending(&id, &err.to_string()).await?;
                Err(err)
            }
        }
    }

    /// Aborts an analysis.
    ///
    /// The record transitions to `ABORTED` first; only then, and only if the
    /// job was running, is the abort command sent to the engine. The engine
    /// answering that the analysis already finished leaves the transition in
    /// place: the terminal state is still correct.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no such job exists
    /// - [`Error::InvalidState`] if the job is already terminal
    #[tracing::instrument(skip(self), fields(job = %id))]
    pub async fn abort(&self, id: &wesrun_core::AnalysisId) -> Result<AnalysisJob> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let job = self
                .store
                .get(id)
                .await?
                .ok_or(Error::NotFound { id: *id })?;
            if job.is_terminal() {
                return Err(Error::InvalidState {
                    id: *id,
                    status: job.status,
                });
            }

            let was_running = job.status == AnalysisStatus::Running;
            match self
                .store
                .transition(
                    id,
                    job.status,
                    AnalysisStatus::Aborted,
                    TransitionUpdate::default(),
                )
                .await?
            {
                CasResult::Applied(updated) => {
                    tracing::info!(from = %job.status, "abort committed");
                    self.publish(&updated).await;
                    if was_running {
                        self.abort_on_engine(&updated).await;
                    }
                    return Ok(updated);
                }
                CasResult::NotFound => return Err(Error::NotFound { id: *id }),
                CasResult::StateMismatch { actual } if attempt < ABORT_CAS_ATTEMPTS => {
                    tracing::debug!(%actual, attempt, "abort raced a transition; re-reading");
                }
                CasResult::StateMismatch { actual } => {
                    return Err(Error::Conflict {
                        id: *id,
                        expected: job.status,
                        actual,
                    });
                }
            }
        }
    }

    /// Gets a job by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the job does not exist.
    pub async fn get(&self, id: &wesrun_core::AnalysisId) -> Result<AnalysisJob> {
        self.store
            .get(id)
            .await?
            .ok_or(Error::NotFound { id: *id })
    }

    /// Lists jobs, optionally filtered by name and/or status.
    ///
    /// Filtered lookups go through the store's secondary indexes; the
    /// unfiltered listing walks the closed status set, so it also never
    /// needs a full scan.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store fails.
    pub async fn list(
        &self,
        name: Option<&str>,
        status: Option<AnalysisStatus>,
    ) -> Result<Vec<AnalysisJob>> {
        match (name, status) {
            (Some(name), status) => {
                let jobs = self.store.find_by_name(name).await?;
                Ok(jobs
                    .into_iter()
                    .filter(|job| status.map_or(true, |s| job.status == s))
                    .collect())
            }
            (None, Some(status)) => self.store.find_by_status(status).await,
            (None, None) => {
                let mut jobs = Vec::new();
                for status in AnalysisStatus::ALL {
                    jobs.extend(self.store.find_by_status(status).await?);
                }
                jobs.sort_by_key(|job| job.id);
                Ok(jobs)
            }
        }
    }

    /// Marks a still-pending job FAILED after a synchronous launch failure.
    async fn fail_pending(&self, id: &wesrun_core::AnalysisId, reason: &str) -> Result<()> {
        let result = self
            .store
            .transition(
                id,
                AnalysisStatus::Pending,
                AnalysisStatus::Failed,
                TransitionUpdate::default().with_error(reason),
            )
            .await?;
        match result {
            CasResult::Applied(updated) => {
                self.publish(&updated).await;
                Ok(())
            }
            // A confirmation or abort beat us to it; that state wins.
            CasResult::StateMismatch { actual } => {
                tracing::warn!(job = %id, %actual, "skipping failure mark; job moved on");
                Ok(())
            }
            CasResult::NotFound => Err(Error::NotFound { id: *id }),
        }
    }

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
}
