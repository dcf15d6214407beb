//! Pluggable storage for analysis job records.
//!
//! The [`JobStore`] trait defines the persistence layer for jobs. The single
//! concurrency-control primitive is [`JobStore::transition`], an atomic
//! per-job compare-and-swap on `status`.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: state transitions use compare-and-swap so concurrent
//!   duplicate or out-of-order signals for the same job cannot both succeed
//!   against the same expected-state precondition
//! - **Indexed lookup**: `name` and `status` queries never require a full scan
//! - **Testability**: in-memory implementation for tests, a keyed table with
//!   secondary indexes in production

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use wesrun_core::AnalysisId;

use crate::analysis::{AnalysisJob, AnalysisStatus};
use crate::error::Result;

/// Result of a compare-and-swap transition.
#[derive(Debug, Clone)]
pub enum CasResult {
    /// The transition was applied; carries the updated record.
    Applied(AnalysisJob),
    /// The job does not exist.
    NotFound,
    /// The current status did not match the expected status.
    StateMismatch {
        /// The status actually found.
        actual: AnalysisStatus,
    },
}

impl CasResult {
    /// Returns true if the transition was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Field updates applied together with a committed transition.
///
/// Only fields a transition is allowed to touch are representable here;
/// arbitrary writes to the record are not possible through the store.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    /// Engine-assigned analysis identifier. Set-once: ignored if the record
    /// already carries one.
    pub external_analysis_id: Option<String>,
    /// Failure detail to record.
    pub error_message: Option<String>,
}

impl TransitionUpdate {
    /// Attaches the engine-assigned analysis identifier.
    #[must_use]
    pub fn with_external_id(mut self, external_analysis_id: impl Into<String>) -> Self {
        self.external_analysis_id = Some(external_analysis_id.into());
        self
    }

    /// Attaches a failure message.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Storage abstraction for analysis job records.
///
/// ## CAS Semantics
///
/// `transition` is the core primitive for correctness under at-least-once,
/// possibly-reordered signal delivery: of two racing transitions with the
/// same expected status, exactly one is applied and the other observes a
/// `StateMismatch`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::DuplicateId`] if the ID already exists.
    async fn create(&self, job: AnalysisJob) -> Result<()>;

    /// Gets a job by ID. Returns `None` if the job does not exist.
    async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisJob>>;

    /// Returns all jobs with the given name, oldest first.
    async fn find_by_name(&self, name: &str) -> Result<Vec<AnalysisJob>>;

    /// Returns all jobs in the given status, oldest first.
    async fn find_by_status(&self, status: AnalysisStatus) -> Result<Vec<AnalysisJob>>;

    /// Atomically transitions a job's status if the current status matches
    /// `expected`, applying `update` and stamping `updated_at` (plus
    /// `started_at`/`ended_at`/`ttl` where the target state calls for them).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::InvalidState`] if `expected -> target`
    /// is not a legal transition of the state machine.
    async fn transition(
        &self,
        id: &AnalysisId,
        expected: AnalysisStatus,
        target: AnalysisStatus,
        update: TransitionUpdate,
    ) -> Result<CasResult>;

    /// Removes terminal records whose TTL has passed.
    ///
    /// Returns the number of records removed.
    async fn expire(&self, now: DateTime<Utc>) -> Result<usize>;
}
