//! Error types for the orchestration domain.

use wesrun_core::AnalysisId;

use crate::analysis::AnalysisStatus;

/// The result type used throughout wesrun-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The referenced analysis job does not exist.
    #[error("analysis not found: {id}")]
    NotFound {
        /// The job ID that was not found.
        id: AnalysisId,
    },

    /// An analysis job with this ID already exists.
    #[error("analysis already exists: {id}")]
    DuplicateId {
        /// The conflicting job ID.
        id: AnalysisId,
    },

    /// An active analysis job with this name already exists.
    #[error("an active analysis named '{name}' already exists")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// A compare-and-swap precondition failed.
    #[error("transition conflict for {id}: expected {expected}, found {actual}")]
    Conflict {
        /// The job whose transition was rejected.
        id: AnalysisId,
        /// The status the caller expected.
        expected: AnalysisStatus,
        /// The status actually found.
        actual: AnalysisStatus,
    },

    /// The requested operation is invalid for the job's current state.
    #[error("operation invalid for {id} in state {status}")]
    InvalidState {
        /// The job the operation targeted.
        id: AnalysisId,
        /// The job's current status.
        status: AnalysisStatus,
    },

    /// A call to the external analysis engine failed or timed out.
    #[error("engine call failed: {message}")]
    Engine {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A request or inbound message failed validation.
    #[error("malformed input: {reason}")]
    Malformed {
        /// What made the input invalid.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// An error from wesrun-core.
    #[error("core error: {0}")]
    Core(#[from] wesrun_core::Error),
}

impl Error {
    /// Creates a new engine error.
    #[must_use]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new engine error with a source.
    #[must_use]
    pub fn engine_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Engine {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new malformed-input error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
