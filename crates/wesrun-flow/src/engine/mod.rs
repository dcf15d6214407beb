//! External analysis engine abstraction.
//!
//! The engine is the third-party platform that actually executes analyses.
//! This module defines the only two calls the orchestration core ever makes
//! to it, plus a serializable command payload.
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: same interface for the real engine API and the
//!   in-memory fake used in tests
//! - **Idempotent commands**: every launch carries the job ID as its
//!   idempotency key, so at-least-once invocation of the orchestrators
//!   cannot start the same analysis twice
//! - **Asynchronous confirmation**: a successful launch only means the
//!   command was accepted; the `RUNNING` transition arrives later as a
//!   state-change signal

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use wesrun_core::AnalysisId;

use crate::analysis::PayloadRef;
use crate::error::Result;

/// A launch command issued to the external engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCommand {
    /// The owning job. Doubles as the engine-side idempotency key.
    pub analysis_id: AnalysisId,
    /// User-supplied label, passed through as the engine-side reference.
    pub name: String,
    /// Pointer to the stored launch parameters.
    pub payload_ref: PayloadRef,
    /// Technical tags embedded in the launch so that engine notifications
    /// can be re-associated with the owning job.
    pub technical_tags: Vec<String>,
}

impl LaunchCommand {
    /// Returns the idempotency key for this command.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        self.analysis_id.to_string()
    }
}

/// The engine's synchronous answer to a launch command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchDecision {
    /// The command was accepted; execution confirmation arrives later as a
    /// state-change signal.
    Accepted {
        /// The engine-assigned analysis identifier.
        external_analysis_id: String,
    },
    /// The engine rejected the launch outright.
    Rejected {
        /// The engine's rejection reason.
        reason: String,
    },
}

/// The engine's answer to an abort command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortAck {
    /// The abort was accepted.
    Acknowledged,
    /// The analysis had already finished; nothing to abort.
    AlreadyFinished,
}

/// Client for the external analysis engine.
///
/// These are the only calls the orchestration core makes outward. The engine
/// is a rate-limited, latency-variable dependency, so callers wrap these in
/// a bounded [`crate::retry::RetryPolicy`].
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Issues a launch command.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Engine`] on transport failure or
    /// timeout. A rejection is not an error; it is a
    /// [`LaunchDecision::Rejected`].
    async fn launch(&self, command: LaunchCommand) -> Result<LaunchDecision>;

    /// Issues an abort command for an engine-assigned analysis ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Engine`] on transport failure or
    /// timeout.
    async fn abort(&self, external_analysis_id: &str) -> Result<AbortAck>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PayloadRef;

    #[test]
    fn launch_command_serializes_camel_case() {
        let command = LaunchCommand {
            analysis_id: AnalysisId::generate(),
            name: "wgs-1".into(),
            payload_ref: PayloadRef {
                uri: "s3://bucket/p1.json".into(),
                output_uri: "s3://bucket/out/".into(),
                logs_uri: "s3://bucket/logs/".into(),
            },
            technical_tags: vec!["wesrun-id=01ARZ3NDEKTSV4RRFFQ69G5FAV".into()],
        };
        let value = serde_json::to_value(&command).unwrap();
        assert!(value.get("analysisId").is_some());
        assert!(value.get("technicalTags").is_some());
        assert_eq!(
            command.idempotency_key(),
            command.analysis_id.to_string()
        );
    }
}
