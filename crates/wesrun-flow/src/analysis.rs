//! Analysis job tracking.
//!
//! An [`AnalysisJob`] is the durable record of one requested external
//! analysis: what was asked for, where its launch parameters live, and where
//! it currently sits in the lifecycle state machine.
//!
//! The record is created in `PENDING` by the launch orchestrator and mutated
//! exclusively through the store's compare-and-swap transition. It is never
//! deleted except by TTL expiry after reaching a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wesrun_core::AnalysisId;

use crate::error::{Error, Result};
use crate::store::TransitionUpdate;

/// Analysis lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    /// Created and submitted, waiting for the engine to confirm the launch.
    Pending,
    /// The engine has confirmed the analysis is executing.
    Running,
    /// The analysis completed successfully.
    Succeeded,
    /// The analysis failed, or its launch was rejected.
    Failed,
    /// The analysis was aborted before completion.
    Aborted,
}

impl AnalysisStatus {
    /// All lifecycle states, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Aborted,
    ];

    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// `Pending -> Failed` covers synchronous launch rejection;
    /// `Pending -> Aborted` covers abort before launch confirmation.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Running | Self::Failed | Self::Aborted),
            Self::Running => matches!(target, Self::Succeeded | Self::Failed | Self::Aborted),
            Self::Succeeded | Self::Failed | Self::Aborted => false,
        }
    }
}

impl Default for AnalysisStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "ABORTED" => Ok(Self::Aborted),
            other => Err(Error::malformed(format!("unknown status '{other}'"))),
        }
    }
}

/// Pointer to externally stored launch parameters.
///
/// Launch payloads can be large (workflow inputs, engine parameters), so the
/// job record keeps only URIs. The referenced objects live in external
/// storage with their own lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadRef {
    /// URI of the stored launch parameter document.
    pub uri: String,
    /// URI the engine writes analysis outputs under.
    pub output_uri: String,
    /// URI the engine writes execution logs under.
    pub logs_uri: String,
}

impl PayloadRef {
    /// Validates that all URIs use a supported scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if any URI is not `s3://` or `icav2://`.
    pub fn validate(&self) -> Result<()> {
        for (field, uri) in [
            ("uri", &self.uri),
            ("outputUri", &self.output_uri),
            ("logsUri", &self.logs_uri),
        ] {
            if !(uri.starts_with("s3://") || uri.starts_with("icav2://")) {
                return Err(Error::malformed(format!(
                    "{field} must start with s3:// or icav2://, got '{uri}'"
                )));
            }
        }
        Ok(())
    }
}

/// The persisted record of one requested external analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    /// Unique job identifier, assigned at creation.
    pub id: AnalysisId,
    /// User-supplied label. Indexed for lookup; uniqueness is enforced only
    /// among non-terminal jobs.
    pub name: String,
    /// Current lifecycle state.
    pub status: AnalysisStatus,
    /// Identifier assigned by the external engine. Set exactly once, at the
    /// transition into `RUNNING`, and never changed afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_analysis_id: Option<String>,
    /// Pointer to externally stored launch parameters.
    pub payload_ref: PayloadRef,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Advances on every state transition.
    pub updated_at: DateTime<Utc>,
    /// When the engine confirmed the launch (if it has).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state (if it has).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure detail recorded when the job is marked `FAILED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Expiry for garbage collection of terminal records. Internal only.
    #[serde(skip_serializing, default)]
    pub ttl: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    /// Creates a new job in `PENDING` state with a freshly generated ID.
    #[must_use]
    pub fn new(name: impl Into<String>, payload_ref: PayloadRef) -> Self {
        let now = Utc::now();
        Self {
            id: AnalysisId::generate(),
            name: name.into(),
            status: AnalysisStatus::Pending,
            external_analysis_id: None,
            payload_ref,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            error_message: None,
            ttl: None,
        }
    }

    /// Returns true if the job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a committed transition to the record.
    ///
    /// Called by the store while holding the per-job write; callers go
    /// through [`crate::store::JobStore::transition`] instead. The external
    /// analysis ID is set-once: an update carrying one is ignored if the
    /// field is already populated.
    pub(crate) fn apply_transition(
        &mut self,
        target: AnalysisStatus,
        update: &TransitionUpdate,
        now: DateTime<Utc>,
    ) {
        if target == AnalysisStatus::Running {
            self.started_at = Some(now);
        }
        if target.is_terminal() {
            self.ended_at = Some(now);
        }
        if self.external_analysis_id.is_none() {
            self.external_analysis_id = update.external_analysis_id.clone();
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }
        self.status = target;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_ref() -> PayloadRef {
        PayloadRef {
            uri: "s3://bucket/payloads/p1.json".into(),
            output_uri: "s3://bucket/outputs/".into(),
            logs_uri: "icav2://project/logs/".into(),
        }
    }

    #[test]
    fn pending_transitions() {
        let state = AnalysisStatus::Pending;
        assert!(state.can_transition_to(AnalysisStatus::Running));
        assert!(state.can_transition_to(AnalysisStatus::Failed));
        assert!(state.can_transition_to(AnalysisStatus::Aborted));
        assert!(!state.can_transition_to(AnalysisStatus::Succeeded));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [
            AnalysisStatus::Succeeded,
            AnalysisStatus::Failed,
            AnalysisStatus::Aborted,
        ] {
            assert!(terminal.is_terminal());
            for target in AnalysisStatus::ALL {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&AnalysisStatus::Succeeded).unwrap();
        assert_eq!(json, "\"SUCCEEDED\"");
        let parsed: AnalysisStatus = "ABORTED".parse().unwrap();
        assert_eq!(parsed, AnalysisStatus::Aborted);
        assert!("succeeded".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn payload_ref_rejects_unsupported_scheme() {
        let mut p = payload_ref();
        assert!(p.validate().is_ok());
        p.logs_uri = "https://example.com/logs".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn new_job_starts_pending() {
        let job = AnalysisJob::new("wgs-batch-1", payload_ref());
        assert_eq!(job.status, AnalysisStatus::Pending);
        assert!(job.external_analysis_id.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn external_id_is_set_once() {
        let mut job = AnalysisJob::new("wgs-batch-1", payload_ref());
        let now = Utc::now();
        job.apply_transition(
            AnalysisStatus::Running,
            &TransitionUpdate::default().with_external_id("e1"),
            now,
        );
        assert_eq!(job.external_analysis_id.as_deref(), Some("e1"));
        assert_eq!(job.started_at, Some(now));

        job.apply_transition(
            AnalysisStatus::Succeeded,
            &TransitionUpdate::default().with_external_id("e2"),
            now,
        );
        assert_eq!(job.external_analysis_id.as_deref(), Some("e1"));
        assert_eq!(job.ended_at, Some(now));
    }

    #[test]
    fn job_serializes_camel_case_without_ttl() {
        let mut job = AnalysisJob::new("wgs-batch-1", payload_ref());
        job.ttl = Some(Utc::now());
        let value = serde_json::to_value(&job).unwrap();
        assert!(value.get("payloadRef").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("ttl").is_none());
    }
}
