//! Outbound state-change events.
//!
//! Every transition into `RUNNING` or a terminal state publishes an
//! [`AnalysisStateChange`] onto the shared bus so downstream consumers can
//! react without polling the API.
//!
//! ## Idempotency
//!
//! A job passes through each status at most once, so the envelope's
//! idempotency key is `{job_id}-{status}`: duplicate publishes of the same
//! logical transition are deduplicatable by consumers, while distinct
//! transitions always carry distinct keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wesrun_core::EventId;

use crate::analysis::{AnalysisJob, AnalysisStatus};
use crate::error::Result;
use crate::outbox::EventPublisher;

/// Detail type carried on every published envelope.
pub const STATE_CHANGE_DETAIL_TYPE: &str = "AnalysisStateChange";

/// Payload describing a committed lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStateChange {
    /// The job that transitioned.
    pub id: wesrun_core::AnalysisId,
    /// The job's user-supplied label.
    pub name: String,
    /// The status the job transitioned into.
    pub status: AnalysisStatus,
    /// Engine-assigned analysis ID, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_analysis_id: Option<String>,
    /// When the transition committed.
    pub timestamp: DateTime<Utc>,
}

impl AnalysisStateChange {
    /// Builds the payload from a freshly transitioned record.
    #[must_use]
    pub fn from_job(job: &AnalysisJob) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            status: job.status,
            external_analysis_id: job.external_analysis_id.clone(),
            timestamp: job.updated_at,
        }
    }
}

/// Bus envelope wrapping a state-change payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEnvelope {
    /// Unique event identifier.
    pub id: EventId,
    /// Publishing service identifier (e.g. `orcabus.wesrun`).
    pub source: String,
    /// Event classification for bus routing.
    pub detail_type: String,
    /// Deterministic key for the logical transition: `{job_id}-{status}`.
    pub idempotency_key: String,
    /// The transition payload.
    pub detail: AnalysisStateChange,
}

impl BusEnvelope {
    /// Wraps a state-change payload for publication.
    #[must_use]
    pub fn new(source: impl Into<String>, detail: AnalysisStateChange) -> Self {
        let idempotency_key = format!("{}-{}", detail.id, detail.status);
        Self {
            id: EventId::generate(),
            source: source.into(),
            detail_type: STATE_CHANGE_DETAIL_TYPE.to_string(),
            idempotency_key,
            detail,
        }
    }
}

/// Publishes a state-change event for a freshly transitioned job.
///
/// # Errors
///
/// Returns the publisher's error; callers on the reconciliation path log and
/// continue, since the committed transition must stand regardless.
pub async fn publish_state_change(
    publisher: &dyn EventPublisher,
    source: &str,
    job: &AnalysisJob,
) -> Result<()> {
    let envelope = BusEnvelope::new(source, AnalysisStateChange::from_job(job));
    publisher.publish(envelope).await
}
