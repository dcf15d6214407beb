//! Inbound event ingest pipe.
//!
//! The external engine publishes analysis state-change notifications with
//! at-least-once, possibly-duplicate, possibly-reordered delivery. This
//! module decouples that unreliability from the reconciler:
//!
//! - [`normalize`] parses the raw envelope, extracts the owning job tag and
//!   classifies the external status word into a [`SignalKind`]
//! - [`IngestPipe::deliver`] hands the normalized signal to the reconciler,
//!   retrying failed deliveries a bounded number of times before pushing the
//!   raw message to a dead-letter sink — one bad message never blocks the
//!   pipe
//!
//! Notifications that do not carry this system's job tag belong to analyses
//! launched by someone else; they are logged and dropped, not dead-lettered.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use wesrun_core::AnalysisId;

use crate::error::{Error, Result};
use crate::reconciler::{Outcome, Reconciler};

/// Event code the engine uses for analysis state changes.
pub const ANALYSIS_STATE_CHANGE_CODE: &str = "ICA_EXEC_028";

/// Default technical-tag key marking analyses owned by this system.
pub const DEFAULT_TAG_KEY: &str = "wesrun-id";

/// Classification of a normalized state-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The engine confirmed the analysis is executing.
    LaunchConfirmed,
    /// The analysis completed successfully.
    Succeeded,
    /// The analysis failed.
    Failed,
    /// The analysis was (or is being) aborted.
    AbortRequested,
}

/// A normalized state-change notification, correlated to an owned job.
#[derive(Debug, Clone)]
pub struct StateChangeSignal {
    /// The owning job, recovered from the launch's technical tag.
    pub job_tag: AnalysisId,
    /// What the notification means for the lifecycle.
    pub kind: SignalKind,
    /// The engine-assigned analysis ID carried in the notification.
    pub external_analysis_id: String,
    /// The unvalidated original body, kept for dead-letter forensics.
    pub raw: Value,
}

/// Why a raw message did not produce a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The notification carries no tag owned by this system.
    NotOwned,
    /// The external status describes a pre-running phase with no lifecycle
    /// transition of its own.
    IgnoredStatus(String),
    /// The envelope is missing a required field.
    MissingField(&'static str),
    /// The event code is not an analysis state change.
    UnknownEventCode(String),
    /// The external status word is not recognized.
    UnknownStatus(String),
    /// The job tag value is not a parseable analysis ID.
    InvalidTag(String),
}

impl DropReason {
    /// Returns true for drops that are routine (unowned or informational
    /// messages) rather than malformed input.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::NotOwned | Self::IgnoredStatus(_))
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwned => write!(f, "notification is not tagged as owned by this system"),
            Self::IgnoredStatus(s) => write!(f, "status '{s}' carries no lifecycle transition"),
            Self::MissingField(field) => write!(f, "missing field '{field}'"),
            Self::UnknownEventCode(code) => write!(f, "unknown event code '{code}'"),
            Self::UnknownStatus(s) => write!(f, "unknown status '{s}'"),
            Self::InvalidTag(tag) => write!(f, "tag value '{tag}' is not an analysis ID"),
        }
    }
}

/// Parses a raw engine notification into a [`StateChangeSignal`].
///
/// The expected envelope shape is the engine's native one:
///
/// ```json
/// {
///   "ica-event": {
///     "eventCode": "ICA_EXEC_028",
///     "payload": {
///       "id": "<external analysis id>",
///       "status": "SUCCEEDED",
///       "tags": { "technicalTags": ["wesrun-id=<job id>"] }
///     }
///   }
/// }
/// ```
///
/// # Errors
///
/// Returns a [`DropReason`] describing why no signal was produced.
pub fn normalize(raw: &Value, tag_key: &str) -> std::result::Result<StateChangeSignal, DropReason> {
    let event = raw
        .get("ica-event")
        .ok_or(DropReason::MissingField("ica-event"))?;

    let code = event
        .get("eventCode")
        .and_then(Value::as_str)
        .ok_or(DropReason::MissingField("eventCode"))?;
    if code != ANALYSIS_STATE_CHANGE_CODE {
        return Err(DropReason::UnknownEventCode(code.to_string()));
    }

    let payload = event
        .get("payload")
        .ok_or(DropReason::MissingField("payload"))?;
    let external_analysis_id = payload
        .get("id")
        .and_then(Value::as_str)
        .ok_or(DropReason::MissingField("payload.id"))?;
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .ok_or(DropReason::MissingField("payload.status"))?;

    let tags = payload
        .pointer("/tags/technicalTags")
        .and_then(Value::as_array)
        .ok_or(DropReason::NotOwned)?;
    let prefix = format!("{tag_key}=");
    let tag_value = tags
        .iter()
        .filter_map(Value::as_str)
        .find_map(|tag| tag.strip_prefix(prefix.as_str()))
        .ok_or(DropReason::NotOwned)?;
    let job_tag: AnalysisId = tag_value
        .parse()
        .map_err(|_| DropReason::InvalidTag(tag_value.to_string()))?;

    let kind = match status {
        "INPROGRESS" | "IN_PROGRESS" | "GENERATING_OUTPUTS" => SignalKind::LaunchConfirmed,
        "SUCCEEDED" => SignalKind::Succeeded,
        "FAILED" | "FAILED_FINAL" | "FAILEDFINAL" => SignalKind::Failed,
        "ABORTING" | "ABORTED" => SignalKind::AbortRequested,
        "REQUESTED" | "QUEUED" | "INITIALIZING" | "PREPARING_INPUTS" | "AWAITING_INPUT" => {
            return Err(DropReason::IgnoredStatus(status.to_string()));
        }
        other => return Err(DropReason::UnknownStatus(other.to_string())),
    };

    Ok(StateChangeSignal {
        job_tag,
        kind,
        external_analysis_id: external_analysis_id.to_string(),
        raw: raw.clone(),
    })
}

/// A message the pipe gave up on, with why.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The unmodified raw message.
    pub raw: Value,
    /// Human-readable failure description.
    pub reason: String,
    /// How many delivery attempts were made before giving up.
    pub attempts: u32,
}

/// Sink for messages the pipe gives up on.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Records a dead letter.
    async fn push(&self, letter: DeadLetter) -> Result<()>;
}

/// In-memory dead-letter sink for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetters {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all dead letters recorded so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self
            .letters
            .lock()
            .map_err(|_: PoisonError<_>| Error::storage("lock poisoned"))?
            .clone())
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn push(&self, letter: DeadLetter) -> Result<()> {
        self.letters
            .lock()
            .map_err(|_: PoisonError<_>| Error::storage("lock poisoned"))?
            .push(letter);
        Ok(())
    }
}

/// What became of a delivered raw message.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The signal reached the reconciler; carries its outcome.
    Delivered(Outcome),
    /// The message was dropped as unowned or informational.
    Dropped,
    /// The message was pushed to the dead-letter sink.
    DeadLettered,
}

/// Delivers raw engine notifications into the reconciler.
pub struct IngestPipe {
    reconciler: Arc<Reconciler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    tag_key: String,
    max_attempts: u32,
}

impl IngestPipe {
    /// Creates a pipe with the default tag key.
    #[must_use]
    pub fn new(
        reconciler: Arc<Reconciler>,
        dead_letters: Arc<dyn DeadLetterSink>,
        max_attempts: u32,
    ) -> Self {
        Self {
            reconciler,
            dead_letters,
            tag_key: DEFAULT_TAG_KEY.to_string(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Overrides the technical-tag key used for ownership filtering.
    #[must_use]
    pub fn with_tag_key(mut self, tag_key: impl Into<String>) -> Self {
        self.tag_key = tag_key.into();
        self
    }

    /// Processes one raw message end to end.
    ///
    /// Malformed messages are dead-lettered immediately (re-parsing is
    /// deterministic, so redelivery cannot help). Normalized signals are
    /// handed to the reconciler up to `max_attempts` times; if every attempt
    /// fails the raw message is dead-lettered with the last error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the dead-letter sink itself fails; every
    /// other failure mode resolves to a [`DeliveryOutcome`].
    #[tracing::instrument(skip(self, raw))]
    pub async fn deliver(&self, raw: Value) -> Result<DeliveryOutcome> {
        let signal = match normalize(&raw, &self.tag_key) {
            Ok(signal) => signal,
            Err(reason) if reason.is_benign() => {
                tracing::debug!(%reason, "dropping notification");
                return Ok(DeliveryOutcome::Dropped);
            }
            Err(reason) => {
                tracing::warn!(%reason, "dead-lettering malformed notification");
                self.dead_letters
                    .push(DeadLetter {
                        raw,
                        reason: reason.to_string(),
                        attempts: 1,
                    })
                    .await?;
                return Ok(DeliveryOutcome::DeadLettered);
            }
        };

        let mut attempt: u32 = 1;
        loop {
            match self.reconciler.handle(&signal).await {
                Ok(outcome) => return Ok(DeliveryOutcome::Delivered(outcome)),
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(
                        job = %signal.job_tag,
                        attempt,
                        error = %err,
                        "redelivering signal"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        job = %signal.job_tag,
                        attempts = attempt,
                        error = %err,
                        "dead-lettering signal"
                    );
                    self.dead_letters
                        .push(DeadLetter {
                            raw: signal.raw,
                            reason: err.to_string(),
                            attempts: attempt,
                        })
                        .await?;
                    return Ok(DeliveryOutcome::DeadLettered);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_event(status: &str, tags: Value) -> Value {
        json!({
            "ica-event": {
                "eventCode": ANALYSIS_STATE_CHANGE_CODE,
                "payload": {
                    "id": "e1",
                    "status": status,
                    "tags": { "technicalTags": tags }
                }
            }
        })
    }

    #[test]
    fn normalizes_owned_succeeded_event() {
        let id = AnalysisId::generate();
        let raw = raw_event("SUCCEEDED", json!([format!("wesrun-id={id}")]));
        let signal = normalize(&raw, DEFAULT_TAG_KEY).unwrap();
        assert_eq!(signal.job_tag, id);
        assert_eq!(signal.kind, SignalKind::Succeeded);
        assert_eq!(signal.external_analysis_id, "e1");
    }

    #[test]
    fn running_phase_statuses_map_to_launch_confirmed() {
        let id = AnalysisId::generate();
        for status in ["INPROGRESS", "IN_PROGRESS", "GENERATING_OUTPUTS"] {
            let raw = raw_event(status, json!([format!("wesrun-id={id}")]));
            let signal = normalize(&raw, DEFAULT_TAG_KEY).unwrap();
            assert_eq!(signal.kind, SignalKind::LaunchConfirmed);
        }
    }

    #[test]
    fn unowned_event_is_benign_drop() {
        let raw = raw_event("SUCCEEDED", json!(["someone-else=xyz"]));
        let reason = normalize(&raw, DEFAULT_TAG_KEY).unwrap_err();
        assert_eq!(reason, DropReason::NotOwned);
        assert!(reason.is_benign());
    }

    #[test]
    fn pre_running_status_is_benign_drop() {
        let id = AnalysisId::generate();
        let raw = raw_event("QUEUED", json!([format!("wesrun-id={id}")]));
        let reason = normalize(&raw, DEFAULT_TAG_KEY).unwrap_err();
        assert!(matches!(reason, DropReason::IgnoredStatus(_)));
        assert!(reason.is_benign());
    }

    #[test]
    fn malformed_tag_is_not_benign() {
        let raw = raw_event("SUCCEEDED", json!(["wesrun-id=not-a-ulid"]));
        let reason = normalize(&raw, DEFAULT_TAG_KEY).unwrap_err();
        assert!(matches!(reason, DropReason::InvalidTag(_)));
        assert!(!reason.is_benign());
    }

    #[test]
    fn wrong_event_code_is_rejected() {
        let raw = json!({
            "ica-event": {
                "eventCode": "ICA_EXEC_001",
                "payload": { "id": "e1", "status": "SUCCEEDED" }
            }
        });
        let reason = normalize(&raw, DEFAULT_TAG_KEY).unwrap_err();
        assert!(matches!(reason, DropReason::UnknownEventCode(_)));
    }

    #[test]
    fn missing_envelope_is_rejected() {
        let reason = normalize(&json!({"detail": {}}), DEFAULT_TAG_KEY).unwrap_err();
        assert_eq!(reason, DropReason::MissingField("ica-event"));
    }
}
