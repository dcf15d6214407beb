//! In-memory engine fake for testing.
//!
//! Records every command it receives and answers according to a configured
//! script: accept with a fixed external ID, reject with a reason, or fail
//! transiently a set number of times before accepting.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{AbortAck, AnalysisEngine, LaunchCommand, LaunchDecision};
use crate::error::{Error, Result};

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Scripted in-memory engine.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    launches: Mutex<Vec<LaunchCommand>>,
    aborts: Mutex<Vec<String>>,
    external_id: Mutex<Option<String>>,
    reject_reason: Mutex<Option<String>>,
    transient_failures: AtomicU32,
    finished: Mutex<HashSet<String>>,
}

impl InMemoryEngine {
    /// Creates an engine that accepts every launch with a generated
    /// external ID.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that accepts launches with a fixed external ID.
    #[must_use]
    pub fn accepting(external_analysis_id: impl Into<String>) -> Self {
        let engine = Self::default();
        *engine.external_id.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(external_analysis_id.into());
        engine
    }

    /// Creates an engine that rejects every launch with the given reason.
    #[must_use]
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let engine = Self::default();
        *engine.reject_reason.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(reason.into());
        engine
    }

    /// Makes the next `n` calls fail with a transient engine error.
    pub fn fail_times(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Marks an external analysis ID as already finished, so aborts for it
    /// answer [`AbortAck::AlreadyFinished`].
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn mark_finished(&self, external_analysis_id: impl Into<String>) -> Result<()> {
        self.finished
            .lock()
            .map_err(poison_err)?
            .insert(external_analysis_id.into());
        Ok(())
    }

    /// Returns the launch commands received so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn launches(&self) -> Result<Vec<LaunchCommand>> {
        Ok(self.launches.lock().map_err(poison_err)?.clone())
    }

    /// Returns the external analysis IDs aborted so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn aborts(&self) -> Result<Vec<String>> {
        Ok(self.aborts.lock().map_err(poison_err)?.clone())
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AnalysisEngine for InMemoryEngine {
    async fn launch(&self, command: LaunchCommand) -> Result<LaunchDecision> {
        if self.take_transient_failure() {
            return Err(Error::engine("transient engine failure"));
        }

        self.launches.lock().map_err(poison_err)?.push(command);

        if let Some(reason) = self.reject_reason.lock().map_err(poison_err)?.clone() {
            return Ok(LaunchDecision::Rejected { reason });
        }

        let external_analysis_id = self
            .external_id
            .lock()
            .map_err(poison_err)?
            .clone()
            .unwrap_or_else(|| format!("ext-{}", ulid::Ulid::new()));
        Ok(LaunchDecision::Accepted {
            external_analysis_id,
        })
    }

    async fn abort(&self, external_analysis_id: &str) -> Result<AbortAck> {
        if self.take_transient_failure() {
            return Err(Error::engine("transient engine failure"));
        }

        self.aborts
            .lock()
            .map_err(poison_err)?
            .push(external_analysis_id.to_string());

        if self
            .finished
            .lock()
            .map_err(poison_err)?
            .contains(external_analysis_id)
        {
            return Ok(AbortAck::AlreadyFinished);
        }
        Ok(AbortAck::Acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PayloadRef;
    use wesrun_core::AnalysisId;

    fn command() -> LaunchCommand {
        LaunchCommand {
            analysis_id: AnalysisId::generate(),
            name: "wgs-1".into(),
            payload_ref: PayloadRef {
                uri: "s3://bucket/p1.json".into(),
                output_uri: "s3://bucket/out/".into(),
                logs_uri: "s3://bucket/logs/".into(),
            },
            technical_tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn accepting_engine_records_launches() -> Result<()> {
        let engine = InMemoryEngine::accepting("e1");
        let decision = engine.launch(command()).await?;
        assert_eq!(
            decision,
            LaunchDecision::Accepted {
                external_analysis_id: "e1".into()
            }
        );
        assert_eq!(engine.launches()?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejecting_engine_returns_reason() -> Result<()> {
        let engine = InMemoryEngine::rejecting("storage quota exceeded");
        let decision = engine.launch(command()).await?;
        assert_eq!(
            decision,
            LaunchDecision::Rejected {
                reason: "storage quota exceeded".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn transient_failures_then_success() -> Result<()> {
        let engine = InMemoryEngine::accepting("e1");
        engine.fail_times(2);
        assert!(engine.launch(command()).await.is_err());
        assert!(engine.launch(command()).await.is_err());
        assert!(engine.launch(command()).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn abort_on_finished_analysis() -> Result<()> {
        let engine = InMemoryEngine::new();
        engine.mark_finished("e1")?;
        assert_eq!(engine.abort("e1").await?, AbortAck::AlreadyFinished);
        assert_eq!(engine.abort("e2").await?, AbortAck::Acknowledged);
        assert_eq!(engine.aborts()?, vec!["e1".to_string(), "e2".to_string()]);
        Ok(())
    }
}
