//! In-memory store implementation for testing.
//!
//! This module provides [`InMemoryJobStore`], a simple in-memory
//! implementation of the [`JobStore`] trait suitable for testing and local
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Single-process only**: state is not shared across process boundaries

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use wesrun_core::AnalysisId;

use super::{CasResult, JobStore, TransitionUpdate};
use crate::analysis::{AnalysisJob, AnalysisStatus};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<AnalysisId, AnalysisJob>,
    by_name: HashMap<String, BTreeSet<AnalysisId>>,
    by_status: HashMap<AnalysisStatus, BTreeSet<AnalysisId>>,
}

impl Inner {
    fn collect(&self, ids: Option<&BTreeSet<AnalysisId>>) -> Vec<AnalysisJob> {
        ids.map(|set| {
            set.iter()
                .filter_map(|id| self.jobs.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }
}

/// In-memory job store for testing.
///
/// Thread-safe via an `RwLock`; secondary indexes on `name` and `status` are
/// maintained under the same lock so lookups never scan the whole table.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
    terminal_ttl: Option<Duration>,
}

impl InMemoryJobStore {
    /// Creates a new empty store with no TTL on terminal records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that stamps a TTL on records entering a terminal state.
    #[must_use]
    pub fn with_terminal_ttl(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            terminal_ttl: Some(ttl),
        }
    }

    /// Returns the number of jobs currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn job_count(&self) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.jobs.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: AnalysisJob) -> Result<()> {
        let mut guard = self.inner.write().map_err(poison_err)?;
        let inner = &mut *guard;
        if inner.jobs.contains_key(&job.id) {
            return Err(Error::DuplicateId { id: job.id });
        }
        inner
            .by_name
            .entry(job.name.clone())
            .or_default()
            .insert(job.id);
        inner.by_status.entry(job.status).or_default().insert(job.id);
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisJob>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.jobs.get(id).cloned()
        };
        Ok(result)
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<AnalysisJob>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.collect(inner.by_name.get(name)))
    }

    async fn find_by_status(&self, status: AnalysisStatus) -> Result<Vec<AnalysisJob>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.collect(inner.by_status.get(&status)))
    }

    #[tracing::instrument(skip(self, update), fields(id = %id, from = %expected, to = %target))]
    async fn transition(
        &self,
        id: &AnalysisId,
        expected: AnalysisStatus,
        target: AnalysisStatus,
        update: TransitionUpdate,
    ) -> Result<CasResult> {
        if !expected.can_transition_to(target) {
            return Err(Error::InvalidState {
                id: *id,
                status: expected,
            });
        }

        let mut guard = self.inner.write().map_err(poison_err)?;
        let inner = &mut *guard;

        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(CasResult::NotFound);
        };
        if job.status != expected {
            return Ok(CasResult::StateMismatch { actual: job.status });
        }

        let now = Utc::now();
        job.apply_transition(target, &update, now);
        if target.is_terminal() {
            if let Some(ttl) = self.terminal_ttl {
                job.ttl = Some(now + ttl);
            }
        }
        let snapshot = job.clone();

        inner.by_status.entry(expected).or_default().remove(id);
        inner.by_status.entry(target).or_default().insert(*id);

        Ok(CasResult::Applied(snapshot))
    }

    async fn expire(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut guard = self.inner.write().map_err(poison_err)?;
        let inner = &mut *guard;

        let expired: Vec<AnalysisId> = inner
            .jobs
            .values()
            .filter(|job| job.is_terminal() && job.ttl.is_some_and(|ttl| ttl <= now))
            .map(|job| job.id)
            .collect();

        for id in &expired {
            if let Some(job) = inner.jobs.remove(id) {
                if let Some(ids) = inner.by_name.get_mut(&job.name) {
                    ids.remove(id);
                }
                if let Some(ids) = inner.by_status.get_mut(&job.status) {
                    ids.remove(id);
                }
            }
        }

        Ok(expired.len())
    }
}
