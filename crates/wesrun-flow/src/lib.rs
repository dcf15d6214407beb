//! # wesrun-flow
//!
//! Job-lifecycle orchestration engine for external analysis jobs.
//!
//! This crate owns the hard part of a workflow-execution manager: launching
//! remote analyses on a third-party engine, tracking their state through
//! asynchronous at-least-once notifications, aborting them on request, and
//! reconciling the persisted job record against eventually-consistent
//! external signals.
//!
//! ## Core Concepts
//!
//! - **`AnalysisJob`**: the persisted record of one requested analysis and
//!   its lifecycle state (`PENDING -> RUNNING -> SUCCEEDED | FAILED | ABORTED`)
//! - **`JobStore`**: keyed storage with a per-job compare-and-swap transition,
//!   the sole concurrency-control primitive in the system
//! - **`Reconciler`**: applies normalized state-change signals through a typed
//!   transition table; duplicates are discarded, anomalies are surfaced
//! - **`AnalysisService`**: validated launch/abort entry points for the API
//!
//! ## Guarantees
//!
//! - **Reorder-safe**: no ordering is assumed between signals for the same
//!   job; the reject-on-mismatch transition table makes reordering and
//!   duplicate delivery harmless
//! - **At-most-once transitions**: a given lifecycle transition commits once;
//!   side effects are dispatched only after the commit and are individually
//!   retryable
//! - **Idempotent commands**: every call to the external engine carries the
//!   job's ID as its idempotency key

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod analysis;
pub mod engine;
pub mod error;
pub mod events;
pub mod ingest;
pub mod orchestrator;
pub mod outbox;
pub mod reconciler;
pub mod retry;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::analysis::{AnalysisJob, AnalysisStatus, PayloadRef};
    pub use crate::engine::{AbortAck, AnalysisEngine, LaunchCommand, LaunchDecision};
    pub use crate::error::{Error, Result};
    pub use crate::events::{AnalysisStateChange, BusEnvelope};
    pub use crate::ingest::{DeliveryOutcome, IngestPipe, SignalKind, StateChangeSignal};
    pub use crate::orchestrator::{AnalysisService, LaunchRequest};
    pub use crate::outbox::{EventPublisher, InMemoryBus};
    pub use crate::reconciler::{Outcome, Reconciler};
    pub use crate::retry::RetryPolicy;
    pub use crate::store::{CasResult, JobStore, TransitionUpdate};
}
