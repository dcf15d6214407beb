//! # wesrun-core
//!
//! Shared foundation for the wesrun workflow-execution manager.
//!
//! This crate provides the types every other wesrun crate depends on:
//!
//! - **Identifiers**: strongly-typed, ULID-backed IDs ([`AnalysisId`], [`EventId`])
//! - **Errors**: the shared error type for parsing and validation failures
//! - **Observability**: logging initialization
//!
//! Domain logic lives in `wesrun-flow`; the HTTP surface lives in `wesrun-api`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{AnalysisId, EventId};
