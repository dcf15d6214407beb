//! # wesrun-api
//!
//! HTTP façade over the `wesrun-flow` orchestration engine, plus the HTTP
//! client binding to the external analysis engine.
//!
//! The API is a thin layer: handlers validate and translate; every lifecycle
//! decision lives in `wesrun-flow`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod engine_client;
pub mod error;
pub mod routes;
pub mod server;
