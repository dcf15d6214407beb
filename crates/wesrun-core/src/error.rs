//! Shared error type for wesrun foundation types.

/// The result type used by wesrun-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by foundation types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier string could not be parsed.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// What made the identifier invalid.
        message: String,
    },
}
