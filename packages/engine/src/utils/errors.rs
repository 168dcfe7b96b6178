// packages/engine/src/utils/errors.rs
//! Engine error types
//!
//! Every fallible operation in the crate returns [`Result`]. Usage errors
//! (querying an index before it is built, out-of-range domains) are distinct
//! variants so callers can match on them; they are never retried internally.

use thiserror::Error;

/// Errors produced by the index, the communicator and the runtime
#[derive(Debug, Error)]
pub enum EngineError {
    /// A query or extent accessor ran before `calculate()`
    #[error("interval tree has not been calculated")]
    IntervalTreeNotCalculated,

    /// Domain (or leaf slot) outside `[0, num_domains)`
    #[error("bad domain {domain}: valid domains are 0..{num_domains}")]
    BadDomain { domain: usize, num_domains: usize },

    /// Unsupported dimension count for an interval tree
    #[error("invalid dimension count {0}: must be between 1 and 32")]
    InvalidDimensions(usize),

    /// Slice argument does not match the tree's dimension
    #[error("dimension mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Domain extents added after the tree was built
    #[error("interval tree is already calculated; domains can no longer be added")]
    IntervalTreeFrozen,

    /// Extents requested from a tree with no domains
    #[error("interval tree has no domains")]
    EmptyIndex,

    /// Collective communication failure
    #[error("communication failed: {0}")]
    CommunicationFailed(String),

    /// Worker threads could not be created
    #[error("thread pool creation failed: {0}")]
    PoolCreationFailed(String),

    /// Internal thread pool fault (distinct from admission rejection)
    #[error("thread pool error: {0}")]
    ThreadPool(String),

    /// Work refused because the pool is closing
    #[error("work rejected: {0}")]
    WorkRejected(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_domain_message_carries_both_values() {
        let err = EngineError::BadDomain {
            domain: 7,
            num_domains: 5,
        };
        let message = err.to_string();
        assert!(message.contains('7'));
        assert!(message.contains('5'));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: EngineError = config::ConfigError::Message("boom".into()).into();
        assert!(matches!(err, EngineError::ConfigError(ref m) if m.contains("boom")));
    }
}
