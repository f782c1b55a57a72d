use thiserror::Error;

use crate::error::CoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("trust service unavailable: {0}")]
    Unavailable(String),
}

impl From<OracleError> for CoreError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Unavailable(reason) => CoreError::OracleUnavailable(reason),
        }
    }
}

/// Answers whether a subscriber currently wants to see messages by an author.
///
/// Callers are expected to bound the call with a timeout. A timeout or any
/// other failure is reported as `Unavailable` and never as `Ok(false)`.
pub trait AcceptabilityOracle: Send + Sync {
    fn is_wanted(&self, subscriber_id: &str, author_id: &str) -> Result<bool, OracleError>;
}

/// Oracle that accepts every author. Handy for local boards with no trust layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl AcceptabilityOracle for AcceptAll {
    fn is_wanted(&self, _subscriber_id: &str, _author_id: &str) -> Result<bool, OracleError> {
        Ok(true)
    }
}
