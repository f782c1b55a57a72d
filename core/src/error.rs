use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("acceptability oracle unavailable: {0}")]
    OracleUnavailable(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Transient failures leave state untouched and are retried by the next
    /// delivery or sweep.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::OracleUnavailable(_) => true,
            CoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
