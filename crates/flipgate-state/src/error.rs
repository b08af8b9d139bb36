//! State store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("state table unavailable: {0}")]
    Table(String),

    /// A read or write inside an open transaction failed.
    #[error("state storage error: {0}")]
    Storage(String),

    /// A record could not be encoded to or decoded from JSON.
    #[error("corrupt state record: {0}")]
    Codec(String),

    #[error("release {0} cannot be archived without an archive timestamp")]
    Unarchived(String),
}
