//! Error types shared by the client, the store, and the engine.
//!
//! The store and client fail loudly; the engine is the single place that
//! decides containment, catching at mapping granularity.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No stored credential for a user. Aborts that user's processing only.
    #[error("no stored credential for user {0}")]
    CredentialNotFound(String),

    /// The remote service rejected a request after the refresh-once retry
    /// already ran, or the refresh itself failed.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// A playlist, mapping, or source referenced by id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-2xx response from the remote API.
    #[error("remote service error (status {status}): {message}")]
    RemoteService { status: u16, message: String },

    /// Malformed stored data or a violated call contract.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::CredentialNotFound("spotify:alice".into());
        assert_eq!(err.to_string(), "no stored credential for user spotify:alice");

        let err = Error::RemoteService {
            status: 429,
            message: "rate limited".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote service error (status 429): rate limited"
        );

        let err = Error::NotFound("playlist 37i9dQ".into());
        assert_eq!(err.to_string(), "not found: playlist 37i9dQ");
    }
}
