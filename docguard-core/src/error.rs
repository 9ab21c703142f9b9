//! Error types and result types for guarded store operations.
//!
//! Every operation in this crate returns [`StoreResult<T>`]. Failures raised by the
//! underlying driver are carried unmodified inside [`StoreError::Backend`] and can be
//! recovered with [`StoreError::backend_source`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed driver error, kept as-is so callers can downcast to the native type.
pub type BoxedDriverError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents all possible errors raised by the connection manager and collection accessors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A collection accessor was opened without a database handle.
    #[error("Configuration error: no database client was provided")]
    MissingClient,
    /// A collection accessor was opened with an empty collection name.
    #[error("Configuration error: no collection name was provided")]
    MissingCollectionName,
    /// Invalid or missing connection settings.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// `connect` was called on a manager that is already connected.
    #[error("Lifecycle error: already connected")]
    AlreadyConnected,
    /// An operation that needs a live connection was called while disconnected.
    #[error("Lifecycle error: not connected")]
    NotConnected,
    /// A document with the same `uuid` already exists in the named collection.
    #[error("Duplicate entry in collection {0}")]
    DuplicateEntry(String),
    /// No document matched the filter of a checked update or delete in the named collection.
    #[error("Non-existent entry in collection {0}")]
    NonExistentEntry(String),
    /// The document handed to a checked operation has the wrong shape.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The driver failed to set up a client connection.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error raised by the underlying driver, passed through unmodified.
    #[error("Backend error: {0}")]
    Backend(#[source] BoxedDriverError),
}

/// Coarse classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing client, missing collection name, bad settings or a malformed document.
    Configuration,
    /// Connect while connected, or disconnect while disconnected.
    Lifecycle,
    /// A checked insert hit an existing `uuid`.
    DuplicateEntry,
    /// A checked update or delete matched nothing.
    NonExistentEntry,
    /// Anything raised by the driver or by (de)serialization.
    Upstream,
}

impl StoreError {
    /// Wraps a native driver error without altering it.
    pub fn backend<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::MissingClient
            | StoreError::MissingCollectionName
            | StoreError::Configuration(_)
            | StoreError::InvalidDocument(_) => ErrorKind::Configuration,
            StoreError::AlreadyConnected | StoreError::NotConnected => ErrorKind::Lifecycle,
            StoreError::DuplicateEntry(_) => ErrorKind::DuplicateEntry,
            StoreError::NonExistentEntry(_) => ErrorKind::NonExistentEntry,
            StoreError::Serialization(_)
            | StoreError::Initialization(_)
            | StoreError::Backend(_) => ErrorKind::Upstream,
        }
    }

    /// Returns the driver's own error if this is a [`StoreError::Backend`] holding an `E`.
    pub fn backend_source<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            StoreError::Backend(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for guarded store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("socket closed")]
    struct SocketClosed;

    #[test]
    fn classifies_variants() {
        assert_eq!(StoreError::MissingClient.kind(), ErrorKind::Configuration);
        assert_eq!(StoreError::MissingCollectionName.kind(), ErrorKind::Configuration);
        assert_eq!(StoreError::AlreadyConnected.kind(), ErrorKind::Lifecycle);
        assert_eq!(StoreError::NotConnected.kind(), ErrorKind::Lifecycle);
        assert_eq!(StoreError::DuplicateEntry("users".into()).kind(), ErrorKind::DuplicateEntry);
        assert_eq!(StoreError::NonExistentEntry("users".into()).kind(), ErrorKind::NonExistentEntry);
        assert_eq!(StoreError::backend(SocketClosed).kind(), ErrorKind::Upstream);
    }

    #[test]
    fn backend_error_keeps_native_type() {
        let err = StoreError::backend(SocketClosed);

        assert!(err.backend_source::<SocketClosed>().is_some());
        assert_eq!(err.to_string(), "Backend error: socket closed");
        assert!(StoreError::NotConnected.backend_source::<SocketClosed>().is_none());
    }

    #[test]
    fn messages_name_the_collection() {
        assert_eq!(
            StoreError::DuplicateEntry("users".into()).to_string(),
            "Duplicate entry in collection users"
        );
        assert_eq!(
            StoreError::NonExistentEntry("users".into()).to_string(),
            "Non-existent entry in collection users"
        );
    }
}
