//! Errors raised by the in-memory engine.
//!
//! To the guard layer these are driver errors: they reach callers wrapped, unmodified,
//! in [`StoreError::Backend`].

use docguard_core::error::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InMemoryError {
    /// A write would break a unique index.
    #[error("E11000 duplicate key error collection: {namespace} index: {index} dup key: {key}")]
    DuplicateKey {
        namespace: String,
        index: String,
        key: String,
    },
    /// A filter or update used an operator the engine does not know.
    #[error("unknown operator: {0}")]
    UnknownOperator(String),
    /// An aggregation stage the engine does not support.
    #[error("unrecognized pipeline stage name: {0}")]
    UnsupportedStage(String),
    /// A command the engine does not support.
    #[error("no such command: '{0}'")]
    CommandNotFound(String),
    /// A write rejected by the collection's validator.
    #[error("Document failed validation")]
    ValidationFailed,
    #[error("Performing an update on the path '_id' would modify the immutable field '_id'")]
    ImmutableId,
    #[error("ns does not exist: {0}")]
    NamespaceNotFound(String),
    #[error("Collection {0} already exists.")]
    NamespaceExists(String),
    #[error("index not found with name [{0}]")]
    IndexNotFound(String),
    /// Malformed argument.
    #[error("{0}")]
    BadValue(String),
}

pub(crate) type EngineResult<T> = Result<T, InMemoryError>;

impl From<InMemoryError> for StoreError {
    fn from(err: InMemoryError) -> Self {
        StoreError::backend(err)
    }
}
