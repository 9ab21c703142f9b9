//! Convenient re-exports of commonly used types from docguard.
//!
//! ```ignore
//! use docguard::prelude::*;
//! ```
//!
//! This provides access to:
//! - The connection manager and collection accessors
//! - Driver traits, so pass-through operations are callable on accessors
//! - Records, selectors and update strategies
//! - Option, result and error types

pub use docguard_core::{
    collection::{CollectionAccessor, CollectionAccessorBuilder, TypedCollectionAccessor},
    config::ConnectionConfig,
    connection::ConnectionManager,
    document::{ID_FIELD, Record, RecordExt, UUID_FIELD, new_uuid},
    driver::{ChangeStream, ClientDriver, CollectionDriver, Connector, DatabaseDriver},
    error::{ErrorKind, StoreError, StoreResult},
    model::{
        BulkWriteResult, CollectionInfo, CreateCollectionOptions, DeleteResult,
        FindAndModifyOptions, FindOptions, IndexSpec, InsertManyResult, InsertOneResult,
        ReturnDocument, UpdateResult, WriteModel,
    },
    update::{Selector, UpdateStrategy},
};
