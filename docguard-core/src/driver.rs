//! Driver abstraction for the wrapped document database.
//!
//! These traits are the delegate interface the rest of the crate forwards to. A driver
//! exposes four layers, each obtained from the previous one:
//!
//! - [`Connector`]: opens a client from a [`ConnectionConfig`]
//! - [`ClientDriver`]: a live client, hands out database handles and shuts down
//! - [`DatabaseDriver`]: administrative operations on one database
//! - [`CollectionDriver`]: the full operation set of one collection
//!
//! Arguments and results pass through unmodified. Filters, updates, pipelines and
//! commands are BSON documents in the engine's own query language.
//!
//! # Thread Safety
//!
//! Handles are `Send + Sync + Clone` and are expected to be cheap to clone, so that many
//! accessors can share one connection without extra coordination.

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{
    config::ConnectionConfig,
    error::StoreResult,
    model::{
        BulkWriteResult, CollectionInfo, CreateCollectionOptions, DeleteResult,
        FindAndModifyOptions, FindOptions, IndexSpec, InsertManyResult, InsertOneResult,
        UpdateResult, WriteModel,
    },
};

/// Stream of change events produced by [`CollectionDriver::watch`].
pub type ChangeStream = BoxStream<'static, StoreResult<Document>>;

/// Client type produced by a connector.
pub type ClientOf<C> = <C as Connector>::Client;
/// Database handle type produced by a connector's client.
pub type DatabaseOf<C> = <ClientOf<C> as ClientDriver>::Database;
/// Collection handle type produced by a connector's database.
pub type CollectionOf<C> = <DatabaseOf<C> as DatabaseDriver>::Collection;

/// Opens client connections.
///
/// This is what a [`ConnectionManager`](crate::connection::ConnectionManager) is built
/// around; swapping the connector swaps the engine.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    type Client: ClientDriver;

    /// Opens a client to `config.address`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Initialization`](crate::error::StoreError::Initialization) if the
    /// address cannot be parsed or the client cannot be created.
    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<Self::Client>;
}

/// A live client connection.
#[async_trait]
pub trait ClientDriver: Send + Sync + Debug + 'static {
    type Database: DatabaseDriver;

    /// Returns a handle to the named database. No round trip is made.
    fn database(&self, name: &str) -> Self::Database;

    /// Closes the connection and releases its resources.
    async fn shutdown(self) -> StoreResult<()>
    where
        Self: Sized;
}

/// Administrative operations on one database.
#[async_trait]
pub trait DatabaseDriver: Send + Sync + Debug + Clone + 'static {
    type Collection: CollectionDriver;

    /// Returns the database name.
    fn name(&self) -> &str;

    /// Returns a handle to the named collection. No round trip is made.
    fn collection(&self, name: &str) -> Self::Collection;

    /// Lists collections, optionally filtered on their specification.
    async fn list_collections(&self, filter: Option<Document>) -> StoreResult<Vec<CollectionInfo>>;

    /// Lists collection names, optionally filtered on their specification.
    async fn list_collection_names(&self, filter: Option<Document>) -> StoreResult<Vec<String>>;

    /// Creates a collection explicitly.
    async fn create_collection(
        &self,
        name: &str,
        options: CreateCollectionOptions,
    ) -> StoreResult<()>;

    /// Drops a collection and everything in it.
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// Returns the engine's statistics for this database.
    async fn stats(&self) -> StoreResult<Document>;

    /// Runs a raw database command.
    async fn run_command(&self, command: Document) -> StoreResult<Document>;

    /// Returns a handle to every collection in the database.
    async fn collections(&self) -> StoreResult<Vec<Self::Collection>> {
        Ok(self
            .list_collection_names(None)
            .await?
            .iter()
            .map(|name| self.collection(name))
            .collect())
    }
}

/// The full operation set of one collection.
#[async_trait]
pub trait CollectionDriver: Send + Sync + Debug + Clone + 'static {
    /// Returns the collection name.
    fn name(&self) -> &str;

    /// Returns every document matching `filter`.
    async fn find(&self, filter: Document, options: FindOptions) -> StoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`.
    async fn find_one(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> StoreResult<Option<Document>>;

    /// Counts documents matching `filter`.
    async fn count_documents(&self, filter: Document) -> StoreResult<u64>;

    /// Returns the engine's estimate of the collection size.
    async fn estimated_document_count(&self) -> StoreResult<u64>;

    /// Returns the distinct values of `field` across documents matching `filter`.
    async fn distinct(&self, field: &str, filter: Document) -> StoreResult<Vec<Bson>>;

    /// Runs an aggregation pipeline.
    async fn aggregate(&self, pipeline: Vec<Document>) -> StoreResult<Vec<Document>>;

    async fn insert_one(&self, document: Document) -> StoreResult<InsertOneResult>;

    async fn insert_many(&self, documents: Vec<Document>) -> StoreResult<InsertManyResult>;

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult>;

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult>;

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult>;

    async fn delete_one(&self, filter: Document) -> StoreResult<DeleteResult>;

    async fn delete_many(&self, filter: Document) -> StoreResult<DeleteResult>;

    /// Atomically updates one document and returns it, or `None` if nothing matched.
    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>>;

    /// Atomically replaces one document and returns it, or `None` if nothing matched.
    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>>;

    /// Atomically removes one document and returns it, or `None` if nothing matched.
    async fn find_one_and_delete(&self, filter: Document) -> StoreResult<Option<Document>>;

    /// Applies a batch of writes in order, stopping at the first failure.
    ///
    /// The default implementation issues one call per model.
    async fn bulk_write(&self, models: Vec<WriteModel>) -> StoreResult<BulkWriteResult> {
        let mut result = BulkWriteResult::default();

        for (index, model) in models.into_iter().enumerate() {
            match model {
                WriteModel::InsertOne { document } => {
                    let inserted = self.insert_one(document).await?;
                    result.inserted_count += 1;
                    result.inserted_ids.insert(index, inserted.inserted_id);
                }
                WriteModel::UpdateOne { filter, update, upsert } => {
                    let updated = self.update_one(filter, update, upsert).await?;
                    result.record_update(index, updated);
                }
                WriteModel::UpdateMany { filter, update, upsert } => {
                    let updated = self.update_many(filter, update, upsert).await?;
                    result.record_update(index, updated);
                }
                WriteModel::ReplaceOne { filter, replacement, upsert } => {
                    let replaced = self.replace_one(filter, replacement, upsert).await?;
                    result.record_update(index, replaced);
                }
                WriteModel::DeleteOne { filter } => {
                    result.deleted_count += self.delete_one(filter).await?.deleted_count;
                }
                WriteModel::DeleteMany { filter } => {
                    result.deleted_count += self.delete_many(filter).await?.deleted_count;
                }
            }
        }

        Ok(result)
    }

    /// Creates an index and returns its name.
    async fn create_index(&self, index: IndexSpec) -> StoreResult<String>;

    /// Creates several indexes and returns their names in order.
    async fn create_indexes(&self, indexes: Vec<IndexSpec>) -> StoreResult<Vec<String>> {
        let mut names = Vec::with_capacity(indexes.len());

        for index in indexes {
            names.push(self.create_index(index).await?);
        }

        Ok(names)
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexSpec>>;

    async fn drop_index(&self, name: &str) -> StoreResult<()>;

    /// Drops every index except the one on `_id`.
    async fn drop_indexes(&self) -> StoreResult<()>;

    /// Returns the options the collection was created with, empty if none.
    async fn options(&self) -> StoreResult<Document>;

    /// Drops this collection.
    async fn drop(&self) -> StoreResult<()>;

    /// Subscribes to change events, optionally filtered by an aggregation pipeline.
    async fn watch(&self, pipeline: Vec<Document>) -> StoreResult<ChangeStream>;
}
