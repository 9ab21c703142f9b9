use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::{StreamExt, TryStreamExt};
use mongodb::{Client, Collection, Database, options::ClientOptions};
use tracing::debug;

use docguard_core::{
    config::ConnectionConfig,
    driver::{ChangeStream, ClientDriver, CollectionDriver, Connector, DatabaseDriver},
    error::{StoreError, StoreResult},
    model::{
        CollectionInfo, CreateCollectionOptions, DeleteResult, FindAndModifyOptions, FindOptions,
        IndexSpec, InsertManyResult, InsertOneResult, UpdateResult,
    },
};

use crate::convert;

/// Opens [`MongoClient`]s with the official async driver.
#[derive(Debug, Clone, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Client = MongoClient;

    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<MongoClient> {
        let mut options = ClientOptions::parse(&config.address)
            .await
            .map_err(|e| StoreError::Initialization(e.to_string()))?;

        convert::apply_config(&mut options, config);

        debug!(hosts = ?options.hosts, app_name = ?options.app_name, "creating mongodb client");

        Ok(MongoClient {
            client: Client::with_options(options)
                .map_err(|e| StoreError::Initialization(e.to_string()))?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MongoClient {
    client: Client,
}

impl MongoClient {
    /// Wraps an already configured driver client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ClientDriver for MongoClient {
    type Database = MongoDatabase;

    fn database(&self, name: &str) -> MongoDatabase {
        MongoDatabase {
            database: self.client.database(name),
        }
    }

    async fn shutdown(self) -> StoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    database: Database,
}

impl MongoDatabase {
    pub fn inner(&self) -> &Database {
        &self.database
    }

    /// Runs `listCollections` and returns the raw collection specifications.
    async fn collection_specs(&self, filter: Option<Document>) -> StoreResult<Vec<Document>> {
        let mut command = doc! { "listCollections": 1 };
        if let Some(filter) = filter {
            command.insert("filter", filter);
        }

        self.database
            .run_cursor_command(command)
            .await
            .map_err(StoreError::backend)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(StoreError::backend)
    }
}

#[async_trait]
impl DatabaseDriver for MongoDatabase {
    type Collection = MongoCollection;

    fn name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> MongoCollection {
        MongoCollection {
            collection: self.database.collection::<Document>(name),
            database: self.database.clone(),
        }
    }

    async fn list_collections(&self, filter: Option<Document>) -> StoreResult<Vec<CollectionInfo>> {
        self.collection_specs(filter)
            .await?
            .into_iter()
            .map(convert::collection_info)
            .collect()
    }

    async fn list_collection_names(&self, filter: Option<Document>) -> StoreResult<Vec<String>> {
        let action = self.database.list_collection_names();
        let names = match filter {
            Some(filter) => action.filter(filter).await,
            None => action.await,
        };

        names.map_err(StoreError::backend)
    }

    async fn create_collection(&self, name: &str, options: CreateCollectionOptions) -> StoreResult<()> {
        self.database
            .create_collection(name)
            .with_options(convert::create_collection_options(options))
            .await
            .map_err(StoreError::backend)
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.database
            .collection::<Document>(name)
            .drop()
            .await
            .map_err(StoreError::backend)
    }

    async fn stats(&self) -> StoreResult<Document> {
        self.run_command(doc! { "dbStats": 1 }).await
    }

    async fn run_command(&self, command: Document) -> StoreResult<Document> {
        self.database
            .run_command(command)
            .await
            .map_err(StoreError::backend)
    }
}

#[derive(Debug, Clone)]
pub struct MongoCollection {
    collection: Collection<Document>,
    database: Database,
}

impl MongoCollection {
    pub fn inner(&self) -> &Collection<Document> {
        &self.collection
    }
}

#[async_trait]
impl CollectionDriver for MongoCollection {
    fn name(&self) -> &str {
        self.collection.name()
    }

    async fn find(&self, filter: Document, options: FindOptions) -> StoreResult<Vec<Document>> {
        self.collection
            .find(filter)
            .with_options(convert::find_options(options))
            .await
            .map_err(StoreError::backend)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(StoreError::backend)
    }

    async fn find_one(&self, filter: Document, options: FindOptions) -> StoreResult<Option<Document>> {
        self.collection
            .find_one(filter)
            .with_options(convert::find_one_options(options))
            .await
            .map_err(StoreError::backend)
    }

    async fn count_documents(&self, filter: Document) -> StoreResult<u64> {
        self.collection
            .count_documents(filter)
            .await
            .map_err(StoreError::backend)
    }

    async fn estimated_document_count(&self) -> StoreResult<u64> {
        self.collection
            .estimated_document_count()
            .await
            .map_err(StoreError::backend)
    }

    async fn distinct(&self, field: &str, filter: Document) -> StoreResult<Vec<Bson>> {
        self.collection
            .distinct(field, filter)
            .await
            .map_err(StoreError::backend)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> StoreResult<Vec<Document>> {
        self.collection
            .aggregate(pipeline)
            .await
            .map_err(StoreError::backend)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(StoreError::backend)
    }

    async fn insert_one(&self, document: Document) -> StoreResult<InsertOneResult> {
        // The driver assigns missing ids without reporting the stored document back.
        let document = match document.contains_key("_id") {
            true => document,
            false => {
                let mut stored = doc! { "_id": ObjectId::new() };
                for (field, value) in document {
                    stored.insert(field, value);
                }
                stored
            }
        };

        let result = self
            .collection
            .insert_one(&document)
            .await
            .map_err(StoreError::backend)?;

        Ok(InsertOneResult {
            inserted_id: result.inserted_id,
            document,
        })
    }

    async fn insert_many(&self, documents: Vec<Document>) -> StoreResult<InsertManyResult> {
        self.collection
            .insert_many(documents)
            .await
            .map(convert::insert_many_result)
            .map_err(StoreError::backend)
    }

    async fn replace_one(&self, filter: Document, replacement: Document, upsert: bool) -> StoreResult<UpdateResult> {
        self.collection
            .replace_one(filter, replacement)
            .upsert(upsert)
            .await
            .map(convert::update_result)
            .map_err(StoreError::backend)
    }

    async fn update_one(&self, filter: Document, update: Document, upsert: bool) -> StoreResult<UpdateResult> {
        self.collection
            .update_one(filter, update)
            .upsert(upsert)
            .await
            .map(convert::update_result)
            .map_err(StoreError::backend)
    }

    async fn update_many(&self, filter: Document, update: Document, upsert: bool) -> StoreResult<UpdateResult> {
        self.collection
            .update_many(filter, update)
            .upsert(upsert)
            .await
            .map(convert::update_result)
            .map_err(StoreError::backend)
    }

    async fn delete_one(&self, filter: Document) -> StoreResult<DeleteResult> {
        self.collection
            .delete_one(filter)
            .await
            .map(convert::delete_result)
            .map_err(StoreError::backend)
    }

    async fn delete_many(&self, filter: Document) -> StoreResult<DeleteResult> {
        self.collection
            .delete_many(filter)
            .await
            .map(convert::delete_result)
            .map_err(StoreError::backend)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>> {
        self.collection
            .find_one_and_update(filter, update)
            .with_options(convert::find_one_and_update_options(options))
            .await
            .map_err(StoreError::backend)
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>> {
        self.collection
            .find_one_and_replace(filter, replacement)
            .with_options(convert::find_one_and_replace_options(options))
            .await
            .map_err(StoreError::backend)
    }

    async fn find_one_and_delete(&self, filter: Document) -> StoreResult<Option<Document>> {
        self.collection
            .find_one_and_delete(filter)
            .await
            .map_err(StoreError::backend)
    }

    async fn create_index(&self, index: IndexSpec) -> StoreResult<String> {
        self.collection
            .create_index(convert::index_model(index))
            .await
            .map(|result| result.index_name)
            .map_err(StoreError::backend)
    }

    async fn create_indexes(&self, indexes: Vec<IndexSpec>) -> StoreResult<Vec<String>> {
        self.collection
            .create_indexes(indexes.into_iter().map(convert::index_model))
            .await
            .map(|result| result.index_names)
            .map_err(StoreError::backend)
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexSpec>> {
        Ok(self
            .collection
            .list_indexes()
            .await
            .map_err(StoreError::backend)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(StoreError::backend)?
            .into_iter()
            .map(convert::index_spec)
            .collect())
    }

    async fn drop_index(&self, name: &str) -> StoreResult<()> {
        self.collection
            .drop_index(name)
            .await
            .map_err(StoreError::backend)
    }

    async fn drop_indexes(&self) -> StoreResult<()> {
        self.collection
            .drop_indexes()
            .await
            .map_err(StoreError::backend)
    }

    async fn options(&self) -> StoreResult<Document> {
        let specs = self
            .database
            .run_cursor_command(doc! {
                "listCollections": 1,
                "filter": { "name": self.collection.name() },
            })
            .await
            .map_err(StoreError::backend)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(StoreError::backend)?;

        match specs.into_iter().next() {
            Some(spec) => Ok(convert::collection_info(spec)?.options),
            None => Ok(Document::new()),
        }
    }

    async fn drop(&self) -> StoreResult<()> {
        self.collection
            .drop()
            .await
            .map_err(StoreError::backend)
    }

    async fn watch(&self, pipeline: Vec<Document>) -> StoreResult<ChangeStream> {
        let stream = self
            .collection
            .watch()
            .pipeline(pipeline)
            .await
            .map_err(StoreError::backend)?
            .with_type::<Document>();

        Ok(stream.map_err(StoreError::backend).boxed())
    }
}
