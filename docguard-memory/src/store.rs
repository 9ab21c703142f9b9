//! In-memory engine implementing the docguard driver traits.
//!
//! An [`InMemoryServer`] holds every database behind one async-aware read-write lock.
//! Connectors, clients, databases and collections are cheap handles onto a shared
//! server, so several connection managers built on clones of the same
//! [`InMemoryConnector`] see the same data.
//!
//! The engine honours the parts of the document database contract the guard layer and
//! its tests rely on: query and update operators, unique indexes, validators, capped
//! collections, upserts, and change streams filtered by `$match`/`$project` pipelines.
//!
//! # Example
//!
//! ```ignore
//! use docguard::{prelude::*, memory::InMemoryConnector};
//!
//! let connector = InMemoryConnector::new();
//! let server = connector.server().clone();
//!
//! let mut manager = ConnectionManager::new(connector);
//! manager.connect("memory://local", "app").await?;
//!
//! let users = manager.collection("users").await?;
//! users.insert_one(doc! { "uuid": "aaa" }).await?;
//!
//! assert_eq!(server.documents("app", "users").await.len(), 1);
//! ```

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::{
    StreamExt,
    channel::mpsc::{self, UnboundedSender},
};
use mea::rwlock::RwLock;
use tracing::debug;

use docguard_core::{
    config::ConnectionConfig,
    driver::{ChangeStream, ClientDriver, CollectionDriver, Connector, DatabaseDriver},
    error::{StoreError, StoreResult},
    model::{
        CollectionInfo, CreateCollectionOptions, DeleteResult, FindAndModifyOptions, FindOptions,
        IndexSpec, InsertManyResult, InsertOneResult, ReturnDocument, UpdateResult,
    },
};

use crate::{
    error::{EngineResult, InMemoryError},
    evaluator::{
        as_i64, compare_by, distinct_values, filter_documents, matches, project, run_pipeline,
        sort_documents, truthy, values_at, values_equal,
    },
    modifier::{apply_update, is_replacement_document, is_update_document, upsert_seed},
};

type Databases = BTreeMap<String, BTreeMap<String, CollectionState>>;

/// A change that happened under the write lock, published to watchers afterwards.
#[derive(Debug)]
enum Change {
    Insert(Document),
    Update { before: Document, after: Document },
    Replace(Document),
    Delete(Bson),
    Drop,
}

impl Change {
    fn into_event(self, database: &str, collection: &str, sequence: i64) -> Document {
        let operation = match &self {
            Change::Insert(_) => "insert",
            Change::Update { .. } => "update",
            Change::Replace(_) => "replace",
            Change::Delete(_) => "delete",
            Change::Drop => "drop",
        };

        let mut event = doc! {
            "_id": { "_data": format!("{sequence:016X}") },
            "operationType": operation,
            "ns": { "db": database, "coll": collection },
        };

        match self {
            Change::Insert(document) | Change::Replace(document) => {
                event.insert("documentKey", key_of(&document));
                event.insert("fullDocument", document);
            }
            Change::Update { before, after } => {
                let updated = after
                    .iter()
                    .filter(|(field, value)| before.get(field.as_str()) != Some(*value))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect::<Document>();
                let removed = before
                    .keys()
                    .filter(|field| !after.contains_key(field.as_str()))
                    .map(|field| Bson::String(field.clone()))
                    .collect::<Vec<_>>();

                event.insert("documentKey", key_of(&after));
                event.insert(
                    "updateDescription",
                    doc! { "updatedFields": updated, "removedFields": removed },
                );
            }
            Change::Delete(id) => {
                event.insert("documentKey", doc! { "_id": id });
            }
            Change::Drop => {}
        }

        event
    }
}

fn key_of(document: &Document) -> Document {
    doc! { "_id": document.get("_id").cloned().unwrap_or(Bson::Null) }
}

#[derive(Debug)]
struct Watcher {
    pipeline: Vec<Document>,
    sender: UnboundedSender<StoreResult<Document>>,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: Databases,
    /// Keyed by `database.collection`.
    watchers: BTreeMap<String, Vec<Watcher>>,
    event_counter: i64,
}

impl ServerState {
    fn collection(&self, database: &str, name: &str) -> Option<&CollectionState> {
        self.databases.get(database)?.get(name)
    }

    fn collection_mut(&mut self, database: &str, name: &str, create: bool) -> Option<&mut CollectionState> {
        if create {
            return Some(
                self.databases
                    .entry(database.to_string())
                    .or_default()
                    .entry(name.to_string())
                    .or_insert_with(|| CollectionState::new(Document::new())),
            );
        }

        self.databases.get_mut(database)?.get_mut(name)
    }

    /// Removes a collection and closes its change streams. Returns `false` if it did not exist.
    fn drop_collection(&mut self, database: &str, name: &str) -> bool {
        let existed = self
            .databases
            .get_mut(database)
            .and_then(|collections| collections.remove(name))
            .is_some();

        if self
            .databases
            .get(database)
            .is_some_and(|collections| collections.is_empty())
        {
            self.databases.remove(database);
        }

        if existed {
            self.publish(database, name, vec![Change::Drop]);
            self.watchers.remove(&format!("{database}.{name}"));
        }

        existed
    }

    fn publish(&mut self, database: &str, collection: &str, changes: Vec<Change>) {
        let namespace = format!("{database}.{collection}");
        let Some(watchers) = self.watchers.get_mut(&namespace) else {
            return;
        };

        for change in changes {
            self.event_counter += 1;
            let event = change.into_event(database, collection, self.event_counter);

            watchers.retain(|watcher| match run_pipeline(vec![event.clone()], &watcher.pipeline) {
                Ok(events) => events
                    .into_iter()
                    .all(|event| watcher.sender.unbounded_send(Ok(event)).is_ok()),
                Err(err) => {
                    let _ = watcher.sender.unbounded_send(Err(err.into()));
                    false
                }
            });
        }

        if watchers.is_empty() {
            self.watchers.remove(&namespace);
        }
    }

    /// Registers a change stream on `namespace`, dropping streams whose receivers are gone.
    fn register(&mut self, namespace: String, watcher: Watcher) {
        let watchers = self.watchers.entry(namespace).or_default();

        watchers.retain(|watcher| !watcher.sender.is_closed());
        watchers.push(watcher);
    }
}

/// Documents, indexes and creation options of one collection.
#[derive(Debug, Clone)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
    options: Document,
}

/// Filter, update and flags shared by the update-style writes.
struct Modification<'a> {
    filter: &'a Document,
    update: &'a Document,
    replace: bool,
    upsert: bool,
}

impl Modification<'_> {
    fn check(&self) -> EngineResult<()> {
        match self.replace {
            true if !is_replacement_document(self.update) => Err(InMemoryError::BadValue(
                "Replacement document must not contain atomic operators".to_string(),
            )),
            false if !is_update_document(self.update) => Err(InMemoryError::BadValue(
                "Update document requires atomic operators".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Produces the new version of `before`.
    fn apply(&self, before: &Document) -> EngineResult<Document> {
        if !self.replace {
            let mut after = before.clone();
            apply_update(&mut after, self.update, false)?;
            return Ok(after);
        }

        if let (Some(id), Some(new_id)) = (before.get("_id"), self.update.get("_id")) {
            if !values_equal(id, new_id) {
                return Err(InMemoryError::ImmutableId);
            }
        }

        Ok(with_fields(before.get("_id"), self.update))
    }

    /// Produces the document an upsert inserts.
    fn upserted(&self) -> EngineResult<Document> {
        let mut seed = upsert_seed(self.filter)?;

        if !self.replace {
            apply_update(&mut seed, self.update, true)?;
            return Ok(seed);
        }

        Ok(with_fields(self.update.get("_id").or_else(|| seed.get("_id")), self.update))
    }

    fn change(&self, before: Document, after: Document) -> Change {
        match self.replace {
            true => Change::Replace(after),
            false => Change::Update { before, after },
        }
    }
}

/// `_id` (if any) followed by every other field of `fields`.
fn with_fields(id: Option<&Bson>, fields: &Document) -> Document {
    let mut document = Document::new();

    if let Some(id) = id {
        document.insert("_id", id.clone());
    }
    for (field, value) in fields {
        if field != "_id" {
            document.insert(field.clone(), value.clone());
        }
    }

    document
}

/// Gives `document` a fresh `ObjectId` as its first field unless it already has an `_id`.
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }

    let mut stored = doc! { "_id": ObjectId::new() };
    for (field, value) in document {
        stored.insert(field, value);
    }

    stored
}

/// The key a document occupies in `index`, `None` if a sparse index skips it.
fn index_key(index: &IndexSpec, document: &Document) -> Option<Bson> {
    let mut key = Document::new();
    let mut present = false;

    for (field, _) in &index.keys {
        match values_at(document, field).first() {
            Some(value) => {
                present = true;
                key.insert(field.clone(), (*value).clone());
            }
            None => {
                key.insert(field.clone(), Bson::Null);
            }
        }
    }

    (present || !index.sparse).then_some(Bson::Document(key))
}

fn usize_from(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

impl CollectionState {
    fn new(options: Document) -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexSpec::new(doc! { "_id": 1 }).name("_id_").unique(true)],
            options,
        }
    }

    fn positions(&self, filter: &Document, sort: Option<&Document>) -> EngineResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (position, document) in self.documents.iter().enumerate() {
            if matches(document, filter)? {
                positions.push(position);
            }
        }
        if let Some(sort) = sort {
            positions.sort_by(|a, b| compare_by(&self.documents[*a], &self.documents[*b], sort));
        }

        Ok(positions)
    }

    /// Checks the validator and every unique index. `skip` is the position being replaced.
    fn validate(&self, namespace: &str, candidate: &Document, skip: Option<usize>) -> EngineResult<()> {
        if let Ok(validator) = self.options.get_document("validator") {
            if !matches(candidate, validator)? {
                return Err(InMemoryError::ValidationFailed);
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(key) = index_key(index, candidate) else {
                continue;
            };

            let clash = self.documents.iter().enumerate().any(|(position, other)| {
                Some(position) != skip
                    && index_key(index, other).is_some_and(|other| values_equal(&other, &key))
            });

            if clash {
                return Err(InMemoryError::DuplicateKey {
                    namespace: namespace.to_string(),
                    index: index.resolved_name(),
                    key: key.to_string(),
                });
            }
        }

        Ok(())
    }

    fn insert(&mut self, namespace: &str, document: Document) -> EngineResult<Document> {
        let stored = with_id(document);

        self.validate(namespace, &stored, None)?;
        self.documents.push(stored.clone());

        let capped = self.options.get("capped").is_some_and(truthy);
        if let Some(max) = self.options.get("max").and_then(as_i64).filter(|_| capped) {
            let max = usize::try_from(max).unwrap_or(usize::MAX);
            let excess = self.documents.len().saturating_sub(max);
            self.documents.drain(..excess);
        }

        Ok(stored)
    }

    fn store_at(&mut self, namespace: &str, position: usize, document: Document) -> EngineResult<()> {
        self.validate(namespace, &document, Some(position))?;
        self.documents[position] = document;

        Ok(())
    }

    fn update(
        &mut self,
        namespace: &str,
        modification: &Modification<'_>,
        multi: bool,
        changes: &mut Vec<Change>,
    ) -> EngineResult<UpdateResult> {
        modification.check()?;

        let mut positions = self.positions(modification.filter, None)?;
        if !multi {
            positions.truncate(1);
        }

        if positions.is_empty() {
            if !modification.upsert {
                return Ok(UpdateResult::default());
            }

            let stored = self.insert(namespace, modification.upserted()?)?;
            let upserted_id = stored.get("_id").cloned();
            changes.push(Change::Insert(stored));

            return Ok(UpdateResult { upserted_id, ..UpdateResult::default() });
        }

        let mut result = UpdateResult {
            matched_count: positions.len() as u64,
            ..UpdateResult::default()
        };

        for position in positions {
            let before = self.documents[position].clone();
            let after = modification.apply(&before)?;

            if after != before {
                self.store_at(namespace, position, after.clone())?;
                result.modified_count += 1;
                changes.push(modification.change(before, after));
            }
        }

        Ok(result)
    }

    fn find_and_modify(
        &mut self,
        namespace: &str,
        modification: &Modification<'_>,
        options: &FindAndModifyOptions,
        changes: &mut Vec<Change>,
    ) -> EngineResult<Option<Document>> {
        modification.check()?;

        let position = self
            .positions(modification.filter, options.sort.as_ref())?
            .into_iter()
            .next();

        let (before, after) = match position {
            None if modification.upsert => {
                let stored = self.insert(namespace, modification.upserted()?)?;
                changes.push(Change::Insert(stored.clone()));
                (None, stored)
            }
            None => return Ok(None),
            Some(position) => {
                let before = self.documents[position].clone();
                let after = modification.apply(&before)?;

                if after != before {
                    self.store_at(namespace, position, after.clone())?;
                    changes.push(modification.change(before.clone(), after.clone()));
                }
                (Some(before), after)
            }
        };

        let returned = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => Some(after),
        };

        returned
            .map(|document| match &options.projection {
                Some(projection) => project(&document, projection),
                None => Ok(document),
            })
            .transpose()
    }

    /// Removes matching documents and returns them in collection order.
    fn delete(
        &mut self,
        filter: &Document,
        multi: bool,
        changes: &mut Vec<Change>,
    ) -> EngineResult<Vec<Document>> {
        let mut positions = self.positions(filter, None)?;
        if !multi {
            positions.truncate(1);
        }

        let mut removed = positions
            .into_iter()
            .rev()
            .map(|position| self.documents.remove(position))
            .collect::<Vec<_>>();
        removed.reverse();

        changes.extend(
            removed
                .iter()
                .map(|document| Change::Delete(document.get("_id").cloned().unwrap_or(Bson::Null))),
        );

        Ok(removed)
    }

    fn create_index(&mut self, namespace: &str, index: IndexSpec) -> EngineResult<String> {
        if index.keys.is_empty() {
            return Err(InMemoryError::BadValue("Index keys cannot be empty".to_string()));
        }

        let name = index.resolved_name();

        if let Some(existing) = self.indexes.iter().find(|existing| existing.resolved_name() == name) {
            return match existing.keys == index.keys && existing.unique == index.unique {
                true => Ok(name),
                false => Err(InMemoryError::BadValue(format!(
                    "An existing index has the same name as the requested index: {name}"
                ))),
            };
        }

        let index = IndexSpec { name: Some(name.clone()), ..index };

        if index.unique {
            let mut seen: Vec<Bson> = Vec::new();

            for key in self.documents.iter().filter_map(|document| index_key(&index, document)) {
                if seen.iter().any(|other| values_equal(other, &key)) {
                    return Err(InMemoryError::DuplicateKey {
                        namespace: namespace.to_string(),
                        index: name,
                        key: key.to_string(),
                    });
                }
                seen.push(key);
            }
        }

        self.indexes.push(index);

        Ok(name)
    }
}

/// Shared state behind every handle of one in-memory engine.
#[derive(Clone)]
pub struct InMemoryServer {
    state: Arc<RwLock<ServerState>>,
}

impl fmt::Debug for InMemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryServer").finish_non_exhaustive()
    }
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ServerState::default())),
        }
    }

    /// Names of databases holding at least one collection.
    pub async fn database_names(&self) -> Vec<String> {
        self.state.read().await.databases.keys().cloned().collect()
    }

    /// Returns a snapshot of a collection's documents in insertion order.
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.state
            .read()
            .await
            .collection(database, collection)
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }
}

/// Opens clients onto an [`InMemoryServer`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    server: InMemoryServer,
}

impl InMemoryConnector {
    /// Creates a connector with its own empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector onto an existing server.
    pub fn with_server(server: InMemoryServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &InMemoryServer {
        &self.server
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Client = InMemoryClient;

    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<InMemoryClient> {
        if config.address.trim().is_empty() {
            return Err(StoreError::Initialization("empty address".to_string()));
        }
        if config.database.is_empty() {
            return Err(StoreError::Initialization("empty database name".to_string()));
        }

        debug!(address = %config.address, "in-memory client opened");

        Ok(InMemoryClient {
            server: self.server.clone(),
            address: config.address.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryClient {
    server: InMemoryServer,
    address: String,
}

impl InMemoryClient {
    /// The address this client was opened with.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl ClientDriver for InMemoryClient {
    type Database = InMemoryDatabase;

    fn database(&self, name: &str) -> InMemoryDatabase {
        InMemoryDatabase {
            server: self.server.clone(),
            name: name.to_string(),
        }
    }

    async fn shutdown(self) -> StoreResult<()> {
        debug!(address = %self.address, "in-memory client closed");

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    server: InMemoryServer,
    name: String,
}

fn options_document(options: CreateCollectionOptions) -> EngineResult<Document> {
    let to_i64 = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
    let mut document = Document::new();

    if let Some(capped) = options.capped {
        if capped && options.size.is_none() {
            return Err(InMemoryError::BadValue(
                "the 'size' field is required when 'capped' is true".to_string(),
            ));
        }
        document.insert("capped", capped);
    }
    if let Some(size) = options.size {
        document.insert("size", to_i64(size));
    }
    if let Some(max) = options.max {
        document.insert("max", to_i64(max));
    }
    if let Some(validator) = options.validator {
        document.insert("validator", validator);
    }

    Ok(document)
}

#[async_trait]
impl DatabaseDriver for InMemoryDatabase {
    type Collection = InMemoryCollection;

    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> InMemoryCollection {
        InMemoryCollection {
            server: self.server.clone(),
            database: self.name.clone(),
            name: name.to_string(),
        }
    }

    async fn list_collections(&self, filter: Option<Document>) -> StoreResult<Vec<CollectionInfo>> {
        let state = self.server.state.read().await;
        let mut infos = Vec::new();

        for (name, collection) in state.databases.get(&self.name).into_iter().flatten() {
            let info = CollectionInfo {
                name: name.clone(),
                kind: "collection".to_string(),
                options: collection.options.clone(),
            };

            if let Some(filter) = &filter {
                let spec = doc! { "name": name.as_str(), "type": "collection", "options": info.options.clone() };
                if !matches(&spec, filter)? {
                    continue;
                }
            }

            infos.push(info);
        }

        Ok(infos)
    }

    async fn list_collection_names(&self, filter: Option<Document>) -> StoreResult<Vec<String>> {
        Ok(self
            .list_collections(filter)
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    async fn create_collection(&self, name: &str, options: CreateCollectionOptions) -> StoreResult<()> {
        if name.is_empty() {
            return Err(InMemoryError::BadValue("Invalid collection name".to_string()).into());
        }

        let options = options_document(options)?;
        let mut state = self.server.state.write().await;
        let collections = state.databases.entry(self.name.clone()).or_default();

        if collections.contains_key(name) {
            return Err(InMemoryError::NamespaceExists(format!("{}.{name}", self.name)).into());
        }

        collections.insert(name.to_string(), CollectionState::new(options));

        debug!(database = %self.name, collection = name, "collection created");

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let dropped = self.server.state.write().await.drop_collection(&self.name, name);

        debug!(database = %self.name, collection = name, dropped, "drop collection");

        Ok(())
    }

    async fn stats(&self) -> StoreResult<Document> {
        let state = self.server.state.read().await;
        let collections = state.databases.get(&self.name);

        let count = collections.map_or(0, |c| c.len());
        let objects = collections.map_or(0, |c| c.values().map(|s| s.documents.len()).sum::<usize>());
        let indexes = collections.map_or(0, |c| c.values().map(|s| s.indexes.len()).sum::<usize>());

        Ok(doc! {
            "db": self.name.as_str(),
            "collections": count as i64,
            "objects": objects as i64,
            "indexes": indexes as i64,
            "ok": 1.0,
        })
    }

    async fn run_command(&self, command: Document) -> StoreResult<Document> {
        let Some(name) = command.keys().next().cloned() else {
            return Err(InMemoryError::BadValue("empty command".to_string()).into());
        };

        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "dbStats" => self.stats().await,
            "listCollections" => {
                let filter = command.get_document("filter").ok().cloned();
                let batch = self
                    .list_collections(filter)
                    .await?
                    .into_iter()
                    .map(|info| doc! { "name": info.name, "type": info.kind, "options": info.options })
                    .collect::<Vec<_>>();

                Ok(doc! {
                    "cursor": {
                        "id": 0_i64,
                        "ns": format!("{}.$cmd.listCollections", self.name),
                        "firstBatch": batch,
                    },
                    "ok": 1.0,
                })
            }
            "count" => {
                let collection = command
                    .get_str("count")
                    .map_err(|_| InMemoryError::BadValue("count needs a collection name".to_string()))?;
                let query = command.get_document("query").cloned().unwrap_or_default();
                let n = self.collection(collection).count_documents(query).await?;

                Ok(doc! { "n": i64::try_from(n).unwrap_or(i64::MAX), "ok": 1.0 })
            }
            other => Err(InMemoryError::CommandNotFound(other.to_string()).into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryCollection {
    server: InMemoryServer,
    database: String,
    name: String,
}

impl InMemoryCollection {
    fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    async fn read<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(Option<&CollectionState>) -> EngineResult<T> + Send,
    {
        let state = self.server.state.read().await;

        Ok(f(state.collection(&self.database, &self.name))?)
    }

    /// Runs `f` under the write lock, then publishes whatever it recorded to watchers.
    ///
    /// With `create`, a missing collection is created and `f` always sees `Some`.
    async fn write<T, F>(&self, operation: &'static str, create: bool, f: F) -> StoreResult<T>
    where
        F: FnOnce(Option<&mut CollectionState>, &str, &mut Vec<Change>) -> EngineResult<T> + Send,
    {
        let namespace = self.namespace();
        let mut changes = Vec::new();
        let mut state = self.server.state.write().await;

        debug!(namespace = %namespace, operation, "write");

        let result = f(
            state.collection_mut(&self.database, &self.name, create),
            &namespace,
            &mut changes,
        );

        state.publish(&self.database, &self.name, changes);

        Ok(result?)
    }

    async fn modify(
        &self,
        operation: &'static str,
        modification: Modification<'_>,
        multi: bool,
    ) -> StoreResult<UpdateResult> {
        self.write(operation, modification.upsert, |collection, namespace, changes| {
            match collection {
                Some(collection) => collection.update(namespace, &modification, multi, changes),
                None => modification.check().map(|_| UpdateResult::default()),
            }
        })
        .await
    }

    async fn find_and_modify(
        &self,
        operation: &'static str,
        modification: Modification<'_>,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>> {
        self.write(operation, modification.upsert, |collection, namespace, changes| {
            match collection {
                Some(collection) => {
                    collection.find_and_modify(namespace, &modification, &options, changes)
                }
                None => modification.check().map(|_| None),
            }
        })
        .await
    }

    async fn delete(&self, operation: &'static str, filter: Document, multi: bool) -> StoreResult<Vec<Document>> {
        self.write(operation, false, |collection, _, changes| match collection {
            Some(collection) => collection.delete(&filter, multi, changes),
            None => Ok(Vec::new()),
        })
        .await
    }
}

#[async_trait]
impl CollectionDriver for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document, options: FindOptions) -> StoreResult<Vec<Document>> {
        self.read(|collection| {
            let Some(collection) = collection else {
                return Ok(Vec::new());
            };

            let mut found = filter_documents(&collection.documents, &filter)?;
            if let Some(sort) = &options.sort {
                sort_documents(&mut found, sort);
            }

            let skip = options.skip.map_or(0, usize_from);
            let limit = match options.limit {
                Some(limit) if limit != 0 => usize_from(limit.unsigned_abs()),
                _ => usize::MAX,
            };

            found
                .into_iter()
                .skip(skip)
                .take(limit)
                .map(|document| match &options.projection {
                    Some(projection) => project(&document, projection),
                    None => Ok(document),
                })
                .collect()
        })
        .await
    }

    async fn find_one(&self, filter: Document, options: FindOptions) -> StoreResult<Option<Document>> {
        Ok(self
            .find(filter, FindOptions { limit: Some(1), ..options })
            .await?
            .into_iter()
            .next())
    }

    async fn count_documents(&self, filter: Document) -> StoreResult<u64> {
        self.read(|collection| {
            let mut count = 0;
            for document in collection.map(|c| c.documents.as_slice()).unwrap_or_default() {
                if matches(document, &filter)? {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
    }

    async fn estimated_document_count(&self) -> StoreResult<u64> {
        self.read(|collection| Ok(collection.map_or(0, |c| c.documents.len() as u64)))
            .await
    }

    async fn distinct(&self, field: &str, filter: Document) -> StoreResult<Vec<Bson>> {
        self.read(|collection| {
            let documents = collection.map(|c| c.documents.as_slice()).unwrap_or_default();
            let matched = filter_documents(documents, &filter)?;

            Ok(distinct_values(&matched, field))
        })
        .await
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> StoreResult<Vec<Document>> {
        self.read(|collection| {
            run_pipeline(
                collection.map(|c| c.documents.clone()).unwrap_or_default(),
                &pipeline,
            )
        })
        .await
    }

    async fn insert_one(&self, document: Document) -> StoreResult<InsertOneResult> {
        self.write("insert_one", true, |collection, namespace, changes| {
            let collection = collection.ok_or_else(|| InMemoryError::NamespaceNotFound(namespace.to_string()))?;
            let stored = collection.insert(namespace, document)?;

            changes.push(Change::Insert(stored.clone()));

            Ok(InsertOneResult {
                inserted_id: stored.get("_id").cloned().unwrap_or(Bson::Null),
                document: stored,
            })
        })
        .await
    }

    async fn insert_many(&self, documents: Vec<Document>) -> StoreResult<InsertManyResult> {
        if documents.is_empty() {
            return Err(InMemoryError::BadValue("documents must be a non-empty list".to_string()).into());
        }

        self.write("insert_many", true, |collection, namespace, changes| {
            let collection = collection.ok_or_else(|| InMemoryError::NamespaceNotFound(namespace.to_string()))?;
            let mut result = InsertManyResult::default();

            for (index, document) in documents.into_iter().enumerate() {
                let stored = collection.insert(namespace, document)?;

                result
                    .inserted_ids
                    .insert(index, stored.get("_id").cloned().unwrap_or(Bson::Null));
                changes.push(Change::Insert(stored));
            }

            Ok(result)
        })
        .await
    }

    async fn replace_one(&self, filter: Document, replacement: Document, upsert: bool) -> StoreResult<UpdateResult> {
        let modification = Modification { filter: &filter, update: &replacement, replace: true, upsert };

        self.modify("replace_one", modification, false).await
    }

    async fn update_one(&self, filter: Document, update: Document, upsert: bool) -> StoreResult<UpdateResult> {
        let modification = Modification { filter: &filter, update: &update, replace: false, upsert };

        self.modify("update_one", modification, false).await
    }

    async fn update_many(&self, filter: Document, update: Document, upsert: bool) -> StoreResult<UpdateResult> {
        let modification = Modification { filter: &filter, update: &update, replace: false, upsert };

        self.modify("update_many", modification, true).await
    }

    async fn delete_one(&self, filter: Document) -> StoreResult<DeleteResult> {
        let removed = self.delete("delete_one", filter, false).await?;

        Ok(DeleteResult { deleted_count: removed.len() as u64 })
    }

    async fn delete_many(&self, filter: Document) -> StoreResult<DeleteResult> {
        let removed = self.delete("delete_many", filter, true).await?;

        Ok(DeleteResult { deleted_count: removed.len() as u64 })
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>> {
        let modification = Modification {
            filter: &filter,
            update: &update,
            replace: false,
            upsert: options.upsert,
        };

        self.find_and_modify("find_one_and_update", modification, options)
            .await
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>> {
        let modification = Modification {
            filter: &filter,
            update: &replacement,
            replace: true,
            upsert: options.upsert,
        };

        self.find_and_modify("find_one_and_replace", modification, options)
            .await
    }

    async fn find_one_and_delete(&self, filter: Document) -> StoreResult<Option<Document>> {
        Ok(self
            .delete("find_one_and_delete", filter, false)
            .await?
            .into_iter()
            .next())
    }

    async fn create_index(&self, index: IndexSpec) -> StoreResult<String> {
        self.write("create_index", true, |collection, namespace, _| {
            collection
                .ok_or_else(|| InMemoryError::NamespaceNotFound(namespace.to_string()))?
                .create_index(namespace, index)
        })
        .await
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexSpec>> {
        let namespace = self.namespace();

        self.read(|collection| {
            collection
                .map(|c| c.indexes.clone())
                .ok_or(InMemoryError::NamespaceNotFound(namespace))
        })
        .await
    }

    async fn drop_index(&self, name: &str) -> StoreResult<()> {
        if name == "_id_" {
            return Err(InMemoryError::BadValue("cannot drop _id index".to_string()).into());
        }

        self.write("drop_index", false, |collection, namespace, _| {
            let collection = collection.ok_or_else(|| InMemoryError::NamespaceNotFound(namespace.to_string()))?;
            let before = collection.indexes.len();

            collection.indexes.retain(|index| index.resolved_name() != name);

            match collection.indexes.len() < before {
                true => Ok(()),
                false => Err(InMemoryError::IndexNotFound(name.to_string())),
            }
        })
        .await
    }

    async fn drop_indexes(&self) -> StoreResult<()> {
        self.write("drop_indexes", false, |collection, namespace, _| {
            collection
                .ok_or_else(|| InMemoryError::NamespaceNotFound(namespace.to_string()))?
                .indexes
                .retain(|index| index.resolved_name() == "_id_");
            Ok(())
        })
        .await
    }

    async fn options(&self) -> StoreResult<Document> {
        self.read(|collection| Ok(collection.map(|c| c.options.clone()).unwrap_or_default()))
            .await
    }

    async fn drop(&self) -> StoreResult<()> {
        let dropped = self
            .server
            .state
            .write()
            .await
            .drop_collection(&self.database, &self.name);

        debug!(namespace = %self.namespace(), dropped, "drop");

        Ok(())
    }

    async fn watch(&self, pipeline: Vec<Document>) -> StoreResult<ChangeStream> {
        if let Some(stage) = pipeline
            .iter()
            .filter_map(|stage| stage.keys().next())
            .find(|stage| !matches!(stage.as_str(), "$match" | "$project"))
        {
            return Err(InMemoryError::UnsupportedStage(stage.clone()).into());
        }

        let (sender, receiver) = mpsc::unbounded();

        self.server
            .state
            .write()
            .await
            .register(self.namespace(), Watcher { pipeline, sender });

        debug!(namespace = %self.namespace(), "change stream opened");

        Ok(receiver.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collection(name: &str) -> InMemoryCollection {
        let client = InMemoryConnector::new()
            .connect(&ConnectionConfig::new("memory://test", "test"))
            .await
            .unwrap();

        client.database("test").collection(name)
    }

    fn engine_error(err: StoreError) -> InMemoryError {
        err.backend_source::<InMemoryError>()
            .cloned()
            .expect("expected an engine error")
    }

    #[tokio::test]
    async fn inserts_assign_object_ids_first() {
        let users = collection("users").await;

        let result = users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();

        assert!(matches!(result.inserted_id, Bson::ObjectId(_)));
        assert_eq!(result.document.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(users.estimated_document_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let users = collection("users").await;

        users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();
        let name = users
            .create_index(IndexSpec::new(doc! { "uuid": 1 }).unique(true))
            .await
            .unwrap();
        assert_eq!(name, "uuid_1");

        let err = users.insert_one(doc! { "uuid": "aaa" }).await.unwrap_err();
        assert!(matches!(engine_error(err), InMemoryError::DuplicateKey { index, .. } if index == "uuid_1"));

        users.drop_index("uuid_1").await.unwrap();
        users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();
        assert_eq!(users.count_documents(doc! { "uuid": "aaa" }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn updates_report_counts_and_upserts() {
        let users = collection("users").await;
        users
            .insert_many(vec![doc! { "uuid": "a", "n": 1 }, doc! { "uuid": "b", "n": 1 }])
            .await
            .unwrap();

        let many = users
            .update_many(doc! {}, doc! { "$inc": { "n": 1 } }, false)
            .await
            .unwrap();
        assert_eq!((many.matched_count, many.modified_count), (2, 2));

        let none = users
            .update_one(doc! { "uuid": "zzz" }, doc! { "$set": { "n": 9 } }, false)
            .await
            .unwrap();
        assert_eq!(none, UpdateResult::default());

        let upserted = users
            .update_one(doc! { "uuid": "zzz" }, doc! { "$set": { "n": 9 } }, true)
            .await
            .unwrap();
        assert!(upserted.upserted_id.is_some());

        let created = users.find_one(doc! { "uuid": "zzz" }, FindOptions::new()).await.unwrap().unwrap();
        assert_eq!(created.get_i32("n").unwrap(), 9);

        assert!(users.update_one(doc! {}, doc! { "n": 1 }, false).await.is_err());
        assert!(users.replace_one(doc! {}, doc! { "$set": { "n": 1 } }, false).await.is_err());
    }

    #[tokio::test]
    async fn find_and_modify_returns_requested_version() {
        let users = collection("users").await;
        users.insert_one(doc! { "uuid": "a", "n": 1 }).await.unwrap();

        let before = users
            .find_one_and_update(
                doc! { "uuid": "a" },
                doc! { "$set": { "n": 2 } },
                FindAndModifyOptions::new().return_document(ReturnDocument::Before),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.get_i32("n").unwrap(), 1);

        let after = users
            .find_one_and_replace(
                doc! { "uuid": "a" },
                doc! { "uuid": "a", "n": 3 },
                FindAndModifyOptions::new().projection(doc! { "_id": 0 }),
            )
            .await
            .unwrap();
        assert_eq!(after, Some(doc! { "uuid": "a", "n": 3 }));

        let missing = users
            .find_one_and_update(doc! { "uuid": "b" }, doc! { "$set": { "n": 1 } }, FindAndModifyOptions::new())
            .await
            .unwrap();
        assert_eq!(missing, None);

        let deleted = users.find_one_and_delete(doc! { "uuid": "a" }).await.unwrap();
        assert!(deleted.is_some());
        assert_eq!(users.find_one_and_delete(doc! { "uuid": "a" }).await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_applies_sort_skip_limit_and_projection() {
        let users = collection("users").await;
        users
            .insert_many((1..=5).map(|n| doc! { "n": n }).collect())
            .await
            .unwrap();

        let found = users
            .find(
                doc! { "n": { "$gt": 1 } },
                FindOptions::new()
                    .sort(doc! { "n": -1 })
                    .skip(1)
                    .limit(2)
                    .projection(doc! { "_id": 0 }),
            )
            .await
            .unwrap();

        assert_eq!(found, vec![doc! { "n": 4 }, doc! { "n": 3 }]);
        assert_eq!(
            users.distinct("n", doc! { "n": { "$lte": 2 } }).await.unwrap(),
            vec![Bson::Int32(1), Bson::Int32(2)]
        );
    }

    #[tokio::test]
    async fn reads_and_deletes_on_missing_collections_do_not_create_them() {
        let client = InMemoryConnector::new()
            .connect(&ConnectionConfig::new("memory://test", "test"))
            .await
            .unwrap();
        let database = client.database("test");
        let ghosts = database.collection("ghosts");

        assert!(ghosts.find(doc! {}, FindOptions::new()).await.unwrap().is_empty());
        assert_eq!(ghosts.delete_many(doc! {}).await.unwrap().deleted_count, 0);
        assert_eq!(ghosts.update_one(doc! {}, doc! { "$set": { "a": 1 } }, false).await.unwrap().matched_count, 0);
        assert!(database.list_collection_names(None).await.unwrap().is_empty());

        assert!(matches!(
            engine_error(ghosts.list_indexes().await.unwrap_err()),
            InMemoryError::NamespaceNotFound(_)
        ));
    }

    #[tokio::test]
    async fn collections_honour_creation_options() {
        let client = InMemoryConnector::new()
            .connect(&ConnectionConfig::new("memory://test", "test"))
            .await
            .unwrap();
        let database = client.database("test");

        database
            .create_collection(
                "logs",
                CreateCollectionOptions {
                    capped: Some(true),
                    size: Some(4096),
                    max: Some(2),
                    validator: Some(doc! { "level": { "$exists": true } }),
                },
            )
            .await
            .unwrap();

        let logs = database.collection("logs");
        for level in ["a", "b", "c"] {
            logs.insert_one(doc! { "level": level }).await.unwrap();
        }

        assert_eq!(logs.distinct("level", doc! {}).await.unwrap(), vec![Bson::from("b"), Bson::from("c")]);
        assert_eq!(
            engine_error(logs.insert_one(doc! { "msg": "x" }).await.unwrap_err()),
            InMemoryError::ValidationFailed
        );
        assert_eq!(logs.options().await.unwrap().get_i64("max").unwrap(), 2);
        assert!(database.create_collection("logs", CreateCollectionOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn commands_and_stats() {
        let client = InMemoryConnector::new()
            .connect(&ConnectionConfig::new("memory://test", "test"))
            .await
            .unwrap();
        let database = client.database("test");
        database.collection("a").insert_one(doc! { "x": 1 }).await.unwrap();

        assert_eq!(database.run_command(doc! { "ping": 1 }).await.unwrap(), doc! { "ok": 1.0 });

        let stats = database.stats().await.unwrap();
        assert_eq!(stats.get_i64("collections").unwrap(), 1);
        assert_eq!(stats.get_i64("objects").unwrap(), 1);

        let listed = database.run_command(doc! { "listCollections": 1 }).await.unwrap();
        let batch = listed.get_document("cursor").unwrap().get_array("firstBatch").unwrap();
        assert_eq!(batch.len(), 1);

        let err = database.run_command(doc! { "shutdown": 1 }).await.unwrap_err();
        assert_eq!(engine_error(err), InMemoryError::CommandNotFound("shutdown".to_string()));
    }

    #[tokio::test]
    async fn change_streams_receive_filtered_events() {
        let users = collection("users").await;
        let mut inserts = users
            .watch(vec![doc! { "$match": { "operationType": "insert" } }])
            .await
            .unwrap();
        let mut everything = users.watch(Vec::new()).await.unwrap();

        users.insert_one(doc! { "uuid": "a" }).await.unwrap();
        users.update_one(doc! { "uuid": "a" }, doc! { "$set": { "n": 1 } }, false).await.unwrap();
        users.delete_one(doc! { "uuid": "a" }).await.unwrap();

        let first = inserts.next().await.unwrap().unwrap();
        assert_eq!(first.get_str("operationType").unwrap(), "insert");
        assert_eq!(first.get_document("fullDocument").unwrap().get_str("uuid").unwrap(), "a");

        let kinds = [
            everything.next().await.unwrap().unwrap(),
            everything.next().await.unwrap().unwrap(),
            everything.next().await.unwrap().unwrap(),
        ]
        .map(|event| event.get_str("operationType").unwrap().to_string());
        assert_eq!(kinds, ["insert", "update", "delete"]);

        users.drop().await.unwrap();
        let dropped = everything.next().await.unwrap().unwrap();
        assert_eq!(dropped.get_str("operationType").unwrap(), "drop");
        assert!(everything.next().await.is_none());

        assert!(users.watch(vec![doc! { "$group": {} }]).await.is_err());
    }

    #[tokio::test]
    async fn closed_change_streams_are_released() {
        let users = collection("users").await;
        let watchers = |state: &ServerState| state.watchers.get("test.users").map(Vec::len);

        drop(users.watch(Vec::new()).await.unwrap());
        drop(users.watch(Vec::new()).await.unwrap());
        let open = users.watch(Vec::new()).await.unwrap();
        assert_eq!(watchers(&*users.server.state.read().await), Some(1));

        drop(open);
        users.insert_one(doc! { "uuid": "a" }).await.unwrap();
        assert_eq!(watchers(&*users.server.state.read().await), None);
    }
}
