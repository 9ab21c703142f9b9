//! Option and result types shared by every driver.
//!
//! These mirror the shapes the wrapped engine already uses, so drivers can translate
//! them field by field. Filters, updates and pipelines are plain BSON documents and
//! are never interpreted by this layer.

use std::collections::BTreeMap;

use bson::{Bson, Document};

/// Options for `find` and `find_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to include or exclude.
    pub projection: Option<Document>,
    /// Sort specification, e.g. `{ "created": -1 }`.
    pub sort: Option<Document>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Which version of the document a find-and-modify returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the modification.
    Before,
    /// The document as it is after the modification.
    #[default]
    After,
}

/// Options for `find_one_and_update` and `find_one_and_replace`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModifyOptions {
    pub return_document: ReturnDocument,
    pub upsert: bool,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

impl FindAndModifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn return_document(mut self, return_document: ReturnDocument) -> Self {
        self.return_document = return_document;
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options for `create_collection`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateCollectionOptions {
    pub capped: Option<bool>,
    /// Maximum size in bytes of a capped collection.
    pub size: Option<u64>,
    /// Maximum number of documents in a capped collection.
    pub max: Option<u64>,
    /// Validation rules applied by the engine on writes.
    pub validator: Option<Document>,
}

/// An index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Indexed fields and their directions, e.g. `{ "uuid": 1 }`.
    pub keys: Document,
    /// Index name. Drivers derive one from the keys when absent.
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexSpec {
    pub fn new(keys: Document) -> Self {
        Self { keys, name: None, unique: false, sparse: false }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Returns the explicit name or the engine's conventional `field_dir` name.
    pub fn resolved_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .keys
                .iter()
                .map(|(field, direction)| match direction {
                    Bson::Int32(v) => format!("{field}_{v}"),
                    Bson::Int64(v) => format!("{field}_{v}"),
                    Bson::Double(v) => format!("{field}_{v}"),
                    Bson::String(v) => format!("{field}_{v}"),
                    other => format!("{field}_{other}"),
                })
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

/// Name, type and options of a collection as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    /// `collection`, `view` or `timeseries`.
    pub kind: String,
    pub options: Document,
}

/// A single operation of a `bulk_write` batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document, upsert: bool },
    UpdateMany { filter: Document, update: Document, upsert: bool },
    ReplaceOne { filter: Document, replacement: Document, upsert: bool },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
}

/// Result of inserting one document.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The native `_id` of the new document.
    pub inserted_id: Bson,
    /// The document as stored, including its `_id`.
    pub document: Document,
}

/// Result of inserting several documents, keyed by input position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: BTreeMap<usize, Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Totals for a `bulk_write` batch. Ids are keyed by position in the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    pub inserted_ids: BTreeMap<usize, Bson>,
    pub upserted_ids: BTreeMap<usize, Bson>,
}

impl BulkWriteResult {
    pub(crate) fn record_update(&mut self, index: usize, result: UpdateResult) {
        self.matched_count += result.matched_count;
        self.modified_count += result.modified_count;

        if let Some(id) = result.upserted_id {
            self.upserted_count += 1;
            self.upserted_ids.insert(index, id);
        }
    }
}
