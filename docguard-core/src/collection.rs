//! Collection accessors: checked writes on top of a driver collection handle.
//!
//! A [`CollectionAccessor`] adds three guarded operations to a driver collection:
//!
//! - [`insert_one`](CollectionAccessor::insert_one) rejects documents whose `uuid` is
//!   already present
//! - [`update_one`](CollectionAccessor::update_one) and
//!   [`delete_one`](CollectionAccessor::delete_one) reject filters that match nothing
//!
//! Every other operation is the driver's own, reached through `Deref` to the
//! [`CollectionDriver`]. Where a checked operation shares a name with a driver operation,
//! the checked one wins on the accessor and the raw one stays available through
//! [`CollectionAccessor::delegate`].
//!
//! The duplicate probe and the insert are separate round trips. Two concurrent inserts of
//! the same `uuid` can both pass the probe unless the engine enforces a unique index on
//! `uuid`, which this layer does not create.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docguard::prelude::*;
//!
//! let users = manager.collection("users").await?;
//!
//! users.insert_one(doc! { "uuid": "aaa", "foo": "bar" }).await?;
//! let updated = users.update_one("aaa", doc! { "foo": "baz" }).await?;
//! let found = users.find(doc! { "foo": "baz" }, FindOptions::new()).await?;
//! ```

use bson::{Bson, Document, doc};
use std::{marker::PhantomData, ops::Deref};
use tracing::{debug, warn};

use crate::{
    document::{Record, RecordExt, UUID_FIELD, document_uuid},
    driver::{CollectionDriver, DatabaseDriver},
    error::{StoreError, StoreResult},
    model::{DeleteResult, FindAndModifyOptions, FindOptions, InsertOneResult, ReturnDocument, UpdateResult},
    update::{Selector, UpdateStrategy},
};

/// Configuration for a [`CollectionAccessor`], resolved by [`CollectionAccessorBuilder::open`].
#[derive(Debug)]
pub struct CollectionAccessorBuilder<'a, D: DatabaseDriver> {
    database: Option<&'a D>,
    name: String,
}

impl<'a, D: DatabaseDriver> CollectionAccessorBuilder<'a, D> {
    /// Stores the database handle and collection name without validating them.
    pub fn new(database: Option<&'a D>, name: impl Into<String>) -> Self {
        Self { database, name: name.into() }
    }

    /// Resolves the accessor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingClient`] if no database handle was given and
    /// [`StoreError::MissingCollectionName`] if the name is empty.
    pub async fn open(self) -> StoreResult<CollectionAccessor<D::Collection>> {
        let database = self.database.ok_or(StoreError::MissingClient)?;

        if self.name.is_empty() {
            return Err(StoreError::MissingCollectionName);
        }

        debug!(database = database.name(), collection = %self.name, "opening collection");

        Ok(CollectionAccessor {
            collection: database.collection(&self.name),
            name: self.name,
        })
    }
}

/// A named collection with checked single-document writes.
#[derive(Debug, Clone)]
pub struct CollectionAccessor<C: CollectionDriver> {
    name: String,
    collection: C,
}

impl<C: CollectionDriver> CollectionAccessor<C> {
    /// Starts building an accessor for `name` on `database`.
    pub fn builder<D>(database: Option<&D>, name: impl Into<String>) -> CollectionAccessorBuilder<'_, D>
    where
        D: DatabaseDriver<Collection = C>,
    {
        CollectionAccessorBuilder::new(database, name)
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the driver collection handle.
    pub fn delegate(&self) -> &C {
        &self.collection
    }

    /// Inserts `document` unless another document already carries its `uuid`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidDocument`] if `document` has no `uuid`
    /// - [`StoreError::DuplicateEntry`] if the `uuid` is already present
    pub async fn insert_one(&self, document: Document) -> StoreResult<InsertOneResult> {
        let uuid = document_uuid(&document)?.clone();

        self.ensure_absent(doc! { UUID_FIELD: uuid }).await?;
        self.collection.insert_one(document).await
    }

    /// Applies `fields` with `$set` to the selected document and returns the result.
    ///
    /// Shorthand for [`update_one_with`](Self::update_one_with) and
    /// [`UpdateStrategy::Set`].
    pub async fn update_one(
        &self,
        selector: impl Into<Selector>,
        fields: Document,
    ) -> StoreResult<Document> {
        self.update_one_with(selector, fields, UpdateStrategy::default())
            .await
    }

    /// Atomically updates the selected document and returns it as it is after the update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NonExistentEntry`] if nothing matched.
    pub async fn update_one_with(
        &self,
        selector: impl Into<Selector>,
        fields: Document,
        strategy: UpdateStrategy,
    ) -> StoreResult<Document> {
        let filter = selector.into().into_filter();

        debug!(collection = %self.name, ?filter, operator = strategy.operator(), "checked update");

        self.collection
            .find_one_and_update(
                filter,
                strategy.to_update(fields),
                FindAndModifyOptions::new().return_document(ReturnDocument::After),
            )
            .await?
            .ok_or_else(|| self.non_existent())
    }

    /// Applies `fields` to every document matching `filter`.
    ///
    /// Unlike [`update_one`](Self::update_one), matching nothing is not an error: the
    /// driver's result is returned as-is, with a `matched_count` of zero.
    pub async fn update_many(
        &self,
        filter: Document,
        fields: Document,
        strategy: UpdateStrategy,
    ) -> StoreResult<UpdateResult> {
        self.collection
            .update_many(filter, strategy.to_update(fields), false)
            .await
    }

    /// Atomically removes the selected document and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NonExistentEntry`] if nothing matched.
    pub async fn delete_one(&self, selector: impl Into<Selector>) -> StoreResult<Document> {
        let filter = selector.into().into_filter();

        debug!(collection = %self.name, ?filter, "checked delete");

        self.collection
            .find_one_and_delete(filter)
            .await?
            .ok_or_else(|| self.non_existent())
    }

    /// Removes every document matching `filter`.
    ///
    /// Unlike [`delete_one`](Self::delete_one), matching nothing is not an error.
    pub async fn delete_many(&self, filter: Document) -> StoreResult<DeleteResult> {
        self.collection.delete_many(filter).await
    }

    /// Pushes a `uuid`-carrying subdocument onto an array field of the selected document.
    ///
    /// `fields` must hold exactly one field whose value is a document with a `uuid`. If any
    /// document in the collection already holds an element with that `uuid` under the same
    /// field, nothing is written.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidDocument`] if `fields` has the wrong shape
    /// - [`StoreError::DuplicateEntry`] if the `uuid` is already present under the field
    pub async fn safe_insert_subfields(
        &self,
        selector: impl Into<Selector>,
        fields: Document,
    ) -> StoreResult<UpdateResult> {
        let (field, uuid) = subfield_uuid(&fields)?;

        let path = format!("{field}.{UUID_FIELD}");

        self.ensure_absent(doc! { path: uuid }).await?;
        self.collection
            .update_one(
                selector.into().into_filter(),
                UpdateStrategy::Push.to_update(fields),
                false,
            )
            .await
    }

    async fn ensure_absent(&self, probe: Document) -> StoreResult<()> {
        debug!(collection = %self.name, ?probe, "duplicate probe");

        if self.collection.count_documents(probe.clone()).await? > 0 {
            warn!(collection = %self.name, ?probe, "duplicate entry rejected");

            return Err(StoreError::DuplicateEntry(self.name.clone()));
        }

        Ok(())
    }

    fn non_existent(&self) -> StoreError {
        warn!(collection = %self.name, "no matching entry");

        StoreError::NonExistentEntry(self.name.clone())
    }
}

impl<C: CollectionDriver> Deref for CollectionAccessor<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

/// Splits `{ field: { uuid: .., .. } }` into the field name and the `uuid` value.
fn subfield_uuid(fields: &Document) -> StoreResult<(String, Bson)> {
    let mut entries = fields.iter();

    let (field, value) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(StoreError::InvalidDocument(
                "expected exactly one top-level field".to_string(),
            ));
        }
    };

    let uuid = value
        .as_document()
        .ok_or_else(|| StoreError::InvalidDocument(format!("`{field}` must hold a document")))
        .and_then(document_uuid)?;

    Ok((field.clone(), uuid.clone()))
}

/// A [`CollectionAccessor`] that converts to and from a [`Record`] type.
#[derive(Debug)]
pub struct TypedCollectionAccessor<C: CollectionDriver, R: Record> {
    inner: CollectionAccessor<C>,
    _marker: PhantomData<fn() -> R>,
}

impl<C: CollectionDriver, R: Record> Clone for TypedCollectionAccessor<C, R> {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

impl<C: CollectionDriver, R: Record> TypedCollectionAccessor<C, R> {
    /// Wraps an untyped accessor. The collection name is not checked against [`Record::collection_name`].
    pub fn new(inner: CollectionAccessor<C>) -> Self {
        Self { inner, _marker: PhantomData }
    }

    /// Returns the untyped accessor.
    pub fn untyped(&self) -> &CollectionAccessor<C> {
        &self.inner
    }

    /// Converts this accessor to a different record type on the same collection.
    pub fn with_type<T: Record>(&self) -> TypedCollectionAccessor<C, T> {
        TypedCollectionAccessor::new(self.inner.clone())
    }

    /// Checked insert of a record. See [`CollectionAccessor::insert_one`].
    pub async fn insert_one(&self, record: &R) -> StoreResult<InsertOneResult> {
        self.inner
            .insert_one(record.to_document()?)
            .await
    }

    /// Checked `$set` update returning the updated record. See [`CollectionAccessor::update_one`].
    pub async fn update_one(&self, selector: impl Into<Selector>, fields: Document) -> StoreResult<R> {
        self.update_one_with(selector, fields, UpdateStrategy::default())
            .await
    }

    /// Checked update returning the updated record. See [`CollectionAccessor::update_one_with`].
    pub async fn update_one_with(
        &self,
        selector: impl Into<Selector>,
        fields: Document,
        strategy: UpdateStrategy,
    ) -> StoreResult<R> {
        R::from_document(
            self.inner
                .update_one_with(selector, fields, strategy)
                .await?,
        )
    }

    /// Checked delete returning the removed record. See [`CollectionAccessor::delete_one`].
    pub async fn delete_one(&self, selector: impl Into<Selector>) -> StoreResult<R> {
        R::from_document(self.inner.delete_one(selector).await?)
    }

    /// Finds every record matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if a matching document does not fit `R`.
    pub async fn find(&self, filter: Document, options: FindOptions) -> StoreResult<Vec<R>> {
        self.inner
            .find(filter, options)
            .await?
            .into_iter()
            .map(R::from_document)
            .collect()
    }

    /// Finds the first record matching a `uuid` or filter selector.
    pub async fn find_one(&self, selector: impl Into<Selector>) -> StoreResult<Option<R>> {
        self.inner
            .find_one(selector.into().into_filter(), FindOptions::new())
            .await?
            .map(R::from_document)
            .transpose()
    }
}
