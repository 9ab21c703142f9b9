//! Conversions between docguard model types and the MongoDB driver's option and result types.

use bson::{Bson, Document};
use mongodb::{
    IndexModel,
    options::{
        ClientOptions, CreateCollectionOptions as MongoCreateCollectionOptions,
        FindOneAndReplaceOptions, FindOneAndUpdateOptions, FindOneOptions,
        FindOptions as MongoFindOptions, IndexOptions, ReturnDocument as MongoReturnDocument,
    },
    results,
};

use docguard_core::{
    config::ConnectionConfig,
    error::{StoreError, StoreResult},
    model::{
        CollectionInfo, CreateCollectionOptions, DeleteResult, FindAndModifyOptions, FindOptions,
        IndexSpec, InsertManyResult, ReturnDocument, UpdateResult,
    },
};

/// Applies the optional connection settings on top of options parsed from the address.
pub fn apply_config(options: &mut ClientOptions, config: &ConnectionConfig) {
    if let Some(app_name) = &config.app_name {
        options.app_name = Some(app_name.clone());
    }
    if let Some(timeout) = config.connect_timeout {
        options.connect_timeout = Some(timeout);
    }
    if let Some(timeout) = config.server_selection_timeout {
        options.server_selection_timeout = Some(timeout);
    }
    if let Some(size) = config.max_pool_size {
        options.max_pool_size = Some(size);
    }
}

pub fn find_options(options: FindOptions) -> MongoFindOptions {
    let mut converted = MongoFindOptions::default();

    converted.projection = options.projection;
    converted.sort = options.sort;
    converted.skip = options.skip;
    converted.limit = options.limit;

    converted
}

/// `limit` has no meaning for a single-document find and is dropped.
pub fn find_one_options(options: FindOptions) -> FindOneOptions {
    let mut converted = FindOneOptions::default();

    converted.projection = options.projection;
    converted.sort = options.sort;
    converted.skip = options.skip;

    converted
}

fn return_document(value: ReturnDocument) -> MongoReturnDocument {
    match value {
        ReturnDocument::Before => MongoReturnDocument::Before,
        ReturnDocument::After => MongoReturnDocument::After,
    }
}

pub fn find_one_and_update_options(options: FindAndModifyOptions) -> FindOneAndUpdateOptions {
    let mut converted = FindOneAndUpdateOptions::default();

    converted.return_document = Some(return_document(options.return_document));
    converted.upsert = Some(options.upsert);
    converted.sort = options.sort;
    converted.projection = options.projection;

    converted
}

pub fn find_one_and_replace_options(options: FindAndModifyOptions) -> FindOneAndReplaceOptions {
    let mut converted = FindOneAndReplaceOptions::default();

    converted.return_document = Some(return_document(options.return_document));
    converted.upsert = Some(options.upsert);
    converted.sort = options.sort;
    converted.projection = options.projection;

    converted
}

pub fn create_collection_options(options: CreateCollectionOptions) -> MongoCreateCollectionOptions {
    let mut converted = MongoCreateCollectionOptions::default();

    converted.capped = options.capped;
    converted.size = options.size;
    converted.max = options.max;
    converted.validator = options.validator;

    converted
}

pub fn index_model(index: IndexSpec) -> IndexModel {
    let mut options = IndexOptions::default();

    options.name = Some(index.resolved_name());
    options.unique = index.unique.then_some(true);
    options.sparse = index.sparse.then_some(true);

    IndexModel::builder()
        .keys(index.keys)
        .options(options)
        .build()
}

pub fn index_spec(model: IndexModel) -> IndexSpec {
    let options = model.options.unwrap_or_default();

    IndexSpec {
        keys: model.keys,
        name: options.name,
        unique: options.unique.unwrap_or(false),
        sparse: options.sparse.unwrap_or(false),
    }
}

pub fn update_result(result: results::UpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

pub fn delete_result(result: results::DeleteResult) -> DeleteResult {
    DeleteResult {
        deleted_count: result.deleted_count,
    }
}

pub fn insert_many_result(result: results::InsertManyResult) -> InsertManyResult {
    InsertManyResult {
        inserted_ids: result.inserted_ids.into_iter().collect(),
    }
}

/// Reads one entry of a `listCollections` cursor.
pub fn collection_info(spec: Document) -> StoreResult<CollectionInfo> {
    let name = spec
        .get_str("name")
        .map_err(|e| StoreError::Serialization(format!("listCollections entry: {e}")))?
        .to_string();
    let kind = spec.get_str("type").unwrap_or("collection").to_string();
    let options = match spec.get("options") {
        Some(Bson::Document(options)) => options.clone(),
        _ => Document::new(),
    };

    Ok(CollectionInfo { name, kind, options })
}
