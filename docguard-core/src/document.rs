//! Documents, the `uuid` field, and typed records.
//!
//! Documents are plain [`bson::Document`] values. The only field this layer gives a
//! meaning to is [`UUID_FIELD`], an application-assigned identifier that is distinct
//! from the engine's native `_id`.

use bson::{
    Bson, Document,
    de::deserialize_from_document,
    ser::serialize_to_document,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::error::{StoreError, StoreResult};

/// Name of the application-level identifier field.
pub const UUID_FIELD: &str = "uuid";

/// Name of the engine's native identifier field.
pub const ID_FIELD: &str = "_id";

/// Mints a fresh random identifier suitable for the `uuid` field.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Returns the `uuid` value of a document.
///
/// # Errors
///
/// Returns [`StoreError::InvalidDocument`] if the field is absent or null.
pub fn document_uuid(document: &Document) -> StoreResult<&Bson> {
    match document.get(UUID_FIELD) {
        Some(Bson::Null) | None => Err(StoreError::InvalidDocument(format!(
            "document is missing the `{UUID_FIELD}` field"
        ))),
        Some(value) => Ok(value),
    }
}

/// A typed document bound to a collection.
///
/// # Example
///
/// ```ignore
/// use docguard::document::{Record, new_uuid};
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     pub uuid: String,
///     pub name: String,
/// }
///
/// impl Record for User {
///     fn collection_name() -> &'static str {
///         "users"
///     }
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the name of the collection this record lives in.
    fn collection_name() -> &'static str;
}

/// Conversions between records and BSON/JSON, implemented for every [`Record`].
pub trait RecordExt: Record {
    /// Serializes this record into a BSON document.
    fn to_document(&self) -> StoreResult<Document>;

    /// Deserializes a record from a BSON document, ignoring the native `_id`.
    fn from_document(document: Document) -> StoreResult<Self>;

    /// Serializes this record into a JSON value.
    fn to_json(&self) -> StoreResult<Value>;

    /// Deserializes a record from a JSON value.
    fn from_json(value: Value) -> StoreResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_document(&self) -> StoreResult<Document> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(mut document: Document) -> StoreResult<Self> {
        document.remove(ID_FIELD);

        Ok(deserialize_from_document(document)?)
    }

    fn to_json(&self) -> StoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> StoreResult<Self> {
        Ok(from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        uuid: String,
        body: String,
    }

    impl Record for Note {
        fn collection_name() -> &'static str {
            "notes"
        }
    }

    #[test]
    fn finds_uuid_field() {
        let document = doc! { "uuid": "aaa", "foo": "bar" };

        assert_eq!(document_uuid(&document).unwrap(), &Bson::String("aaa".into()));
    }

    #[test]
    fn null_or_missing_uuid_is_invalid() {
        assert!(matches!(
            document_uuid(&doc! { "foo": "bar" }),
            Err(StoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            document_uuid(&doc! { "uuid": Bson::Null }),
            Err(StoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn records_ignore_native_id() {
        let note = Note::from_document(doc! { "_id": 7, "uuid": "n1", "body": "hello" }).unwrap();

        assert_eq!(note, Note { uuid: "n1".into(), body: "hello".into() });
        assert_eq!(note.to_document().unwrap(), doc! { "uuid": "n1", "body": "hello" });
        assert_eq!(Note::from_json(note.to_json().unwrap()).unwrap(), note);
    }

    #[test]
    fn minted_uuids_are_unique() {
        assert_ne!(new_uuid(), new_uuid());
    }
}
