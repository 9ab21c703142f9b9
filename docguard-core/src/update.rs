//! Update strategies and document selectors used by the checked operations.

use bson::{Bson, Document, doc};

use crate::document::UUID_FIELD;

/// How the fields passed to an update are applied.
///
/// Each strategy is an update operator of the wrapped engine. The default,
/// [`UpdateStrategy::Set`], replaces the named fields and leaves the rest untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// `$set`: replace the given fields.
    #[default]
    Set,
    /// `$unset`: remove the given fields.
    Unset,
    /// `$inc`: add to numeric fields.
    Inc,
    /// `$push`: append to array fields.
    Push,
    /// `$addToSet`: append to array fields unless already present.
    AddToSet,
    /// `$pull`: remove matching values from array fields.
    Pull,
    /// `$rename`: rename fields.
    Rename,
    /// Any other operator, given with its leading `$`.
    Operator(String),
}

impl UpdateStrategy {
    /// Returns the engine operator for this strategy.
    pub fn operator(&self) -> &str {
        match self {
            UpdateStrategy::Set => "$set",
            UpdateStrategy::Unset => "$unset",
            UpdateStrategy::Inc => "$inc",
            UpdateStrategy::Push => "$push",
            UpdateStrategy::AddToSet => "$addToSet",
            UpdateStrategy::Pull => "$pull",
            UpdateStrategy::Rename => "$rename",
            UpdateStrategy::Operator(op) => op,
        }
    }

    /// Wraps `fields` into an update document for this strategy.
    pub fn to_update(&self, fields: Document) -> Document {
        doc! { self.operator(): fields }
    }
}

/// Selects the target of a checked update or delete.
///
/// A bare string selects by `uuid`; a document is used verbatim as a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Uuid(String),
    Filter(Document),
}

impl Selector {
    /// Returns the filter document this selector stands for.
    pub fn into_filter(self) -> Document {
        match self {
            Selector::Uuid(uuid) => doc! { UUID_FIELD: Bson::String(uuid) },
            Selector::Filter(filter) => filter,
        }
    }
}

impl From<&str> for Selector {
    fn from(uuid: &str) -> Self {
        Selector::Uuid(uuid.to_string())
    }
}

impl From<String> for Selector {
    fn from(uuid: String) -> Self {
        Selector::Uuid(uuid)
    }
}

impl From<Document> for Selector {
    fn from(filter: Document) -> Self {
        Selector::Filter(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_sets_fields() {
        assert_eq!(
            UpdateStrategy::default().to_update(doc! { "foo": "baz" }),
            doc! { "$set": { "foo": "baz" } }
        );
        assert_eq!(
            UpdateStrategy::Operator("$max".into()).to_update(doc! { "score": 3 }),
            doc! { "$max": { "score": 3 } }
        );
    }

    #[test]
    fn strings_select_by_uuid() {
        assert_eq!(Selector::from("aaa").into_filter(), doc! { "uuid": "aaa" });
        assert_eq!(
            Selector::from(doc! { "foo": "bar" }).into_filter(),
            doc! { "foo": "bar" }
        );
    }
}
