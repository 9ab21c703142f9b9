//! Update operators and dotted-path editing.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::{
    error::{EngineResult, InMemoryError},
    evaluator::{as_f64, as_i64, compare, matches_value, operator_document, values_equal},
};

fn split(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// Returns the single value at `path`, indexing arrays by numeric segments only.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let (head, rest) = split(path);
    let value = document.get(head)?;

    match rest {
        None => Some(value),
        Some(rest) => value_at(value, rest),
    }
}

fn value_at<'a>(value: &'a Bson, path: &str) -> Option<&'a Bson> {
    match value {
        Bson::Document(document) => get_path(document, path),
        Bson::Array(items) => {
            let (head, rest) = split(path);
            let item = items.get(head.parse::<usize>().ok()?)?;

            match rest {
                None => Some(item),
                Some(rest) => value_at(item, rest),
            }
        }
        _ => None,
    }
}

pub(crate) fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let (head, rest) = split(path);
    let value = document.get_mut(head)?;

    match rest {
        None => Some(value),
        Some(rest) => value_at_mut(value, rest),
    }
}

fn value_at_mut<'a>(value: &'a mut Bson, path: &str) -> Option<&'a mut Bson> {
    match value {
        Bson::Document(document) => get_path_mut(document, path),
        Bson::Array(items) => {
            let (head, rest) = split(path);
            let item = items.get_mut(head.parse::<usize>().ok()?)?;

            match rest {
                None => Some(item),
                Some(rest) => value_at_mut(item, rest),
            }
        }
        _ => None,
    }
}

/// Largest number of elements a positional write may add to an array.
const MAX_ARRAY_PADDING: usize = 1500;

/// Writes `value` at `path`, creating intermediate documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> EngineResult<()> {
    let (head, rest) = split(path);

    let Some(rest) = rest else {
        document.insert(head, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }

    match document.get_mut(head) {
        Some(child) => set_in_value(child, rest, value, path),
        None => Err(cannot_create(path)),
    }
}

fn set_in_value(target: &mut Bson, path: &str, value: Bson, full: &str) -> EngineResult<()> {
    match target {
        Bson::Document(document) => set_path(document, path, value),
        Bson::Array(items) => {
            let (head, rest) = split(path);
            let index = head.parse::<usize>().map_err(|_| cannot_create(full))?;

            if items.len() <= index {
                let len = index
                    .checked_add(1)
                    .filter(|len| len - items.len() <= MAX_ARRAY_PADDING)
                    .ok_or_else(|| {
                        InMemoryError::BadValue(format!(
                            "can't backfill array to larger than {MAX_ARRAY_PADDING} elements for path '{full}'"
                        ))
                    })?;
                items.resize(len, Bson::Null);
            }

            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => {
                    if matches!(items[index], Bson::Null) {
                        items[index] = Bson::Document(Document::new());
                    }
                    set_in_value(&mut items[index], rest, value, full)
                }
            }
        }
        _ => Err(cannot_create(full)),
    }
}

fn cannot_create(path: &str) -> InMemoryError {
    InMemoryError::BadValue(format!("Cannot create field in element for path '{path}'"))
}

/// Removes the value at `path`. Array elements are nulled rather than removed.
pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    let Some((parent, leaf)) = path.rsplit_once('.') else {
        return document.remove(path);
    };

    match get_path_mut(document, parent)? {
        Bson::Document(child) => child.remove(leaf),
        Bson::Array(items) => {
            let slot = items.get_mut(leaf.parse::<usize>().ok()?)?;
            Some(std::mem::replace(slot, Bson::Null))
        }
        _ => None,
    }
}

/// Returns `true` if every top-level key is an update operator.
pub(crate) fn is_update_document(update: &Document) -> bool {
    !update.is_empty() && update.keys().all(|key| key.starts_with('$'))
}

/// Returns `true` if no top-level key is an update operator.
pub(crate) fn is_replacement_document(replacement: &Document) -> bool {
    replacement.keys().all(|key| !key.starts_with('$'))
}

/// Builds the document an upsert starts from: the equality conditions of `filter`.
pub(crate) fn upsert_seed(filter: &Document) -> EngineResult<Document> {
    let mut seed = Document::new();

    collect_equalities(filter, &mut seed)?;

    Ok(seed)
}

fn collect_equalities(filter: &Document, seed: &mut Document) -> EngineResult<()> {
    for (key, condition) in filter {
        if key == "$and" {
            for clause in condition.as_array().into_iter().flatten() {
                if let Bson::Document(clause) = clause {
                    collect_equalities(clause, seed)?;
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        match operator_document(condition) {
            Some(operators) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(seed, key, value.clone())?;
                }
            }
            None => set_path(seed, key, condition.clone())?,
        }
    }

    Ok(())
}

/// Applies an operator update document to `document` in place.
///
/// `inserting` enables `$setOnInsert`. The `_id` of an existing document cannot change.
pub(crate) fn apply_update(
    document: &mut Document,
    update: &Document,
    inserting: bool,
) -> EngineResult<()> {
    if !is_update_document(update) {
        return Err(InMemoryError::BadValue(
            "Update document requires atomic operators".to_string(),
        ));
    }

    let original_id = document.get("_id").cloned();

    for (operator, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            InMemoryError::BadValue(format!("Modifiers operate on fields but we found another type instead: {operator}"))
        })?;

        for (path, operand) in fields {
            apply_operator(document, operator, path, operand, inserting)?;
        }
    }

    match (&original_id, document.get("_id")) {
        (Some(before), Some(after)) if values_equal(before, after) => Ok(()),
        (Some(_), _) => Err(InMemoryError::ImmutableId),
        (None, _) => Ok(()),
    }
}

fn apply_operator(
    document: &mut Document,
    operator: &str,
    path: &str,
    operand: &Bson,
    inserting: bool,
) -> EngineResult<()> {
    match operator {
        "$set" => set_path(document, path, operand.clone()),
        "$setOnInsert" if inserting => set_path(document, path, operand.clone()),
        "$setOnInsert" => Ok(()),
        "$unset" => {
            remove_path(document, path);
            Ok(())
        }
        "$inc" => {
            let sum = match get_path(document, path) {
                None => numeric(operator, operand)?.clone(),
                Some(current) => add(numeric(operator, current)?, numeric(operator, operand)?),
            };
            set_path(document, path, sum)
        }
        "$min" | "$max" => {
            let wanted = if operator == "$min" { Ordering::Less } else { Ordering::Greater };
            let replace = get_path(document, path)
                .is_none_or(|current| compare(operand, current) == wanted);

            if replace {
                set_path(document, path, operand.clone())?;
            }
            Ok(())
        }
        "$rename" => {
            let target = operand.as_str().ok_or_else(|| {
                InMemoryError::BadValue(format!("The 'to' field for $rename must be a string: {path}"))
            })?;

            if let Some(value) = remove_path(document, path) {
                set_path(document, target, value)?;
            }
            Ok(())
        }
        "$push" | "$addToSet" => {
            let additions = match operand {
                Bson::Document(modifiers) if modifiers.contains_key("$each") => modifiers
                    .get_array("$each")
                    .map_err(|_| InMemoryError::BadValue("$each requires an array".to_string()))?
                    .clone(),
                other => vec![other.clone()],
            };

            let items = array_at(document, operator, path)?;
            for addition in additions {
                if operator == "$addToSet" && items.iter().any(|item| values_equal(item, &addition)) {
                    continue;
                }
                items.push(addition);
            }
            Ok(())
        }
        "$pull" => {
            let Some(Bson::Array(items)) = get_path_mut(document, path) else {
                return Ok(());
            };

            let mut kept = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                if !matches_value(&item, operand)? {
                    kept.push(item);
                }
            }
            *items = kept;
            Ok(())
        }
        "$pop" => {
            let Some(Bson::Array(items)) = get_path_mut(document, path) else {
                return Ok(());
            };

            match as_i64(operand) {
                Some(1) => {
                    items.pop();
                }
                Some(-1) => {
                    if !items.is_empty() {
                        items.remove(0);
                    }
                }
                _ => return Err(InMemoryError::BadValue("$pop expects 1 or -1".to_string())),
            }
            Ok(())
        }
        other => Err(InMemoryError::UnknownOperator(other.to_string())),
    }
}

fn numeric<'a>(operator: &str, value: &'a Bson) -> EngineResult<&'a Bson> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Ok(value),
        _ => Err(InMemoryError::BadValue(format!(
            "Cannot apply {operator} to a value of non-numeric type"
        ))),
    }
}

fn add(left: &Bson, right: &Bson) -> Bson {
    match (left, right) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b))),
        (Bson::Double(_), _) | (_, Bson::Double(_)) => {
            Bson::Double(as_f64(left).unwrap_or_default() + as_f64(right).unwrap_or_default())
        }
        _ => Bson::Int64(
            as_i64(left)
                .unwrap_or_default()
                .wrapping_add(as_i64(right).unwrap_or_default()),
        ),
    }
}

/// Returns the array at `path`, creating an empty one if the field is missing.
fn array_at<'a>(document: &'a mut Document, operator: &str, path: &str) -> EngineResult<&'a mut Vec<Bson>> {
    if get_path(document, path).is_none() {
        set_path(document, path, Bson::Array(Vec::new()))?;
    }

    match get_path_mut(document, path) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(InMemoryError::BadValue(format!(
            "The field '{path}' must be an array to apply {operator}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn sets_and_removes_dotted_paths() {
        let mut document = doc! { "a": { "b": 1 }, "list": [1, 2] };

        set_path(&mut document, "a.c.d", Bson::Int32(2)).unwrap();
        set_path(&mut document, "list.1", Bson::Int32(5)).unwrap();

        assert_eq!(document, doc! { "a": { "b": 1, "c": { "d": 2 } }, "list": [1, 5] });
        assert_eq!(remove_path(&mut document, "a.b"), Some(Bson::Int32(1)));
        assert_eq!(get_path(&document, "a.c.d"), Some(&Bson::Int32(2)));
        assert!(set_path(&mut document, "list.x.y", Bson::Null).is_err());
    }

    #[test]
    fn positional_writes_pad_arrays_within_a_bound() {
        let mut document = doc! { "tags": ["a"] };

        set_path(&mut document, "tags.3", Bson::String("d".into())).unwrap();
        assert_eq!(document, doc! { "tags": ["a", null, null, "d"] });

        set_path(&mut document, "tags.1503", Bson::Int32(1)).unwrap();
        assert_eq!(document.get_array("tags").unwrap().len(), 1504);

        for path in ["tags.4000000000", "tags.18446744073709551615"] {
            assert!(matches!(
                set_path(&mut document, path, Bson::Int32(1)),
                Err(InMemoryError::BadValue(_))
            ));
        }
        assert_eq!(document.get_array("tags").unwrap().len(), 1504);

        let err = apply_update(&mut document, &doc! { "$set": { "tags.9999": 1 } }, false).unwrap_err();
        assert!(matches!(err, InMemoryError::BadValue(_)));
    }

    #[test]
    fn applies_field_operators() {
        let mut document = doc! { "_id": 1, "n": 1, "name": "a", "tags": ["x"], "low": 5 };

        apply_update(
            &mut document,
            &doc! {
                "$inc": { "n": 2, "m": 1.5 },
                "$set": { "profile.age": 30 },
                "$rename": { "name": "title" },
                "$addToSet": { "tags": { "$each": ["x", "y"] } },
                "$min": { "low": 3 },
                "$setOnInsert": { "created": true },
            },
            false,
        )
        .unwrap();

        assert_eq!(
            document,
            doc! {
                "_id": 1,
                "n": 3,
                "tags": ["x", "y"],
                "low": 3,
                "m": 1.5,
                "profile": { "age": 30 },
                "title": "a",
            }
        );
    }

    #[test]
    fn push_and_pull_subdocuments() {
        let mut document = doc! { "_id": 1 };

        apply_update(&mut document, &doc! { "$push": { "pets": { "uuid": "p1" } } }, false).unwrap();
        apply_update(&mut document, &doc! { "$push": { "pets": { "uuid": "p2" } } }, false).unwrap();
        assert_eq!(document, doc! { "_id": 1, "pets": [{ "uuid": "p1" }, { "uuid": "p2" }] });

        apply_update(&mut document, &doc! { "$pull": { "pets": { "uuid": "p1" } } }, false).unwrap();
        assert_eq!(document, doc! { "_id": 1, "pets": [{ "uuid": "p2" }] });
    }

    #[test]
    fn rejects_bad_updates() {
        let mut document = doc! { "_id": 1, "name": "a" };

        assert!(apply_update(&mut document, &doc! { "name": "b" }, false).is_err());
        assert_eq!(
            apply_update(&mut document, &doc! { "$set": { "_id": 2 } }, false),
            Err(InMemoryError::ImmutableId)
        );
        assert_eq!(
            apply_update(&mut doc! { "_id": 1 }, &doc! { "$currentDate": { "at": true } }, false),
            Err(InMemoryError::UnknownOperator("$currentDate".to_string()))
        );
        assert!(apply_update(&mut document, &doc! { "$inc": { "name": 1 } }, false).is_err());
        assert!(apply_update(&mut document, &doc! { "$push": { "name": 1 } }, false).is_err());
    }

    #[test]
    fn upsert_seed_takes_equalities() {
        let seed = upsert_seed(&doc! {
            "uuid": "aaa",
            "age": { "$gt": 3 },
            "kind": { "$eq": "cat" },
            "$and": [{ "owner.name": "ada" }],
        })
        .unwrap();

        assert_eq!(seed, doc! { "uuid": "aaa", "kind": "cat", "owner": { "name": "ada" } });
    }
}
