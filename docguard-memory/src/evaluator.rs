//! Query evaluation for in-memory document filtering.
//!
//! Filters, sort specifications, projections and aggregation pipelines arrive in the
//! engine's own document syntax (`{ "age": { "$gt": 18 } }`) and are evaluated here
//! against stored documents.

use std::cmp::Ordering;

use bson::{Bson, Document, doc};

use crate::{
    error::{EngineResult, InMemoryError},
    modifier::set_path,
};

static NULL: Bson = Bson::Null;

/// Returns every value reachable at a dotted `path`.
///
/// Arrays met along the way are traversed, so `tags.name` over
/// `{ tags: [{ name: "a" }, { name: "b" }] }` yields both names. A numeric segment
/// indexes into an array instead.
pub(crate) fn values_at<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let parts = path.split('.').collect::<Vec<_>>();
    let mut found = Vec::new();

    collect_in_document(document, &parts, &mut found);

    found
}

fn collect_in_document<'a>(document: &'a Document, parts: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    let Some(value) = document.get(*head) else {
        return;
    };

    if rest.is_empty() {
        found.push(value);
    } else {
        collect_in_value(value, rest, found);
    }
}

fn collect_in_value<'a>(value: &'a Bson, parts: &[&str], found: &mut Vec<&'a Bson>) {
    match value {
        Bson::Document(document) => collect_in_document(document, parts, found),
        Bson::Array(items) => {
            if let Ok(index) = parts[0].parse::<usize>() {
                if let Some(item) = items.get(index) {
                    match &parts[1..] {
                        [] => found.push(item),
                        rest => collect_in_value(item, rest, found),
                    }
                }
                return;
            }

            for item in items {
                if let Bson::Document(document) = item {
                    collect_in_document(document, parts, found);
                }
            }
        }
        _ => {}
    }
}

/// Canonical cross-type ordering of BSON values.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

pub(crate) fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(v) => *v,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).is_none_or(|v| v != 0.0),
    }
}

/// Total order over BSON values, used for sorting and range operators.
pub(crate) fn compare(left: &Bson, right: &Bson) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Bson::String(a), Bson::String(b)) => a.cmp(b),
        (Bson::Symbol(a), Bson::Symbol(b)) => a.cmp(b),
        (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
        (Bson::DateTime(a), Bson::DateTime(b)) => a.timestamp_millis().cmp(&b.timestamp_millis()),
        (Bson::Timestamp(a), Bson::Timestamp(b)) => {
            (a.time, a.increment).cmp(&(b.time, b.increment))
        }
        (Bson::Binary(a), Bson::Binary(b)) => a.bytes.cmp(&b.bytes),
        (Bson::Array(a), Bson::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare(x, y))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Bson::Document(a), Bson::Document(b)) => a
            .iter()
            .zip(b.iter())
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare(va, vb)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (a, b) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    compare(left, right) == Ordering::Equal
}

/// Returns the operator map of `{ "$op": .. }` conditions, `None` for literal values.
pub(crate) fn operator_document(condition: &Bson) -> Option<&Document> {
    condition
        .as_document()
        .filter(|document| {
            document
                .keys()
                .next()
                .is_some_and(|key| key.starts_with('$'))
        })
}

/// Returns `true` if `document` satisfies `filter`.
pub(crate) fn matches(document: &Document, filter: &Document) -> EngineResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            operator if operator.starts_with('$') => {
                return Err(InMemoryError::UnknownOperator(operator.to_string()));
            }
            path => matches_values(&values_at(document, path), condition)?,
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> EngineResult<Vec<&'a Document>> {
    condition
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| InMemoryError::BadValue(format!("{operator} must be a nonempty array")))?
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                InMemoryError::BadValue(format!("{operator} argument's entries must be objects"))
            })
        })
        .collect()
}

fn matches_values(values: &[&Bson], condition: &Bson) -> EngineResult<bool> {
    match operator_document(condition) {
        Some(operators) => {
            for (operator, operand) in operators {
                if !apply_operator(values, operator, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        None => Ok(equals_any(values, condition)),
    }
}

/// Returns `true` if a single `value` satisfies `condition`.
///
/// A plain document condition is matched as a filter against document values, which is
/// how `$pull` selects array elements.
pub(crate) fn matches_value(value: &Bson, condition: &Bson) -> EngineResult<bool> {
    match (operator_document(condition), condition, value) {
        (None, Bson::Document(filter), Bson::Document(element)) => matches(element, filter),
        (None, Bson::Document(_), _) => Ok(false),
        _ => matches_values(&[value], condition),
    }
}

/// Equality with implicit array membership; `null` also matches a missing field.
fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    if matches!(target, Bson::Null) && values.is_empty() {
        return true;
    }

    values.iter().any(|value| {
        values_equal(value, target)
            || matches!(value, Bson::Array(items) if items.iter().any(|item| values_equal(item, target)))
    })
}

/// The values themselves plus the elements of any array among them.
fn flattened<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut flat = Vec::with_capacity(values.len());

    for value in values {
        if let Bson::Array(items) = value {
            flat.extend(items.iter());
        }
        flat.push(*value);
    }

    flat
}

fn array_operand<'a>(operator: &str, operand: &'a Bson) -> EngineResult<&'a Vec<Bson>> {
    operand
        .as_array()
        .ok_or_else(|| InMemoryError::BadValue(format!("{operator} needs an array")))
}

fn apply_operator(values: &[&Bson], operator: &str, operand: &Bson) -> EngineResult<bool> {
    Ok(match operator {
        "$eq" => equals_any(values, operand),
        "$ne" => !equals_any(values, operand),
        "$gt" | "$gte" | "$lt" | "$lte" => flattened(values).iter().any(|value| {
            type_rank(value) == type_rank(operand)
                && match (operator, compare(value, operand)) {
                    ("$gt", Ordering::Greater) => true,
                    ("$gte", Ordering::Greater | Ordering::Equal) => true,
                    ("$lt", Ordering::Less) => true,
                    ("$lte", Ordering::Less | Ordering::Equal) => true,
                    _ => false,
                }
        }),
        "$in" => array_operand(operator, operand)?
            .iter()
            .any(|target| equals_any(values, target)),
        "$nin" => !array_operand(operator, operand)?
            .iter()
            .any(|target| equals_any(values, target)),
        "$all" => {
            let targets = array_operand(operator, operand)?;
            !targets.is_empty() && targets.iter().all(|target| equals_any(values, target))
        }
        "$exists" => values.is_empty() != truthy(operand),
        "$size" => {
            let size = as_i64(operand)
                .ok_or_else(|| InMemoryError::BadValue("$size needs a number".to_string()))?;
            values
                .iter()
                .any(|value| matches!(value, Bson::Array(items) if items.len() as i64 == size))
        }
        "$elemMatch" => {
            let condition = operand
                .as_document()
                .ok_or_else(|| InMemoryError::BadValue("$elemMatch needs an Object".to_string()))?;
            let mut found = false;

            'outer: for value in values {
                if let Bson::Array(items) = value {
                    for item in items {
                        let hit = match (operator_document(operand), item) {
                            (Some(_), item) => matches_values(&[item], operand)?,
                            (None, Bson::Document(element)) => matches(element, condition)?,
                            _ => false,
                        };
                        if hit {
                            found = true;
                            break 'outer;
                        }
                    }
                }
            }

            found
        }
        "$not" => {
            if operator_document(operand).is_none() {
                return Err(InMemoryError::BadValue("$not needs an operator document".to_string()));
            }
            !matches_values(values, operand)?
        }
        other => return Err(InMemoryError::UnknownOperator(other.to_string())),
    })
}

/// Filters `documents` by `filter`, keeping their order.
pub(crate) fn filter_documents<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    filter: &Document,
) -> EngineResult<Vec<Document>> {
    let mut matched = Vec::new();

    for document in documents {
        if matches(document, filter)? {
            matched.push(document.clone());
        }
    }

    Ok(matched)
}

/// Compares two documents by a sort specification such as `{ "age": -1, "name": 1 }`.
pub(crate) fn compare_by(left: &Document, right: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let a = values_at(left, field).first().copied().unwrap_or(&NULL);
        let b = values_at(right, field).first().copied().unwrap_or(&NULL);

        let ordering = match as_f64(direction) {
            Some(d) if d < 0.0 => compare(b, a),
            _ => compare(a, b),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|a, b| compare_by(a, b, sort));
}

/// Applies an inclusion or exclusion projection.
pub(crate) fn project(document: &Document, projection: &Document) -> EngineResult<Document> {
    let keep_id = projection.get("_id").is_none_or(truthy);
    let fields = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .map(|(field, flag)| (field, truthy(flag)))
        .collect::<Vec<_>>();

    let inclusive = fields.first().map(|(_, include)| *include);
    if fields.iter().any(|(_, include)| Some(*include) != inclusive) {
        return Err(InMemoryError::BadValue(
            "Cannot do exclusion and inclusion in the same projection".to_string(),
        ));
    }

    if inclusive == Some(true) {
        let mut projected = Document::new();

        if keep_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (field, _) in fields {
            if let Some(value) = values_at(document, field).first() {
                set_path(&mut projected, field, (*value).clone())?;
            }
        }

        return Ok(projected);
    }

    let mut projected = document.clone();

    for (field, _) in fields {
        crate::modifier::remove_path(&mut projected, field);
    }
    if !keep_id {
        projected.remove("_id");
    }

    Ok(projected)
}

/// Distinct values of `field`, with arrays unwound, in first-seen order.
pub(crate) fn distinct_values<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    field: &str,
) -> Vec<Bson> {
    let mut distinct: Vec<Bson> = Vec::new();

    for document in documents {
        for value in values_at(document, field) {
            let candidates = match value {
                Bson::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            };

            for candidate in candidates {
                if !distinct.iter().any(|seen| values_equal(seen, candidate)) {
                    distinct.push(candidate.clone());
                }
            }
        }
    }

    distinct
}

fn stage_count(stage: &str, value: &Bson) -> EngineResult<usize> {
    as_i64(value)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| InMemoryError::BadValue(format!("{stage} needs a non-negative number")))
}

/// Runs an aggregation pipeline over `documents`.
///
/// Supported stages: `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count`.
pub(crate) fn run_pipeline(
    documents: Vec<Document>,
    pipeline: &[Document],
) -> EngineResult<Vec<Document>> {
    let mut current = documents;

    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(InMemoryError::BadValue(
                    "A pipeline stage specification object must contain exactly one field."
                        .to_string(),
                ));
            }
        };
        let spec_document = || {
            spec.as_document()
                .ok_or_else(|| InMemoryError::BadValue(format!("{name} needs an object")))
        };

        current = match name.as_str() {
            "$match" => filter_documents(current.iter(), spec_document()?)?,
            "$sort" => {
                sort_documents(&mut current, spec_document()?);
                current
            }
            "$skip" => current
                .into_iter()
                .skip(stage_count(name, spec)?)
                .collect(),
            "$limit" => current
                .into_iter()
                .take(stage_count(name, spec)?)
                .collect(),
            "$project" => {
                let projection = spec_document()?;
                current
                    .iter()
                    .map(|document| project(document, projection))
                    .collect::<EngineResult<Vec<_>>>()?
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|field| !field.is_empty() && !field.starts_with('$'))
                    .ok_or_else(|| {
                        InMemoryError::BadValue("$count needs a non-empty field name".to_string())
                    })?;

                if current.is_empty() {
                    Vec::new()
                } else {
                    let count = i32::try_from(current.len())
                        .map(Bson::Int32)
                        .unwrap_or_else(|_| Bson::Int64(current.len() as i64));
                    vec![doc! { field: count }]
                }
            }
            other => return Err(InMemoryError::UnsupportedStage(other.to_string())),
        };
    }

    Ok(current)
}
