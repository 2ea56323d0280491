//! Schema-less documents and the value semantics shared by filters, sorts
//! and aggregation.

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::schema::{Collection, PRIMARY_KEY};

/// A stored document: a JSON object with a string `id`.
pub type Document = Map<String, Value>;

/// Longest accepted primary key, in bytes. Keeps every index key within
/// LMDB's 511 byte key limit.
pub const MAX_ID_LEN: usize = 255;

/// A typed record living in one collection.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;
}

/// Returns the validated primary key of `doc`.
pub fn primary_key(doc: &Document) -> Result<&str, StoreError> {
    match doc.get(PRIMARY_KEY) {
        Some(Value::String(id)) if id.is_empty() => {
            Err(StoreError::InvalidDocument("id must not be empty".to_string()))
        }
        Some(Value::String(id)) if id.len() > MAX_ID_LEN => Err(StoreError::InvalidDocument(
            format!("id is {} bytes, limit is {MAX_ID_LEN}", id.len()),
        )),
        Some(Value::String(id)) => Ok(id.as_str()),
        Some(other) => Err(StoreError::InvalidDocument(format!(
            "id must be a string, got {other}"
        ))),
        None => Err(StoreError::InvalidDocument("missing id field".to_string())),
    }
}

/// Converts an arbitrary JSON value into a document.
pub fn into_document(value: Value) -> Result<Document, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

pub fn to_document<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    into_document(serde_json::to_value(record)?)
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Shallow merge: every top-level field of `patch` replaces the stored one.
pub fn merge(existing: &Document, patch: &Document) -> Document {
    let mut merged = existing.clone();
    for (field, value) in patch {
        merged.insert(field.clone(), value.clone());
    }
    merged
}

/// Strict equality on JSON values, with numbers compared by value so that
/// `1` and `1.0` are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Relational ordering used by sorts. Numbers, strings and booleans compare
/// within their own kind; anything else (mixed kinds, missing fields, nulls)
/// compares equal, leaving the relative order to the stable sort.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
