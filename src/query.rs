//! Equality filters, single-key sorts and limits.
//!
//! The query language is small: a filter is a conjunction of
//! equality clauses on top-level fields. Anything that looks like an
//! operator (`{"$gte": ...}`, `$or`, ...) is rejected when the filter is
//! built instead of silently matching nothing.

use serde_json::{Map, Value};

use crate::document::{compare_values, values_equal, Document};
use crate::error::StoreError;
use crate::schema::PRIMARY_KEY;

/// Conjunction of `field == value` clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::all().equals(PRIMARY_KEY, Value::String(id.into()))
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|(field, expected)| {
            doc.get(field)
                .is_some_and(|actual| values_equal(actual, expected))
        })
    }

    /// The primary key this filter pins, if any, so lookups can skip the
    /// collection scan.
    pub fn id_hint(&self) -> Option<&str> {
        self.clauses.iter().find_map(|(field, value)| match value {
            Value::String(id) if field == PRIMARY_KEY => Some(id.as_str()),
            _ => None,
        })
    }

    /// Builds a filter from a JSON object such as `{"type": "inspection"}`.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let object = match value {
            Value::Null => return Ok(Self::all()),
            Value::Object(object) => object,
            other => {
                return Err(StoreError::InvalidQuery(format!(
                    "filter must be an object, got {other}"
                )))
            }
        };

        let mut filter = Self::all();
        for (field, expected) in object {
            if field.starts_with('$') {
                return Err(StoreError::InvalidQuery(format!(
                    "unsupported filter operator '{field}'"
                )));
            }
            if let Value::Object(inner) = expected {
                if let Some(op) = inner.keys().find(|k| k.starts_with('$')) {
                    return Err(StoreError::InvalidQuery(format!(
                        "unsupported operator '{op}' on field '{field}'"
                    )));
                }
            }
            filter = filter.equals(field.clone(), expected.clone());
        }
        Ok(filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn from_json(value: &Value) -> Result<Self, StoreError> {
        match value.as_i64() {
            Some(1) => Ok(SortDirection::Ascending),
            Some(-1) => Ok(SortDirection::Descending),
            _ => Err(StoreError::InvalidQuery(format!(
                "sort direction must be 1 or -1, got {value}"
            ))),
        }
    }
}

/// Sort on a single top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Ascending }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Descending }
    }

    /// Stable in-place sort; ties keep their incoming order.
    pub fn apply(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            let ord = compare_values(a.get(&self.field), b.get(&self.field));
            match self.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
    }

    /// Parses `{"field": 1}` or `{"field": -1}`.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let object = value.as_object().ok_or_else(|| {
            StoreError::InvalidQuery(format!("sort must be an object, got {value}"))
        })?;
        let mut entries = object.iter();
        match (entries.next(), entries.next()) {
            (Some((field, direction)), None) => Ok(Self {
                field: field.clone(),
                direction: SortDirection::from_json(direction)?,
            }),
            (None, _) => Err(StoreError::InvalidQuery("sort names no field".to_string())),
            (Some(_), Some(_)) => Err(StoreError::InvalidQuery(
                "sort supports exactly one field".to_string(),
            )),
        }
    }
}

/// Post-filter shaping of a `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    /// Maximum number of documents; `Some(0)` means no limit.
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sorted(sort: SortSpec) -> Self {
        Self { sort: Some(sort), limit: None }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sorts, then truncates.
    pub fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some(sort) = &self.sort {
            sort.apply(&mut docs);
        }
        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            docs.truncate(limit);
        }
        docs
    }

    /// Parses `{"sort": {...}, "limit": n}`; both keys are optional.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let empty = Map::new();
        let object = match value {
            Value::Null => &empty,
            Value::Object(object) => object,
            other => {
                return Err(StoreError::InvalidQuery(format!(
                    "options must be an object, got {other}"
                )))
            }
        };

        let mut options = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "sort" => options.sort = Some(SortSpec::from_json(value)?),
                "limit" => {
                    let limit = value.as_u64().ok_or_else(|| {
                        StoreError::InvalidQuery(format!(
                            "limit must be a non-negative integer, got {value}"
                        ))
                    })?;
                    options.limit = Some(limit as usize);
                }
                other => {
                    return Err(StoreError::InvalidQuery(format!(
                        "unsupported find option '{other}'"
                    )))
                }
            }
        }
        Ok(options)
    }
}
