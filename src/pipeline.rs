//! Aggregation subset: match, group-count and sort stages.
//!
//! Stages run strictly in pipeline order over the collection's documents.
//! Pipelines are built either in code or from a JSON array; JSON input
//! outside the three supported stage shapes is rejected at construction.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::document::Document;
use crate::error::StoreError;
use crate::query::{Filter, SortSpec};

/// Field of every group document holding the group key.
pub const GROUP_ID: &str = "_id";

/// Count field used when a group stage names none.
pub const DEFAULT_COUNT_FIELD: &str = "count";

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// Partition by the value of a top-level field (missing counts as null).
    Field(String),
    /// Put every document into one group with this key.
    Constant(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    pub key: GroupKey,
    /// Fields that receive the per-group document count.
    pub count_fields: Vec<String>,
}

impl GroupStage {
    pub fn count_by(field: impl Into<String>) -> Self {
        Self {
            key: GroupKey::Field(field.into()),
            count_fields: vec![DEFAULT_COUNT_FIELD.to_string()],
        }
    }

    /// Emits one `{"_id": key, "<count>": n}` document per group, in the order
    /// groups were first seen.
    fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Value, u64)> = Vec::new();

        for doc in &docs {
            let key = match &self.key {
                GroupKey::Field(field) => doc.get(field).cloned().unwrap_or(Value::Null),
                GroupKey::Constant(value) => value.clone(),
            };
            let slot_key = slot_key(&key);
            match slots.get(&slot_key) {
                Some(&slot) => groups[slot].1 += 1,
                None => {
                    slots.insert(slot_key, groups.len());
                    groups.push((key, 1));
                }
            }
        }

        groups
            .into_iter()
            .map(|(key, count)| {
                let mut out = Map::new();
                out.insert(GROUP_ID.to_string(), key);
                for field in &self.count_fields {
                    out.insert(field.clone(), json!(count));
                }
                out
            })
            .collect()
    }

    /// `{"by": <field or constant>, "count": true}`
    fn from_plain_json(object: &Map<String, Value>) -> Result<Self, StoreError> {
        let by = object
            .get("by")
            .ok_or_else(|| StoreError::InvalidQuery("group stage needs 'by'".to_string()))?;
        if object.get("count") != Some(&Value::Bool(true)) {
            return Err(StoreError::InvalidQuery(
                "group stage supports only \"count\": true".to_string(),
            ));
        }
        if let Some(extra) = object.keys().find(|k| *k != "by" && *k != "count") {
            return Err(StoreError::InvalidQuery(format!(
                "unsupported group option '{extra}'"
            )));
        }
        Ok(Self {
            key: group_key(by),
            count_fields: vec![DEFAULT_COUNT_FIELD.to_string()],
        })
    }

    /// `{"_id": <field or constant>, "<name>": {"$sum": 1}, ...}`
    fn from_mongo_json(object: &Map<String, Value>) -> Result<Self, StoreError> {
        let id = object
            .get(GROUP_ID)
            .ok_or_else(|| StoreError::InvalidQuery("$group needs '_id'".to_string()))?;
        let count_accumulator = json!({"$sum": 1});

        let mut count_fields = Vec::new();
        for (field, accumulator) in object {
            if field == GROUP_ID {
                continue;
            }
            if *accumulator != count_accumulator {
                return Err(StoreError::InvalidQuery(format!(
                    "unsupported accumulator for '{field}': only {{\"$sum\": 1}} is supported"
                )));
            }
            count_fields.push(field.clone());
        }

        let key = match id {
            Value::String(field) => GroupKey::Field(field.trim_start_matches('$').to_string()),
            other => GroupKey::Constant(other.clone()),
        };
        Ok(Self { key, count_fields })
    }
}

/// Text identifying a group. Numbers are keyed by value, so `1` and `1.0`
/// share a group as they do in filters.
fn slot_key(key: &Value) -> String {
    match key {
        Value::Number(n) => n.as_f64().map_or_else(|| n.to_string(), |f| format!("{f:?}")),
        other => other.to_string(),
    }
}

fn group_key(by: &Value) -> GroupKey {
    match by {
        Value::String(field) => GroupKey::Field(field.clone()),
        other => GroupKey::Constant(other.clone()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group(GroupStage),
    Sort(SortSpec),
}

impl Stage {
    fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        match self {
            Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Group(group) => group.apply(docs),
            Stage::Sort(sort) => {
                let mut docs = docs;
                sort.apply(&mut docs);
                docs
            }
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let object = value.as_object().ok_or_else(|| {
            StoreError::InvalidQuery(format!("pipeline stage must be an object, got {value}"))
        })?;
        if object.len() != 1 {
            return Err(StoreError::InvalidQuery(format!(
                "pipeline stage must have exactly one key, got {}",
                object.len()
            )));
        }
        let (kind, body) = object
            .iter()
            .next()
            .ok_or_else(|| StoreError::InvalidQuery("empty pipeline stage".to_string()))?;

        match kind.as_str() {
            "match" | "$match" => Ok(Stage::Match(Filter::from_json(body)?)),
            "sort" | "$sort" => Ok(Stage::Sort(SortSpec::from_json(body)?)),
            "group" => Ok(Stage::Group(GroupStage::from_plain_json(as_object(kind, body)?)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_mongo_json(as_object(kind, body)?)?)),
            other => Err(StoreError::InvalidQuery(format!(
                "unsupported pipeline stage '{other}'"
            ))),
        }
    }
}

fn as_object<'a>(kind: &str, body: &'a Value) -> Result<&'a Map<String, Value>, StoreError> {
    body.as_object().ok_or_else(|| {
        StoreError::InvalidQuery(format!("'{kind}' stage body must be an object"))
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    pub fn group(mut self, group: GroupStage) -> Self {
        self.stages.push(Stage::Group(group));
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.stages.push(Stage::Sort(sort));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        self.stages.iter().fold(docs, |docs, stage| stage.apply(docs))
    }

    /// Parses a JSON array of stages.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let stages = value.as_array().ok_or_else(|| {
            StoreError::InvalidQuery(format!("pipeline must be an array, got {value}"))
        })?;
        Ok(Self {
            stages: stages.iter().map(Stage::from_json).collect::<Result<_, _>>()?,
        })
    }
}
