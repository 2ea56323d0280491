//! Operator logbook stored alongside the scans.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use log::error;
use serde::Deserialize;

use crate::error::StoreError;
use crate::models::{generate_id, LogbookEntry};
use crate::query::{Filter, FindOptions, SortSpec};
use crate::schema::Collection;
use crate::store::Store;

/// A logbook entry before an id and a date are assigned.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewLogEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub operator: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewLogEntry {
    pub fn new(entry_type: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into(),
            operator: operator.into(),
            ..Self::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Clone)]
pub struct LogbookRepo {
    store: Arc<Store>,
}

impl LogbookRepo {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Stores a new entry dated now.
    pub fn record(&self, entry: NewLogEntry) -> Result<LogbookEntry, StoreError> {
        if entry.entry_type.trim().is_empty() {
            return Err(StoreError::InvalidDocument("log entry type is required".to_string()));
        }
        if entry.operator.trim().is_empty() {
            return Err(StoreError::InvalidDocument("log entry operator is required".to_string()));
        }

        let entry = LogbookEntry {
            id: generate_id("log"),
            entry_type: entry.entry_type.trim().to_string(),
            date: Utc::now().trunc_subsecs(3),
            operator: entry.operator.trim().to_string(),
            filename: entry.filename,
            note: entry.note,
        };
        self.store.insert_record(&entry)?;
        Ok(entry)
    }

    pub fn recent(&self, limit: usize) -> Vec<LogbookEntry> {
        self.list(&Filter::all(), limit)
    }

    pub fn by_type(&self, entry_type: &str) -> Vec<LogbookEntry> {
        self.list(&Filter::all().equals("type", entry_type), 0)
    }

    pub fn by_operator(&self, operator: &str) -> Vec<LogbookEntry> {
        self.list(&Filter::all().equals("operator", operator), 0)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.store.delete_one(Collection::LogbookEntries, &Filter::by_id(id))?;
        Ok(result.deleted_count == 1)
    }

    fn list(&self, filter: &Filter, limit: usize) -> Vec<LogbookEntry> {
        let options = FindOptions::sorted(SortSpec::descending("date")).limit(limit);
        self.store.find_records(filter, &options).unwrap_or_else(|e| {
            error!("Error loading logbook entries: {e}");
            Vec::new()
        })
    }
}
