//! OCR scan history.

use std::sync::Arc;

use log::error;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::models::OcrScan;
use crate::query::{Filter, FindOptions, SortSpec};
use crate::schema::Collection;
use crate::store::Store;

#[derive(Clone)]
pub struct OcrRepo {
    store: Arc<Store>,
}

impl OcrRepo {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn save(&self, scan: &OcrScan) -> Result<String, StoreError> {
        self.store.insert_record(scan)
    }

    pub fn recent(&self, limit: usize) -> Vec<OcrScan> {
        let options = FindOptions::sorted(SortSpec::descending("timestamp")).limit(limit);
        self.store.find_records(&Filter::all(), &options).unwrap_or_else(|e| {
            error!("Error loading OCR scans: {e}");
            Vec::new()
        })
    }

    pub fn by_id(&self, id: &str) -> Option<OcrScan> {
        self.store.find_record(&Filter::by_id(id)).unwrap_or_else(|e| {
            error!("Error loading OCR scan '{id}': {e}");
            None
        })
    }

    /// Replaces the note on a scan. Returns whether the scan exists.
    pub fn set_note(&self, id: &str, note: &str) -> Result<bool, StoreError> {
        let patch = Map::from_iter([("note".to_string(), Value::String(note.to_string()))]);
        let result = self.store.update_one(Collection::OcrScans, &Filter::by_id(id), &patch)?;
        Ok(result.matched_count == 1)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.store.delete_one(Collection::OcrScans, &Filter::by_id(id))?;
        Ok(result.deleted_count == 1)
    }
}
