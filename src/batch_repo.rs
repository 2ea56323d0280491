//! Coal batch repository: creation with QR labels, lookups, dispatch
//! reporting and label scanning.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use log::error;
use serde::Serialize;
use serde_json::Value;

use crate::document::Document;
use crate::error::StoreError;
use crate::models::{iso8601, CoalBatch};
use crate::pipeline::{GroupStage, Pipeline, GROUP_ID};
use crate::qr::{generate_batch_id, BatchRequest, QrPayload};
use crate::query::{Filter, FindOptions, SortSpec};
use crate::schema::Collection;
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_batches: usize,
    pub total_weight: f64,
    pub average_weight: f64,
    pub quality_distribution: BTreeMap<String, usize>,
    pub location_distribution: BTreeMap<String, usize>,
}

/// What a scanned QR label resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum QrLookup {
    Found(CoalBatch),
    /// The label names a batch this store does not hold.
    NotFound(String),
    /// The label is not a batch label.
    Invalid(String),
}

#[derive(Clone)]
pub struct BatchRepo {
    store: Arc<Store>,
}

impl BatchRepo {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Validates the request, assigns an id, builds the QR payload and
    /// stores the batch.
    pub fn create(&self, request: &BatchRequest, base_url: &str) -> Result<CoalBatch, StoreError> {
        let problems = request.validate();
        if !problems.is_empty() {
            return Err(StoreError::InvalidDocument(problems.join("; ")));
        }

        let id = generate_batch_id();
        let qr_code = QrPayload::for_batch(
            &id,
            request.weight,
            &request.quality,
            &request.mine_location,
            &request.dispatch_time,
            base_url,
        )
        .encode()?;

        let batch = CoalBatch {
            id,
            weight: request.weight,
            quality: request.quality.trim().to_string(),
            mine_location: request.mine_location.trim().to_string(),
            dispatch_time: request.dispatch_time.trunc_subsecs(3),
            qr_code,
            // Millisecond precision, as persisted.
            created_at: Utc::now().trunc_subsecs(3),
            updated_at: None,
        };
        self.save(&batch)?;
        Ok(batch)
    }

    pub fn save(&self, batch: &CoalBatch) -> Result<String, StoreError> {
        self.store.insert_record(batch)
    }

    /// Newest batches first.
    pub fn recent(&self, limit: usize) -> Vec<CoalBatch> {
        self.list(&Filter::all(), limit)
    }

    pub fn by_id(&self, id: &str) -> Option<CoalBatch> {
        self.store.find_record(&Filter::by_id(id)).unwrap_or_else(|e| {
            error!("Error loading batch '{id}': {e}");
            None
        })
    }

    pub fn by_quality(&self, quality: &str) -> Vec<CoalBatch> {
        self.list(&Filter::all().equals("quality", quality), 0)
    }

    pub fn by_location(&self, location: &str) -> Vec<CoalBatch> {
        self.list(&Filter::all().equals("mineLocation", location), 0)
    }

    /// Batches dispatched within `start..=end`, earliest first.
    pub fn by_dispatch_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<CoalBatch> {
        let options = FindOptions::sorted(SortSpec::ascending("dispatchTime"));
        match self.store.find_records::<CoalBatch>(&Filter::all(), &options) {
            Ok(batches) => batches
                .into_iter()
                .filter(|b| b.dispatch_time >= start && b.dispatch_time <= end)
                .collect(),
            Err(e) => {
                error!("Error loading batches dispatched {start}..{end}: {e}");
                Vec::new()
            }
        }
    }

    pub fn stats(&self) -> BatchStats {
        let docs = match self.store.find(Collection::CoalBatches, &Filter::all(), &FindOptions::default()) {
            Ok(docs) => docs,
            Err(e) => {
                error!("Error computing batch stats: {e}");
                return BatchStats::default();
            }
        };

        let total_batches = docs.len();
        let total_weight: f64 = docs
            .iter()
            .filter_map(|doc| doc.get("weight").and_then(Value::as_f64))
            .sum();
        let average_weight = if total_batches == 0 { 0.0 } else { total_weight / total_batches as f64 };

        BatchStats {
            total_batches,
            total_weight,
            average_weight,
            quality_distribution: distribution(&docs, "quality"),
            location_distribution: distribution(&docs, "mineLocation"),
        }
    }

    /// Merges `changes` into the batch and stamps `updatedAt`. Returns
    /// whether the batch exists.
    pub fn update(&self, id: &str, mut changes: Document) -> Result<bool, StoreError> {
        changes.insert("updatedAt".to_string(), Value::String(iso8601::format(&Utc::now())));
        let result = self
            .store
            .update_one(Collection::CoalBatches, &Filter::by_id(id), &changes)?;
        Ok(result.matched_count == 1)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.store.delete_one(Collection::CoalBatches, &Filter::by_id(id))?;
        Ok(result.deleted_count == 1)
    }

    /// Case-insensitive substring match over id, quality and location,
    /// newest first.
    pub fn search(&self, text: &str) -> Vec<CoalBatch> {
        let needle = text.trim().to_lowercase();
        self.recent(0)
            .into_iter()
            .filter(|b| {
                [&b.id, &b.quality, &b.mine_location]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Resolves the text read from a batch label.
    pub fn resolve_scan(&self, text: &str) -> QrLookup {
        match QrPayload::decode(text) {
            Ok(payload) => match self.by_id(&payload.id) {
                Some(batch) => QrLookup::Found(batch),
                None => QrLookup::NotFound(payload.id),
            },
            Err(e) => QrLookup::Invalid(e.to_string()),
        }
    }

    fn list(&self, filter: &Filter, limit: usize) -> Vec<CoalBatch> {
        let options = FindOptions::sorted(SortSpec::descending("createdAt")).limit(limit);
        self.store.find_records(filter, &options).unwrap_or_else(|e| {
            error!("Error loading batches: {e}");
            Vec::new()
        })
    }
}

/// Batch counts per distinct value of `field`.
fn distribution(docs: &[Document], field: &str) -> BTreeMap<String, usize> {
    Pipeline::new()
        .group(GroupStage::count_by(field))
        .apply(docs.to_vec())
        .into_iter()
        .filter_map(|group| {
            let key = group.get(GROUP_ID)?.as_str()?.to_string();
            let count = group.get("count")?.as_u64()? as usize;
            Some((key, count))
        })
        .collect()
}
