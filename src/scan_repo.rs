//! Scan session repository: persistence and dashboard statistics for
//! equipment safety scans.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::error;
use serde::Serialize;
use serde_json::{json, Value};

use crate::document::{into_document, Document};
use crate::error::StoreError;
use crate::models::ScanSession;
use crate::pipeline::{GroupStage, Pipeline, GROUP_ID};
use crate::query::{Filter, FindOptions, SortSpec};
use crate::schema::Collection;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub total_scans: usize,
    pub passed_scans: usize,
    pub failed_scans: usize,
    /// Percentage of passed scans, one decimal place.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EquipmentStats {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Percentage of `part` in `whole`, rounded to one decimal; 0 for an empty
/// whole.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

#[derive(Clone)]
pub struct ScanRepo {
    store: Arc<Store>,
}

impl ScanRepo {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn save_session(&self, session: &ScanSession) -> Result<String, StoreError> {
        self.store.insert_record(session)
    }

    /// Most recent sessions first.
    pub fn recent(&self, limit: usize) -> Vec<ScanSession> {
        let options = FindOptions::sorted(SortSpec::descending("timestamp")).limit(limit);
        self.store.find_records(&Filter::all(), &options).unwrap_or_else(|e| {
            error!("Error loading recent scans: {e}");
            Vec::new()
        })
    }

    pub fn by_id(&self, id: &str) -> Option<ScanSession> {
        self.store.find_record(&Filter::by_id(id)).unwrap_or_else(|e| {
            error!("Error loading scan '{id}': {e}");
            None
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.store.delete_one(Collection::Scans, &Filter::by_id(id))?;
        Ok(result.deleted_count == 1)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        self.store.clear(Collection::Scans)
    }

    /// Both counts come from one read snapshot.
    pub fn stats(&self) -> ScanStats {
        let sessions = self.store.find(Collection::Scans, &Filter::all(), &FindOptions::default());
        match sessions {
            Ok(sessions) => {
                let passed_filter = Filter::all().equals("overallPassed", true);
                let total = sessions.len();
                let passed = sessions.iter().filter(|doc| passed_filter.matches(doc)).count();
                ScanStats {
                    total_scans: total,
                    passed_scans: passed,
                    failed_scans: total - passed,
                    success_rate: percentage(passed, total),
                }
            }
            Err(e) => {
                error!("Error computing scan stats: {e}");
                ScanStats::default()
            }
        }
    }

    /// Pass/fail counts per equipment name across every stored session.
    pub fn equipment_stats(&self) -> BTreeMap<String, EquipmentStats> {
        let sessions = match self.store.find(Collection::Scans, &Filter::all(), &FindOptions::default()) {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("Error computing equipment stats: {e}");
                return BTreeMap::new();
            }
        };
        equipment_stats(&unwind_results(&sessions))
    }
}

/// One document per embedded result, carrying its equipment name and
/// whether it was detected.
pub fn unwind_results(sessions: &[Document]) -> Vec<Document> {
    sessions
        .iter()
        .filter_map(|session| session.get("results").and_then(Value::as_array))
        .flatten()
        .filter_map(|result| {
            into_document(json!({
                "equipmentName": result.get("equipmentName").cloned().unwrap_or(Value::Null),
                "isPresent": result.get("isPresent").cloned().unwrap_or(Value::Bool(false)),
            }))
            .ok()
        })
        .collect()
}

/// Group-count the unwound results three ways: all, detected, not detected.
pub fn equipment_stats(items: &[Document]) -> BTreeMap<String, EquipmentStats> {
    let by_name = |filter: Option<Filter>| {
        let pipeline = match filter {
            Some(filter) => Pipeline::new().matching(filter),
            None => Pipeline::new(),
        };
        pipeline
            .group(GroupStage::count_by("equipmentName"))
            .apply(items.to_vec())
            .into_iter()
            .filter_map(|group| {
                let name = group.get(GROUP_ID)?.as_str()?.to_string();
                let count = group.get("count")?.as_u64()? as usize;
                Some((name, count))
            })
            .collect::<Vec<_>>()
    };

    let mut stats: BTreeMap<String, EquipmentStats> = BTreeMap::new();
    for (name, total) in by_name(None) {
        stats.entry(name).or_default().total = total;
    }
    for (name, passed) in by_name(Some(Filter::all().equals("isPresent", true))) {
        stats.entry(name).or_default().passed = passed;
    }
    for (name, failed) in by_name(Some(Filter::all().equals("isPresent", false))) {
        stats.entry(name).or_default().failed = failed;
    }
    stats
}
