//! Fixed collection layout of the store.
//!
//! Every collection is keyed by the document's `id` and declares a set of
//! non-unique secondary indexes. Collections carry the schema version that
//! introduced them so an older store can be upgraded in place.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Schema version written by this crate.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Name of the LMDB database holding store metadata.
pub const META_DB: &str = "__meta";

/// Key under which the schema version is stored in [`META_DB`].
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Field holding the primary key of every document.
pub const PRIMARY_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Scans,
    LogbookEntries,
    OcrScans,
    CoalBatches,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Scans,
        Collection::LogbookEntries,
        Collection::OcrScans,
        Collection::CoalBatches,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Scans => "scans",
            Collection::LogbookEntries => "logbook_entries",
            Collection::OcrScans => "ocr_scans",
            Collection::CoalBatches => "coal_batches",
        }
    }

    /// Schema entry describing this collection.
    pub fn schema(self) -> &'static CollectionSchema {
        // SCHEMA is declared in the same order as Collection::ALL.
        &SCHEMA[self as usize]
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| StoreError::UnknownCollection(s.to_string()))
    }
}

/// Declaration of one collection.
#[derive(Debug)]
pub struct CollectionSchema {
    pub collection: Collection,
    /// First schema version that contains this collection.
    pub since_version: u32,
    /// Top-level fields with a non-unique secondary index.
    pub indexes: &'static [&'static str],
}

impl CollectionSchema {
    pub fn index_db_name(&self, field: &str) -> String {
        format!("{}.by_{}", self.collection.name(), field)
    }

    pub fn available_in(&self, version: u32) -> bool {
        self.since_version <= version
    }
}

pub static SCHEMA: [CollectionSchema; 4] = [
    CollectionSchema {
        collection: Collection::Scans,
        since_version: 1,
        indexes: &["timestamp", "overallPassed", "workerName"],
    },
    CollectionSchema {
        collection: Collection::LogbookEntries,
        since_version: 1,
        indexes: &["date", "type", "operator"],
    },
    CollectionSchema {
        collection: Collection::OcrScans,
        since_version: 1,
        indexes: &["timestamp", "filename"],
    },
    CollectionSchema {
        collection: Collection::CoalBatches,
        since_version: 2,
        indexes: &["createdAt", "dispatchTime", "quality", "mineLocation"],
    },
];

/// Named LMDB databases a store at `version` opens: the meta database plus
/// one per collection and one per index.
pub fn database_count(version: u32) -> u32 {
    let per_collection: usize = SCHEMA
        .iter()
        .filter(|schema| schema.available_in(version))
        .map(|schema| 1 + schema.indexes.len())
        .sum();
    1 + per_collection as u32
}
