//! Typed records stored by the dashboard features.
//!
//! Every date/time field is persisted as an ISO-8601 UTC string with
//! millisecond precision (`2024-05-01T08:30:00.000Z`). The fixed width keeps
//! string sorts chronological, and every read parses the string back into a
//! [`DateTime<Utc>`].

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::document::Record;
use crate::schema::Collection;

/// Serde adapter for millisecond ISO-8601 timestamps.
pub mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&super::format(value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(text) => super::parse(&text).map(Some).map_err(de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

/// `<prefix>_<epoch millis>_<9 lowercase alphanumerics>`
pub fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Outcome of checking one piece of equipment in a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub id: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub equipment_name: String,
    pub is_present: bool,
    /// 0-100
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub id: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    pub results: Vec<ScanResult>,
    pub overall_passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl Record for ScanSession {
    const COLLECTION: Collection = Collection::Scans;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogbookEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(with = "iso8601")]
    pub date: DateTime<Utc>,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Record for LogbookEntry {
    const COLLECTION: Collection = Collection::LogbookEntries;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrScan {
    pub id: String,
    pub filename: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub extracted_text: String,
    /// Thumbnail as a data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Record for OcrScan {
    const COLLECTION: Collection = Collection::OcrScans;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoalBatch {
    pub id: String,
    /// Tons.
    pub weight: f64,
    pub quality: String,
    pub mine_location: String,
    #[serde(with = "iso8601")]
    pub dispatch_time: DateTime<Utc>,
    /// QR payload text encoded into the batch label.
    pub qr_code: String,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "iso8601::option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for CoalBatch {
    const COLLECTION: Collection = Collection::CoalBatches;
}
