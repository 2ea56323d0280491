//! QR payload codec for coal batches.
//!
//! A batch label carries a JSON object with the batch id, weight, quality,
//! location, dispatch timestamp and a URL back to the batch page. Rendering
//! that text into a QR image is left to the host.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{iso8601, CoalBatch};

/// Heaviest batch accepted, in tons.
pub const MAX_BATCH_WEIGHT: f64 = 1000.0;

pub const QUALITY_OPTIONS: [&str; 3] = ["Premium", "Standard", "Low"];

pub const MINE_LOCATIONS: [&str; 12] = [
    "East Pit",
    "West Pit",
    "North Mine Section",
    "South Mine Section",
    "Shaft A",
    "Shaft B",
    "Level A",
    "Level B",
    "Level C",
    "Underground Section 1",
    "Underground Section 2",
    "Surface Mining Area",
];

/// `CB-<epoch millis>-<0..999>`
pub fn generate_batch_id() -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("CB-{}-{suffix}", Utc::now().timestamp_millis())
}

/// Input for a new batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub weight: f64,
    pub quality: String,
    pub mine_location: String,
    #[serde(with = "iso8601")]
    pub dispatch_time: DateTime<Utc>,
}

impl BatchRequest {
    /// Human-readable problems; empty when the request is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.weight.is_nan() || self.weight <= 0.0 {
            errors.push("Weight must be greater than 0".to_string());
        }
        if self.weight > MAX_BATCH_WEIGHT {
            errors.push(format!("Weight cannot exceed {MAX_BATCH_WEIGHT} tons"));
        }
        if self.quality.trim().is_empty() {
            errors.push("Quality grade is required".to_string());
        }
        if self.mine_location.trim().is_empty() {
            errors.push("Mine location is required".to_string());
        }
        errors
    }
}

#[derive(Error, Debug)]
pub enum QrDecodeError {
    #[error("QR content is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("QR content does not name a batch")]
    MissingBatchId,
}

/// Content encoded into a batch's QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    pub id: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Dispatch time, ISO-8601.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl QrPayload {
    pub fn for_batch(
        id: &str,
        weight: f64,
        quality: &str,
        location: &str,
        dispatch_time: &DateTime<Utc>,
        base_url: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            weight: Some(weight),
            quality: Some(quality.to_string()),
            location: Some(location.to_string()),
            timestamp: Some(iso8601::format(dispatch_time)),
            url: Some(batch_url(base_url, id)),
        }
    }

    pub fn from_batch(batch: &CoalBatch, base_url: &str) -> Self {
        Self::for_batch(
            &batch.id,
            batch.weight,
            &batch.quality,
            &batch.mine_location,
            &batch.dispatch_time,
            base_url,
        )
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Reads scanned QR text. Text that is not JSON and JSON that names no
    /// batch are reported as different errors.
    pub fn decode(text: &str) -> Result<Self, QrDecodeError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(QrDecodeError::InvalidJson)?;
        match value.get("id").and_then(|id| id.as_str()) {
            Some(id) if !id.trim().is_empty() => {}
            _ => return Err(QrDecodeError::MissingBatchId),
        }
        serde_json::from_value(value).map_err(QrDecodeError::InvalidJson)
    }
}

pub fn batch_url(base_url: &str, id: &str) -> String {
    format!("{}/batch/{id}", base_url.trim_end_matches('/'))
}
