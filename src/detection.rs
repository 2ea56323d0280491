//! Safety-equipment checks: the PPE checklist, the prompt sent to the
//! vision service and the parser for its fixed-format reply.
//!
//! The vision service itself is remote; this module only shapes what goes
//! out and interprets what comes back.

use std::sync::LazyLock;

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;

use crate::models::{generate_id, ScanResult, ScanSession};

static RE_PRESENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)PRESENT:\s*(YES|NO)").unwrap());
static RE_CONFIDENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CONFIDENCE:\s*(\d+)").unwrap());
static RE_EXPLANATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)EXPLANATION:\s*(.+)").unwrap());

pub const DEFAULT_CONFIDENCE: u8 = 50;
pub const DEFAULT_EXPLANATION: &str = "Analysis completed";

/// One item of the personal protective equipment checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquipmentItem {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
    /// What the vision service is asked to look for.
    pub search_term: &'static str,
}

pub const REQUIRED_EQUIPMENT: [EquipmentItem; 7] = [
    EquipmentItem {
        name: "Safety Helmet",
        required: true,
        description: "Hard hat or safety helmet",
        search_term: "cap or hat on head",
    },
    EquipmentItem {
        name: "Safety Jacket",
        required: true,
        description: "High visibility safety jacket or vest",
        search_term: "shirt or jacket on body",
    },
    EquipmentItem {
        name: "Safety Goggles",
        required: true,
        description: "Eye protection goggles",
        search_term: "glasses or sunglasses on face",
    },
    EquipmentItem {
        name: "Ear Protection",
        required: true,
        description: "Earplugs or earmuffs",
        search_term: "earbuds or headphones on ears",
    },
    EquipmentItem {
        name: "Respirator",
        required: true,
        description: "Respiratory protection mask",
        search_term: "mask covering mouth or nose",
    },
    EquipmentItem {
        name: "Safety Gloves",
        required: true,
        description: "Work gloves for hand protection",
        search_term: "gloves on hands",
    },
    EquipmentItem {
        name: "Safety Boots",
        required: true,
        description: "Steel toe or safety boots",
        search_term: "shoes or boots on feet",
    },
];

/// Prompt asking the vision service for a `PRESENT/CONFIDENCE/EXPLANATION`
/// reply about one item.
pub fn analysis_prompt(item: &EquipmentItem) -> String {
    format!(
        "Analyze this image carefully. Look for a full body view of a person and check if they are wearing {term}.\n\
         \n\
         Equipment to verify: {name}\n\
         What to look for: {term}\n\
         \n\
         Please respond in this exact format:\n\
         PRESENT: YES/NO\n\
         CONFIDENCE: 0-100\n\
         EXPLANATION: Brief description of what you see\n\
         \n\
         Focus on identifying if the person is wearing {term}. If you cannot see the full body or the relevant body part, respond with NO.",
        term = item.search_term,
        name = item.name,
    )
}

/// Parsed reply of the vision service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub is_present: bool,
    pub confidence: u8,
    pub explanation: String,
}

impl Detection {
    /// Lenient parse: a missing `PRESENT` line means not present, a missing
    /// or unreadable confidence falls back to 50, and a missing explanation
    /// to a generic one.
    pub fn parse(reply: &str) -> Self {
        let is_present = RE_PRESENT
            .captures(reply)
            .is_some_and(|c| c[1].eq_ignore_ascii_case("yes"));
        let confidence = RE_CONFIDENCE
            .captures(reply)
            .and_then(|c| c[1].parse::<u32>().ok())
            .map(|n| n.min(100) as u8)
            .unwrap_or(DEFAULT_CONFIDENCE);
        let explanation = RE_EXPLANATION
            .captures(reply)
            .map(|c| c[1].trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string());

        Self { is_present, confidence, explanation }
    }
}

/// Current time at the millisecond precision records are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl ScanResult {
    pub fn from_detection(item: &EquipmentItem, detection: Detection, image_data: Option<String>) -> Self {
        Self {
            id: generate_id("scan"),
            timestamp: now(),
            equipment_name: item.name.to_string(),
            is_present: detection.is_present,
            confidence: detection.confidence,
            image_data,
            analysis: detection.explanation,
            worker_name: None,
        }
    }

    /// Result recorded when the analysis call itself failed.
    pub fn failed(item: &EquipmentItem, reason: &str) -> Self {
        Self {
            id: generate_id("scan"),
            timestamp: now(),
            equipment_name: item.name.to_string(),
            is_present: false,
            confidence: 0,
            image_data: None,
            analysis: format!("Analysis failed: {reason}"),
            worker_name: None,
        }
    }
}

impl ScanSession {
    /// A session passes only if every checked item was detected.
    pub fn from_results(worker_name: Option<String>, results: Vec<ScanResult>, image_data: Option<String>) -> Self {
        let overall_passed = results.iter().all(|r| r.is_present);
        let timestamp = now();
        Self {
            id: format!("session_{}", timestamp.timestamp_millis()),
            timestamp,
            worker_name,
            results,
            overall_passed,
            image_data,
        }
    }
}
