//! Post-session threat analysis report
//!
//! The control service returns the report as loosely structured JSON. It is
//! parsed here once, at the boundary: every field has an explicit default so a
//! partial or malformed payload still yields a renderable report with nominal
//! severity instead of an error.

use crate::classify::is_dangerous_object;
use crate::error::{Error, Result};
use crate::types::DetectedObject;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Categorical threat level reported by the analysis service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    /// Anything else the service sent, kept verbatim (empty when missing)
    Unrecognized(String),
}

impl ThreatLevel {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low" => ThreatLevel::Low,
            "medium" => ThreatLevel::Medium,
            "high" => ThreatLevel::High,
            _ => ThreatLevel::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Unrecognized(raw) => raw,
        }
    }
}

impl Default for ThreatLevel {
    fn default() -> Self {
        ThreatLevel::Unrecognized(String::new())
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ThreatLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Risk split in percentages
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

/// Structured result of the end-session analysis. Immutable once received.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "JsonValue")]
pub struct ThreatAnalysisReport {
    pub threat_level: ThreatLevel,
    /// Clamped to [0, 100]
    pub threat_percentage: f64,
    pub risk_breakdown: RiskBreakdown,
    pub flagged_content: String,
    pub detected_keywords: Vec<String>,
    pub summary: String,
    pub recommendations: Vec<String>,
}

impl ThreatAnalysisReport {
    /// Parse a report payload. Only a non-object payload is rejected.
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidReport(format!("expected a JSON object, got {}", kind(value))))?;

        let threat_level = match obj.get("threat_level") {
            Some(JsonValue::String(s)) => ThreatLevel::parse(s),
            _ => ThreatLevel::default(),
        };

        let risk_breakdown = match obj.get("risk_breakdown") {
            Some(JsonValue::Object(breakdown)) => RiskBreakdown {
                high: percentage(breakdown, "high"),
                medium: percentage(breakdown, "medium"),
                low: percentage(breakdown, "low"),
            },
            _ => RiskBreakdown::default(),
        };

        Ok(Self {
            threat_level,
            threat_percentage: percentage(obj, "threat_percentage"),
            risk_breakdown,
            flagged_content: text(obj, "flagged_content"),
            detected_keywords: text_list(obj, "detected_keywords"),
            summary: text(obj, "summary"),
            recommendations: text_list(obj, "recommendations"),
        })
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        let value: JsonValue =
            serde_json::from_str(payload).map_err(|e| Error::Deserialization(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Build a report locally from the session's registry values.
    ///
    /// Dangerous objects drive the level to high at 20% per distinct object.
    pub fn heuristic(objects: &[DetectedObject]) -> Self {
        if objects.is_empty() {
            return Self {
                threat_level: ThreatLevel::Low,
                threat_percentage: 0.0,
                risk_breakdown: RiskBreakdown { high: 0.0, medium: 0.0, low: 100.0 },
                flagged_content: "No objects detected during the session.".to_string(),
                detected_keywords: Vec::new(),
                summary: "No threats detected in the video analysis session.".to_string(),
                recommendations: vec![
                    "Continue regular monitoring".to_string(),
                    "No immediate action required".to_string(),
                ],
            };
        }

        let keywords: Vec<String> = objects
            .iter()
            .filter(|obj| is_dangerous_object(&obj.class_name))
            .map(|obj| obj.class_name.clone())
            .collect();

        if keywords.is_empty() {
            return Self {
                threat_level: ThreatLevel::Low,
                threat_percentage: 0.0,
                risk_breakdown: RiskBreakdown { high: 0.0, medium: 0.0, low: 100.0 },
                flagged_content: "No dangerous objects detected.".to_string(),
                detected_keywords: Vec::new(),
                summary: "Low-risk situation based on detected objects.".to_string(),
                recommendations: vec![
                    "Continue monitoring".to_string(),
                    "No immediate action required".to_string(),
                ],
            };
        }

        let pct = (keywords.len() as f64 * 20.0).min(100.0);
        Self {
            threat_level: ThreatLevel::High,
            threat_percentage: pct,
            risk_breakdown: RiskBreakdown { high: pct, medium: 100.0 - pct, low: 0.0 },
            flagged_content: format!("Dangerous objects detected: {}.", keywords.join(", ")),
            summary: format!(
                "High-risk situation detected with {} dangerous objects.",
                keywords.len()
            ),
            detected_keywords: keywords,
            recommendations: vec![
                "Issue immediate alert: sharp weapon detected".to_string(),
                "Alert local law enforcement for potential threat".to_string(),
                "Discourage any approach: object could be concealed or used rapidly".to_string(),
            ],
        }
    }
}

impl TryFrom<JsonValue> for ThreatAnalysisReport {
    type Error = Error;

    fn try_from(value: JsonValue) -> Result<Self> {
        Self::from_value(&value)
    }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

// Numbers may arrive as JSON numbers or numeric strings ("45", "45%").
fn percentage(obj: &Map<String, JsonValue>, key: &str) -> f64 {
    let raw = match obj.get(key) {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => s.trim().trim_end_matches('%').trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_finite() {
        raw.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn text(obj: &Map<String, JsonValue>, key: &str) -> String {
    match obj.get(key) {
        Some(JsonValue::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn text_list(obj: &Map<String, JsonValue>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
