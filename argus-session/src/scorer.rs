//! Threat scoring
//!
//! Two independent concerns: a memoryless live level computed from the latest
//! frame, and rendering of the analysis report returned after the session.

use argus_core::{is_weapon_match, DetectedObject, DetectionFrame, ThreatAnalysisReport, ThreatLevel};
use std::fmt::Write;

/// Live level for any frame containing a weapon match: critical, pending confirmation.
pub const WEAPON_THREAT_LEVEL: u8 = 92;

/// Live threat level in [0, 100] for one frame.
///
/// Any weapon match pins the level at [`WEAPON_THREAT_LEVEL`]; otherwise it is
/// the highest confidence in the frame as a percentage, or 0 for an empty frame.
pub fn live_threat_level(frame: &DetectionFrame) -> u8 {
    if frame.objects.iter().any(|obj| is_weapon_match(&obj.class_name)) {
        return WEAPON_THREAT_LEVEL;
    }

    let max = frame
        .objects
        .iter()
        .map(|obj| obj.confidence * 100.0)
        .fold(0.0_f64, f64::max);
    max.round().clamp(0.0, 100.0) as u8
}

/// Objects in the frame that get weapon highlighting.
pub fn weapon_alerts(frame: &DetectionFrame) -> Vec<&DetectedObject> {
    frame
        .objects
        .iter()
        .filter(|obj| is_weapon_match(&obj.class_name))
        .collect()
}

/// Alert banner text for a frame, if it contains weapon matches.
pub fn alert_banner(frame: &DetectionFrame) -> Option<String> {
    let alerts = weapon_alerts(frame);
    if alerts.is_empty() {
        return None;
    }
    let names: Vec<&str> = alerts.iter().map(|obj| obj.class_name.as_str()).collect();
    Some(format!("WEAPON DETECTED: {}", names.join(", ")))
}

/// Display styling for a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayTier {
    Critical,
    Warning,
    Nominal,
}

impl DisplayTier {
    pub fn for_level(level: &ThreatLevel) -> Self {
        match level {
            ThreatLevel::High => DisplayTier::Critical,
            ThreatLevel::Medium => DisplayTier::Warning,
            _ => DisplayTier::Nominal,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DisplayTier::Critical => "CRITICAL",
            DisplayTier::Warning => "WARNING",
            DisplayTier::Nominal => "NOMINAL",
        }
    }
}

/// Rendering model of a received report. Fields are shown verbatim.
#[derive(Debug, Clone, Copy)]
pub struct ReportView<'a> {
    report: &'a ThreatAnalysisReport,
    tier: DisplayTier,
}

impl<'a> ReportView<'a> {
    pub fn new(report: &'a ThreatAnalysisReport) -> Self {
        Self {
            report,
            tier: DisplayTier::for_level(&report.threat_level),
        }
    }

    pub fn tier(&self) -> DisplayTier {
        self.tier
    }

    pub fn report(&self) -> &'a ThreatAnalysisReport {
        self.report
    }

    pub fn render_text(&self) -> String {
        let r = self.report;
        let mut out = String::new();

        let level = if r.threat_level.as_str().is_empty() {
            "unknown"
        } else {
            r.threat_level.as_str()
        };
        let _ = writeln!(
            out,
            "[{}] Threat level: {} ({:.0}%)",
            self.tier.label(),
            level,
            r.threat_percentage
        );
        let _ = writeln!(
            out,
            "Risk breakdown: high {:.0}% / medium {:.0}% / low {:.0}%",
            r.risk_breakdown.high, r.risk_breakdown.medium, r.risk_breakdown.low
        );
        let _ = writeln!(out, "Flagged: {}", r.flagged_content);
        let _ = writeln!(out, "Keywords: {}", render_set(&r.detected_keywords));
        let _ = writeln!(out, "Summary: {}", r.summary);
        if r.recommendations.is_empty() {
            let _ = writeln!(out, "Recommendations: none");
        } else {
            let _ = writeln!(out, "Recommendations:");
            for (i, rec) in r.recommendations.iter().enumerate() {
                let _ = writeln!(out, "  {}. {}", i + 1, rec);
            }
        }
        out
    }
}

fn render_set(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
