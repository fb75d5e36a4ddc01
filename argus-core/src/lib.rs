//! argus-core: shared data model for argus
//!
//! Provides:
//! - Detection frames and detected objects as emitted by the inference service
//! - The single weapon classifier used by scoring, highlighting and alerts
//! - The post-session threat analysis report, parsed leniently at the boundary

pub mod error;
pub mod types;
pub mod classify;
pub mod report;

pub use error::{Error, Result};
pub use types::{BoundingBox, DetectedObject, DetectionFrame};
pub use classify::{is_dangerous_object, is_weapon_match};
pub use report::{RiskBreakdown, ThreatAnalysisReport, ThreatLevel};
