//! Detection aggregation
//!
//! The registry maps each normalized class name to the single highest-confidence
//! detection seen for it in the current session. It only grows while a session
//! is active and is reset when a new session starts.

use crate::error::SessionError;
use argus_core::{DetectedObject, DetectionFrame};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Deduplicated, confidence-maximal accumulation of a session's detections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    entries: BTreeMap<String, DetectedObject>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a class; the name is matched case-insensitively.
    pub fn get(&self, class_name: &str) -> Option<&DetectedObject> {
        self.entries.get(&class_name.to_lowercase())
    }

    /// Normalized class keys in sorted order
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectedObject> {
        self.entries.values()
    }

    /// Entries sorted by class key, as sent to the control service
    pub fn values(&self) -> Vec<DetectedObject> {
        self.entries.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Offer one detection; returns true when it was inserted or upgraded.
    fn offer(&mut self, object: &DetectedObject) -> bool {
        let key = object.class_key();
        match self.entries.get(&key) {
            Some(existing) if !outranks(object.confidence, existing.confidence) => false,
            _ => {
                self.entries.insert(key, object.clone());
                true
            }
        }
    }
}

// Strictly higher wins, so ties keep the earlier detection. A NaN entry never
// blocks a real confidence.
fn outranks(candidate: f64, existing: f64) -> bool {
    candidate > existing || (existing.is_nan() && !candidate.is_nan())
}

/// Merge a frame into the registry in place.
///
/// Returns the number of entries inserted or upgraded. Objects are examined in
/// frame order, so duplicates within one frame resolve the same way as across
/// frames.
pub fn merge_into(registry: &mut Registry, frame: &DetectionFrame) -> usize {
    frame.objects.iter().filter(|obj| registry.offer(obj)).count()
}

/// Pure merge: `registry` is left untouched and the merged registry returned.
pub fn merge(registry: &Registry, frame: &DetectionFrame) -> Registry {
    let mut merged = registry.clone();
    merge_into(&mut merged, frame);
    merged
}

/// Latest-frame view plus the session registry
#[derive(Debug, Default)]
pub struct Aggregator {
    registry: Registry,
    latest: Option<DetectionFrame>,
    frames_processed: u64,
    frames_dropped: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a parsed frame and make it the latest view.
    pub fn ingest(&mut self, frame: DetectionFrame) -> usize {
        let upgraded = merge_into(&mut self.registry, &frame);
        self.frames_processed += 1;
        debug!(
            "Frame {} merged: {} objects, {} registry updates, {} classes",
            self.frames_processed,
            frame.objects.len(),
            upgraded,
            self.registry.len()
        );
        self.latest = Some(frame);
        upgraded
    }

    /// Parse and ingest one stream message.
    ///
    /// A message that does not parse is counted and discarded; nothing else
    /// changes.
    pub fn ingest_message(&mut self, payload: &str) -> Result<usize, SessionError> {
        match DetectionFrame::parse(payload) {
            Ok(frame) => Ok(self.ingest(frame)),
            Err(e) => Err(self.reject(&e.to_string())),
        }
    }

    /// Count and log a payload that never became a frame.
    pub fn reject(&mut self, reason: &str) -> SessionError {
        self.frames_dropped += 1;
        warn!("Dropping malformed detection frame: {}", reason);
        SessionError::Protocol(reason.to_string())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn latest(&self) -> Option<&DetectionFrame> {
        self.latest.as_ref()
    }

    pub fn clear_latest(&mut self) {
        self.latest = None;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Empty everything for a new session.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.latest = None;
        self.frames_processed = 0;
        self.frames_dropped = 0;
    }
}
