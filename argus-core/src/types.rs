//! Detection data model shared by the stream boundary, aggregator and scorer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixel coordinates.
///
/// Serialized as `[x1, y1, x2, y2]`. `x1 < x2` and `y1 < y2` are expected
/// but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Express the box as fractions of the frame it was detected in.
    ///
    /// Returns `None` when the frame has a zero dimension.
    pub fn normalized(&self, frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let w = frame_width as f32;
        let h = frame_height as f32;
        Some(BoundingBox {
            x1: self.x1 / w,
            y1: self.y1 / h,
            x2: self.x2 / w,
            y2: self.y2 / h,
        })
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(coords: [f32; 4]) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

/// One detection instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// Free-form label, compared case-insensitively
    pub class_name: String,
    /// Detector confidence in [0.0, 1.0]
    pub confidence: f64,
    pub bbox: BoundingBox,
}

impl DetectedObject {
    pub fn new(class_name: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }

    /// Normalized class name; two labels differing only in case share a key.
    pub fn class_key(&self) -> String {
        self.class_name.to_lowercase()
    }
}

/// One message from the detection stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    /// Detector emission order, not semantically significant
    pub objects: Vec<DetectedObject>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub frame_width: u32,
    #[serde(default)]
    pub frame_height: u32,
}

impl DetectionFrame {
    /// Parse one stream message.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::Deserialization(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
