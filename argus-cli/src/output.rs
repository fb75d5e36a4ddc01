// Terminal output for session events and reports

use argus_core::{DetectedObject, DetectionFrame, ThreatAnalysisReport};
use argus_session::{alert_banner, FailureKind, Registry, ReportView, SessionEvent};
use serde_json::json;

pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => {
                if self.json {
                    self.line(json!({"event": "state", "from": from.as_str(), "to": to.as_str()}));
                } else {
                    println!("session {} -> {}", from, to);
                }
            }
            SessionEvent::FrameProcessed { frame, live_threat_level, registry_size, .. } => {
                self.frame(frame, *live_threat_level, Some(*registry_size));
            }
            SessionEvent::FrameDropped { reason } => {
                if self.json {
                    self.line(json!({"event": "frame_dropped", "reason": reason}));
                } else {
                    println!("frame dropped: {}", reason);
                }
            }
            SessionEvent::ReportReady(report) => self.report(report),
            SessionEvent::Failure { kind, message } => {
                let kind = match kind {
                    FailureKind::Transport => "transport",
                    FailureKind::Control => "control",
                };
                if self.json {
                    self.line(json!({"event": "failure", "kind": kind, "message": message}));
                } else {
                    eprintln!("{} failure: {}", kind, message);
                }
            }
        }
    }

    pub fn frame(&self, frame: &DetectionFrame, live_threat_level: u8, registry_size: Option<usize>) {
        let banner = alert_banner(frame);
        if self.json {
            self.line(json!({
                "event": "frame",
                "live_threat_level": live_threat_level,
                "objects": frame_objects(frame),
                "alert": banner,
                "registry_size": registry_size,
            }));
            return;
        }

        let objects: Vec<String> = frame.objects.iter().map(describe).collect();
        let objects = if objects.is_empty() {
            "-".to_string()
        } else {
            objects.join(", ")
        };
        match banner {
            Some(banner) => println!("[{:>3}] {} | {}", live_threat_level, objects, banner),
            None => println!("[{:>3}] {}", live_threat_level, objects),
        }
    }

    pub fn registry(&self, registry: &Registry) {
        if self.json {
            self.line(json!({"event": "registry", "objects": registry.values()}));
            return;
        }
        println!("Registry ({} classes):", registry.len());
        for obj in registry.iter() {
            println!("  {}", describe(obj));
        }
    }

    pub fn report(&self, report: &ThreatAnalysisReport) {
        if self.json {
            self.line(json!({"event": "report", "report": report}));
        } else {
            print!("{}", ReportView::new(report).render_text());
        }
    }

    fn line(&self, value: serde_json::Value) {
        println!("{}", value);
    }
}

// Boxes are also given as fractions of the frame size the detector reported.
fn frame_objects(frame: &DetectionFrame) -> Vec<serde_json::Value> {
    frame
        .objects
        .iter()
        .map(|obj| {
            json!({
                "class_name": obj.class_name,
                "confidence": obj.confidence,
                "bbox": obj.bbox,
                "size": [obj.bbox.width(), obj.bbox.height()],
                "normalized_bbox": obj.bbox.normalized(frame.frame_width, frame.frame_height),
            })
        })
        .collect()
}

fn describe(obj: &DetectedObject) -> String {
    format!("{} ({:.2})", obj.class_name, obj.confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::BoundingBox;

    fn frame(width: u32, height: u32) -> DetectionFrame {
        DetectionFrame {
            objects: vec![DetectedObject::new("knife", 0.8, BoundingBox::new(64.0, 48.0, 320.0, 240.0))],
            timestamp: String::new(),
            frame_width: width,
            frame_height: height,
        }
    }

    fn coords(value: &serde_json::Value) -> Vec<f64> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_default()
    }

    fn assert_close(actual: Vec<f64>, expected: [f64; 4]) {
        assert_eq!(actual.len(), 4);
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_frame_objects_use_reported_frame_size() {
        let objects = frame_objects(&frame(640, 480));
        assert_close(coords(&objects[0]["bbox"]), [64.0, 48.0, 320.0, 240.0]);
        assert_eq!(objects[0]["size"], json!([256.0, 192.0]));
        assert_close(coords(&objects[0]["normalized_bbox"]), [0.1, 0.1, 0.5, 0.5]);

        let objects = frame_objects(&frame(1280, 960));
        assert_close(coords(&objects[0]["normalized_bbox"]), [0.05, 0.05, 0.25, 0.25]);
    }

    #[test]
    fn test_frame_objects_without_frame_size() {
        let objects = frame_objects(&frame(0, 0));
        assert!(objects[0]["normalized_bbox"].is_null());
        assert_eq!(objects[0]["class_name"], "knife");
    }
}
