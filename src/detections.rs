use std::collections::BTreeMap;

use serde::Serialize;

use crate::detector::{Detect, RawDetection};

/// One normalized detection. Coordinates are rounded to the nearest integer
/// pixel of the analyzed (possibly downsampled) image; the confidence keeps
/// full precision until serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: [i32; 4],
}

/// Canonical result of one inference pass.
///
/// `class_counts` is derived from `detections` in the same pass and never
/// mutated independently; `sum(class_counts.values()) == detections.len()`
/// holds for every result.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub class_counts: BTreeMap<String, usize>,
}

/// Convert raw detector output into the canonical form.
///
/// A class id outside the label table gets a synthesized `Clase_<id>` label
/// rather than failing the batch; detector output order is preserved.
pub fn normalize(detector: &dyn Detect, raw: &[RawDetection]) -> DetectionResult {
    let mut detections = Vec::with_capacity(raw.len());
    let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();

    for detection in raw {
        let label = match detector.class_label(detection.class_id) {
            Some(name) => name.to_string(),
            None => format!("Clase_{}", detection.class_id),
        };
        *class_counts.entry(label.clone()).or_insert(0) += 1;
        detections.push(Detection {
            label,
            confidence: detection.confidence,
            bbox: detection.bbox.map(|coord| coord.round() as i32),
        });
    }

    DetectionResult {
        detections,
        class_counts,
    }
}

/// Wire form used by the one-shot response: confidence as a fixed 2-decimal
/// string, matching the original service output.
#[derive(Debug, Serialize)]
pub struct DetailedDetection {
    pub clase: String,
    pub confianza: String,
    pub bbox: [i32; 4],
}

impl From<&Detection> for DetailedDetection {
    fn from(detection: &Detection) -> Self {
        DetailedDetection {
            clase: detection.label.clone(),
            confianza: format!("{:.2}", detection.confidence),
            bbox: detection.bbox,
        }
    }
}

/// Wire form used by the streaming path: confidence rounded to 2 decimals but
/// kept numeric. The asymmetry with [`DetailedDetection`] is intentional.
#[derive(Debug, Serialize)]
pub struct StreamDetection {
    pub clase: String,
    pub confianza: f32,
    pub bbox: [i32; 4],
}

impl From<&Detection> for StreamDetection {
    fn from(detection: &Detection) -> Self {
        StreamDetection {
            clase: detection.label.clone(),
            confianza: (detection.confidence * 100.0).round() / 100.0,
            bbox: detection.bbox,
        }
    }
}

/// One JSON message sent back per streamed frame.
#[derive(Debug, Serialize)]
pub struct StreamMessage {
    pub detections: Vec<StreamDetection>,
}

impl From<&DetectionResult> for StreamMessage {
    fn from(result: &DetectionResult) -> Self {
        StreamMessage {
            detections: result.detections.iter().map(StreamDetection::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::testing::MockDetector;

    fn raw(class_id: usize, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox,
        }
    }

    #[test]
    fn class_counts_sum_to_detection_count() {
        let detector = MockDetector::with_detections(&["Eritrocito", "Leucocito"], vec![]);
        let result = normalize(
            &detector,
            &[
                raw(0, 0.9, [1.0, 2.0, 3.0, 4.0]),
                raw(1, 0.8, [5.0, 6.0, 7.0, 8.0]),
                raw(0, 0.7, [9.0, 10.0, 11.0, 12.0]),
            ],
        );
        let total: usize = result.class_counts.values().sum();
        assert_eq!(total, result.detections.len());
        assert_eq!(result.class_counts["Eritrocito"], 2);
        assert_eq!(result.class_counts["Leucocito"], 1);
    }

    #[test]
    fn unknown_class_id_gets_fallback_label_without_dropping_the_batch() {
        let detector = MockDetector::with_detections(&["Eritrocito"], vec![]);
        let result = normalize(
            &detector,
            &[
                raw(0, 0.9, [0.0, 0.0, 1.0, 1.0]),
                raw(7, 0.6, [2.0, 2.0, 3.0, 3.0]),
            ],
        );
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.detections[1].label, "Clase_7");
        assert_eq!(result.class_counts["Clase_7"], 1);
    }

    #[test]
    fn bbox_coordinates_round_to_nearest_pixel() {
        let detector = MockDetector::with_detections(&["Eritrocito"], vec![]);
        let result = normalize(&detector, &[raw(0, 0.5, [10.4, 10.5, 99.6, 100.49])]);
        assert_eq!(result.detections[0].bbox, [10, 11, 100, 100]);
    }

    #[test]
    fn detector_output_order_is_preserved() {
        let detector = MockDetector::with_detections(&["a", "b", "c"], vec![]);
        let result = normalize(
            &detector,
            &[
                raw(2, 0.3, [0.0; 4]),
                raw(0, 0.9, [0.0; 4]),
                raw(1, 0.6, [0.0; 4]),
            ],
        );
        let labels: Vec<_> = result.detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, ["c", "a", "b"]);
    }

    #[test]
    fn one_shot_confidence_is_a_two_decimal_string() {
        let detection = Detection {
            label: "Eritrocito".into(),
            confidence: 0.8567,
            bbox: [1, 2, 3, 4],
        };
        let wire = DetailedDetection::from(&detection);
        assert_eq!(wire.confianza, "0.86");
    }

    #[test]
    fn streaming_confidence_is_a_rounded_float() {
        let detection = Detection {
            label: "Eritrocito".into(),
            confidence: 0.8567,
            bbox: [1, 2, 3, 4],
        };
        let wire = StreamDetection::from(&detection);
        assert!((wire.confianza - 0.86).abs() < 1e-6);
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json["confianza"].is_number());
    }
}
