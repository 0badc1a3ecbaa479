use std::collections::BTreeMap;

use serde::Serialize;

use crate::annotate;
use crate::detections::{self, DetailedDetection};
use crate::detector::{DetectorHandle, InferOptions};
use crate::error::ServiceError;
use crate::frame;

/// Response body of the one-shot analysis endpoint.
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub status: &'static str,
    pub annotated_image_base64: Option<String>,
    pub class_counts: BTreeMap<String, usize>,
    pub detailed_detections: Vec<DetailedDetection>,
}

/// Run the full one-shot pipeline over an uploaded image.
///
/// Order matters: the detector state is checked before anything is decoded,
/// and a non-image declared content type is rejected before any processing.
/// There is no partial-result path; any later failure fails the request.
pub fn analyze(
    detector: &DetectorHandle,
    upload_bytes: &[u8],
    declared_content_type: Option<&str>,
) -> Result<AnalysisResponse, ServiceError> {
    let model = detector.get()?;

    let content_type = declared_content_type.unwrap_or("");
    if !content_type.starts_with("image/") {
        return Err(ServiceError::UnsupportedMediaType(content_type.to_string()));
    }

    let original = frame::decode_image(upload_bytes)?;

    let raw = model.infer(&original.to_rgb8(), InferOptions::ONE_SHOT)?;
    let result = detections::normalize(model.as_ref(), &raw);

    let annotated = annotate::draw_detections(&original, &result.detections);
    let annotated_image_base64 = annotate::encode_png_base64(&annotated)?;

    Ok(AnalysisResponse {
        status: "success",
        annotated_image_base64: Some(annotated_image_base64),
        class_counts: result.class_counts,
        detailed_detections: result.detections.iter().map(DetailedDetection::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;
    use crate::detector::testing::MockDetector;
    use crate::detector::RawDetection;

    fn png_bytes() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(40, 30));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn ready(mock: MockDetector) -> (DetectorHandle, Arc<MockDetector>) {
        let mock = Arc::new(mock);
        (DetectorHandle::Ready(mock.clone()), mock)
    }

    #[test]
    fn non_image_content_type_is_rejected_before_inference() {
        let (handle, mock) = ready(MockDetector::with_detections(&["Eritrocito"], vec![]));
        let err = analyze(&handle, &png_bytes(), Some("text/plain")).unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedMediaType(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn missing_content_type_is_rejected() {
        let (handle, _mock) = ready(MockDetector::with_detections(&[], vec![]));
        let err = analyze(&handle, &png_bytes(), None).unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedMediaType(_)));
    }

    #[test]
    fn unavailable_detector_fails_fast_without_decoding() {
        let handle = DetectorHandle::Failed;
        // Bytes that would fail decoding; the unavailability check runs first.
        let err = analyze(&handle, b"not an image", Some("image/png")).unwrap_err();
        assert!(matches!(err, ServiceError::ModelUnavailable));
    }

    #[test]
    fn undecodable_upload_is_a_server_error() {
        let (handle, mock) = ready(MockDetector::with_detections(&[], vec![]));
        let err = analyze(&handle, b"garbage", Some("image/png")).unwrap_err();
        assert!(matches!(err, ServiceError::FrameDecode(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn successful_analysis_has_consistent_counts_and_string_confidences() {
        let detections = vec![
            RawDetection {
                class_id: 0,
                confidence: 0.912,
                bbox: [1.2, 2.7, 10.1, 12.9],
            },
            RawDetection {
                class_id: 0,
                confidence: 0.5,
                bbox: [5.0, 5.0, 9.0, 9.0],
            },
            RawDetection {
                class_id: 3,
                confidence: 0.3,
                bbox: [0.0, 0.0, 4.0, 4.0],
            },
        ];
        let (handle, _mock) = ready(MockDetector::with_detections(&["Eritrocito"], detections));
        let response = analyze(&handle, &png_bytes(), Some("image/png")).unwrap();

        assert_eq!(response.status, "success");
        assert!(response.annotated_image_base64.is_some());
        let total: usize = response.class_counts.values().sum();
        assert_eq!(total, response.detailed_detections.len());
        assert_eq!(response.class_counts["Eritrocito"], 2);
        assert_eq!(response.class_counts["Clase_3"], 1);
        assert_eq!(response.detailed_detections[0].confianza, "0.91");
        assert_eq!(response.detailed_detections[0].bbox, [1, 3, 10, 13]);
    }

    #[test]
    fn inference_failure_fails_the_whole_request() {
        let (handle, _mock) = ready(MockDetector::failing("runtime exploded"));
        let err = analyze(&handle, &png_bytes(), Some("image/jpeg")).unwrap_err();
        assert!(matches!(err, ServiceError::Inference(_)));
    }
}
