use std::sync::Arc;

use image::RgbImage;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ServiceError;
use crate::yolo::YoloModel;

/// Inference input resolution, chosen per call.
///
/// Streaming forces the low-latency mode to bound per-frame cost; the one-shot
/// path always runs at the standard resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Standard,
    LowLatency,
}

impl ExecutionMode {
    /// Side length of the square tensor fed to the model.
    pub fn input_side(self) -> u32 {
        match self {
            ExecutionMode::Standard => 640,
            ExecutionMode::LowLatency => 320,
        }
    }
}

/// Per-call inference parameters. The handle holds no implicit per-call
/// configuration beyond the loaded weights and label table.
#[derive(Debug, Clone, Copy)]
pub struct InferOptions {
    pub confidence: f32,
    pub iou: f32,
    pub mode: ExecutionMode,
}

impl InferOptions {
    /// Standard thresholds used by the one-shot analysis pipeline.
    pub const ONE_SHOT: InferOptions = InferOptions {
        confidence: 0.25,
        iou: 0.7,
        mode: ExecutionMode::Standard,
    };

    /// Streaming thresholds: stricter confidence, looser IoU, low-cost mode.
    pub const STREAMING: InferOptions = InferOptions {
        confidence: 0.5,
        iou: 0.5,
        mode: ExecutionMode::LowLatency,
    };
}

/// One raw detection as produced by the model, in pixel coordinates of the
/// analyzed (possibly downsampled) image.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    /// (x1, y1, x2, y2)
    pub bbox: [f32; 4],
}

/// The detection capability both pipelines run against.
///
/// Implemented by [`YoloModel`] in production; tests inject mocks through the
/// same seam.
pub trait Detect: Send + Sync {
    /// Resolve a class id to its label, if the table knows it.
    fn class_label(&self, id: usize) -> Option<&str>;

    /// Run one inference pass over a decoded RGB image.
    fn infer(&self, image: &RgbImage, opts: InferOptions) -> Result<Vec<RawDetection>, ServiceError>;
}

/// Process-wide detector handle, loaded once at startup.
///
/// Once `Failed` it never transitions back; every pipeline checks the state
/// first and fails fast instead of attempting inference.
#[derive(Clone)]
pub enum DetectorHandle {
    Ready(Arc<dyn Detect>),
    Failed,
}

impl DetectorHandle {
    /// Load the model exactly once. A load failure degrades the service to
    /// "detector unavailable" instead of aborting startup.
    pub fn load(config: &Config) -> DetectorHandle {
        match YoloModel::load(&config.model, config.labels.as_deref()) {
            Ok(model) => {
                info!(model = %config.model.display(), "detection model loaded");
                let handle = DetectorHandle::Ready(Arc::new(model));
                handle.self_check();
                handle
            }
            Err(err) => {
                error!(model = %config.model.display(), "failed to load detection model: {err:#}");
                DetectorHandle::Failed
            }
        }
    }

    /// Run one inference on a blank synthetic image to confirm operability.
    /// A self-check failure is logged but does not fail startup; load success
    /// and self-check success are independent signals.
    fn self_check(&self) {
        if let DetectorHandle::Ready(model) = self {
            let blank = RgbImage::new(64, 64);
            match model.infer(&blank, InferOptions::ONE_SHOT) {
                Ok(detections) => {
                    info!(detections = detections.len(), "detector self-check passed")
                }
                Err(err) => warn!("detector self-check failed: {err}"),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DetectorHandle::Ready(_))
    }

    /// The loaded capability, or `ModelUnavailable` when the handle never
    /// reached `Ready`.
    pub fn get(&self) -> Result<&Arc<dyn Detect>, ServiceError> {
        match self {
            DetectorHandle::Ready(model) => Ok(model),
            DetectorHandle::Failed => Err(ServiceError::ModelUnavailable),
        }
    }
}
