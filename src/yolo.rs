use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use ndarray::{Array4, ArrayViewD, CowArray};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use tracing::warn;

use crate::detector::{Detect, InferOptions, RawDetection};
use crate::error::ServiceError;

/// ONNX-backed YOLO detector.
///
/// The session is shared by every connection; ort sessions are not assumed
/// reentrant, so `run` calls are serialized behind the mutex.
pub struct YoloModel {
    session: Mutex<Session>,
    labels: BTreeMap<usize, String>,
}

impl YoloModel {
    /// Load the exported model and its class-label table.
    ///
    /// Labels come from the ultralytics `names` metadata embedded in the ONNX
    /// file, or from an explicit JSON label file when one is configured.
    pub fn load(model_path: &Path, labels_path: Option<&Path>) -> Result<Self> {
        let session = SessionBuilder::new()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model from {}", model_path.display()))?;

        let labels = match labels_path {
            Some(path) => load_label_file(path)?,
            None => session
                .metadata()
                .ok()
                .and_then(|metadata| metadata.custom("names").ok().flatten())
                .map(|raw| parse_names_metadata(&raw))
                .unwrap_or_default(),
        };
        if labels.is_empty() {
            warn!("no class-label table found; detections will use the Clase_<id> fallback");
        }

        Ok(YoloModel {
            session: Mutex::new(session),
            labels,
        })
    }
}

impl Detect for YoloModel {
    fn class_label(&self, id: usize) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    fn infer(&self, image: &RgbImage, opts: InferOptions) -> Result<Vec<RawDetection>, ServiceError> {
        let tensor = preprocess(image, opts.mode.input_side());
        let input = CowArray::from(tensor.into_dyn());
        let input_values =
            ort::inputs![input.view()].map_err(|err| ServiceError::Inference(err.to_string()))?;

        let session = self
            .session
            .lock()
            .map_err(|_| ServiceError::Inference("detector session mutex poisoned".into()))?;
        let outputs = session
            .run(input_values)
            .map_err(|err| ServiceError::Inference(err.to_string()))?;
        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| ServiceError::Inference("detector produced no outputs".into()))?;
        let predictions = value
            .try_extract_tensor::<f32>()
            .map_err(|err| ServiceError::Inference(err.to_string()))?
            .into_owned();

        parse_predictions(predictions.view(), image.width(), image.height(), opts)
    }
}

fn load_label_file(path: &Path) -> Result<BTreeMap<usize, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label file {}", path.display()))?;
    let names: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("label file {} is not a JSON array of strings", path.display()))?;
    Ok(names.into_iter().enumerate().collect())
}

/// Parse the ultralytics `names` metadata value, a Python dict literal such as
/// `{0: 'Eritrocito', 1: 'Leucocito'}`. Labels may contain any character
/// except their own quote, so entries are walked rather than split on commas.
fn parse_names_metadata(raw: &str) -> BTreeMap<usize, String> {
    let mut table = BTreeMap::new();
    let mut rest = raw;
    while let Some(start) = rest.find(|c: char| c.is_ascii_digit()) {
        rest = &rest[start..];
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let Ok(id) = rest[..digits_end].parse::<usize>() else {
            break;
        };
        rest = rest[digits_end..].trim_start();
        let Some(after_colon) = rest.strip_prefix(':') else {
            break;
        };
        rest = after_colon.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            break;
        };
        rest = &rest[1..];
        let Some(end) = rest.find(quote) else {
            break;
        };
        table.insert(id, rest[..end].to_string());
        rest = &rest[end + 1..];
    }
    table
}

/// Resize to the model input square and normalize RGB to CHW float planes.
fn preprocess(image: &RgbImage, side: u32) -> Array4<f32> {
    let resized = imageops::resize(image, side, side, imageops::FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, side as usize, side as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }
    tensor
}

/// Decode a `[1, 4 + num_classes, anchors]` prediction tensor into detections
/// in the analyzed image's pixel space, then suppress overlaps per class.
fn parse_predictions(
    output: ArrayViewD<'_, f32>,
    image_width: u32,
    image_height: u32,
    opts: InferOptions,
) -> Result<Vec<RawDetection>, ServiceError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(ServiceError::Inference(format!(
            "unexpected detector output shape: {shape:?}"
        )));
    }
    let num_classes = shape[1] - 4;
    let side = opts.mode.input_side() as f32;
    let scale_x = image_width as f32 / side;
    let scale_y = image_height as f32 / side;

    let mut candidates = Vec::new();
    for anchor in 0..shape[2] {
        let mut best_class = 0usize;
        let mut best_score = 0.0f32;
        for class in 0..num_classes {
            let score = output[[0, 4 + class, anchor]];
            if score > best_score {
                best_class = class;
                best_score = score;
            }
        }
        if best_score < opts.confidence {
            continue;
        }

        let cx = output[[0, 0, anchor]];
        let cy = output[[0, 1, anchor]];
        let w = output[[0, 2, anchor]];
        let h = output[[0, 3, anchor]];
        let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, image_width as f32);
        let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, image_height as f32);
        let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, image_width as f32);
        let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, image_height as f32);

        candidates.push(RawDetection {
            class_id: best_class,
            confidence: best_score,
            bbox: [x1, y1, x2, y2],
        });
    }

    Ok(non_maximum_suppression(candidates, opts.iou))
}

/// Greedy per-class NMS: keep the highest-confidence box, drop same-class
/// boxes overlapping it beyond the threshold, repeat.
fn non_maximum_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept = Vec::new();
    while !candidates.is_empty() {
        let best = candidates.remove(0);
        candidates.retain(|other| {
            other.class_id != best.class_id || iou(&best.bbox, &other.bbox) < iou_threshold
        });
        kept.push(best);
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
