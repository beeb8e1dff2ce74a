//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the RFB-320 UltraFace model on a resized RGB frame and decodes its
//! per-prior face scores and normalized corner boxes, followed by NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ULTRAFACE_INPUT_WIDTH: u32 = 320;
const ULTRAFACE_INPUT_HEIGHT: u32 = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download version-RFB-320.onnx and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Output indices (scores, boxes), discovered by name at load time.
    output_indices: (usize, usize),
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded UltraFace model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "UltraFace output tensor mapping");

        Ok(Self {
            session,
            output_indices,
        })
    }

    /// Detect faces in an RGB frame, returning bounding boxes sorted by confidence.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let input = preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (scores_idx, boxes_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        if scores.len() / 2 != boxes.len() / 4 {
            return Err(DetectorError::InferenceFailed(format!(
                "prior count mismatch: {} scores vs {} boxes",
                scores.len() / 2,
                boxes.len() / 4
            )));
        }

        let detections = decode(scores, boxes, width, height, ULTRAFACE_CONFIDENCE_THRESHOLD);
        let mut result = nms(detections, ULTRAFACE_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::trace!(faces = result.len(), "detection finished");
        Ok(result)
    }
}

/// Resize an RGB frame to the UltraFace input size and normalize into a NCHW tensor.
fn preprocess(frame: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
        frame,
        ULTRAFACE_INPUT_WIDTH,
        ULTRAFACE_INPUT_HEIGHT,
        FilterType::Triangle,
    );

    let (w, h) = (ULTRAFACE_INPUT_WIDTH as usize, ULTRAFACE_INPUT_HEIGHT as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
        }
    }

    tensor
}

/// Map output names to (scores, boxes) indices, falling back to positional order.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");

    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(
                ?names,
                "UltraFace: output names not recognized, using positional mapping [0]=scores, [1]=boxes"
            );
            (0, 1)
        }
    }
}

/// Decode per-prior outputs into frame-space boxes.
///
/// `scores` holds `[background, face]` pairs; `boxes` holds normalized
/// `[x1, y1, x2, y2]` quadruples.
fn decode(scores: &[f32], boxes: &[f32], width: u32, height: u32, threshold: f32) -> Vec<BoundingBox> {
    let (fw, fh) = (width as f32, height as f32);
    let num_priors = (scores.len() / 2).min(boxes.len() / 4);

    let mut detections = Vec::new();

    for i in 0..num_priors {
        let score = scores[i * 2 + 1];
        if score <= threshold {
            continue;
        }

        let x1 = (boxes[i * 4] * fw).clamp(0.0, fw);
        let y1 = (boxes[i * 4 + 1] * fh).clamp(0.0, fh);
        let x2 = (boxes[i * 4 + 2] * fw).clamp(0.0, fw);
        let y2 = (boxes[i * 4 + 3] * fh).clamp(0.0, fh);

        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
