//! FER+ emotion classifier via ONNX Runtime.
//!
//! Classifies a detected face crop into one of eight emotions using the
//! `emotion-ferplus-8` model (64x64 grayscale input, unnormalized pixels).

use crate::detector::{DetectorError, FaceDetector};
use crate::types::{BoundingBox, Emotion};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FERPLUS_INPUT_SIZE: u32 = 64;

/// FER+ output order.
const FERPLUS_CLASSES: [Emotion; 8] = [
    Emotion::Neutral,
    Emotion::Happy,
    Emotion::Surprise,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Contempt,
];

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("model file not found: {0}; download emotion-ferplus-8.onnx and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Classified emotion with its softmax probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionScore {
    pub emotion: Emotion,
    pub probability: f32,
}

/// FER+-based emotion classifier.
pub struct EmotionClassifier {
    session: Session,
}

impl EmotionClassifier {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmotionError> {
        if !Path::new(model_path).exists() {
            return Err(EmotionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self { session })
    }

    /// Classify the emotion of one detected face in an RGB frame.
    pub fn classify(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<EmotionScore, EmotionError> {
        let crop = crop_face(frame, face).ok_or(EmotionError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmotionError::InferenceFailed(format!("logits: {e}")))?;

        if logits.len() != FERPLUS_CLASSES.len() {
            return Err(EmotionError::InferenceFailed(format!(
                "expected {} logits, got {}",
                FERPLUS_CLASSES.len(),
                logits.len()
            )));
        }

        Ok(postprocess(logits))
    }
}

/// Detect faces and classify the emotion of the most confident one.
pub fn dominant_emotion(
    detector: &mut FaceDetector,
    classifier: &mut EmotionClassifier,
    frame: &RgbImage,
) -> Result<EmotionScore, EmotionError> {
    let faces = detector.detect(frame)?;
    let face = faces.first().ok_or(EmotionError::NoFaceDetected)?;

    let score = classifier.classify(frame, face)?;
    tracing::info!(
        emotion = %score.emotion,
        probability = score.probability,
        confidence = face.confidence,
        "dominant emotion"
    );
    Ok(score)
}

/// Crop the face box out of the frame as grayscale, clamped to the frame.
fn crop_face(frame: &RgbImage, face: &BoundingBox) -> Option<GrayImage> {
    let (fw, fh) = frame.dimensions();
    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(fw);
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(fh);

    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let rgb = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(image::DynamicImage::ImageRgb8(rgb).into_luma8())
}

/// Resize a grayscale crop to 64x64 and lay it out as a `[1, 1, 64, 64]` tensor.
fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let resized = imageops::resize(crop, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE, FilterType::Triangle);
    let size = FERPLUS_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
    }

    tensor
}

/// Softmax over the logits and pick the most probable class.
fn postprocess(logits: &[f32]) -> EmotionScore {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    let (best, best_exp) = exps
        .iter()
        .copied()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |acc, (i, e)| if e > acc.1 { (i, e) } else { acc });

    EmotionScore {
        emotion: FERPLUS_CLASSES[best],
        probability: if sum > 0.0 { best_exp / sum } else { 0.0 },
    }
}
