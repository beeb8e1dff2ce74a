//! facegate-core — Face detection, emotion classification and image matching.
//!
//! Uses UltraFace for face detection and FER+ for emotion classification,
//! both running via ONNX Runtime for CPU inference. Registered faces are
//! compared against a live capture with the structural similarity index.

pub mod detector;
pub mod emotion;
pub mod similarity;
pub mod store;
pub mod types;

pub use detector::FaceDetector;
pub use emotion::EmotionClassifier;
pub use store::{EmotionStore, GestureIndex, GestureStore};
pub use types::{BoundingBox, Emotion, GalleryEntry, MatchResult, Matcher, SsimMatcher};

/// SSIM score a registered image must strictly exceed to be accepted.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;
