use crate::similarity;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Facial emotion classes produced by the FER+ classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Contempt,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl Emotion {
    pub const ALL: [Emotion; 8] = [
        Emotion::Angry,
        Emotion::Contempt,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Surprise,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Contempt => "contempt",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Neutral => "neutral",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown emotion label: {0:?}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// A registered gesture image, already decoded to grayscale.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub name: String,
    pub image: GrayImage,
}

/// Result of matching a live capture against the registered gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// SSIM score of the best candidate, 0.0 when nothing scored above zero.
    pub score: f32,
    /// Name of the matched entry (if any).
    pub name: Option<String>,
    /// Number of gallery entries that were actually scored.
    pub compared: usize,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            score: 0.0,
            name: None,
            compared: 0,
        }
    }
}

/// Strategy for comparing a probe image against a gallery of registered images.
pub trait Matcher {
    fn compare(&self, probe: &GrayImage, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// SSIM matcher.
///
/// Each gallery image is stretched to the probe's dimensions before scoring.
/// The best candidate must beat the previous best strictly, so the first of
/// several equal scores wins, and it must strictly exceed `threshold`.
pub struct SsimMatcher;

impl Matcher for SsimMatcher {
    fn compare(&self, probe: &GrayImage, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best_score = 0.0f32;
        let mut best_idx: Option<usize> = None;
        let mut compared = 0usize;

        for (i, entry) in gallery.iter().enumerate() {
            let score = match similarity::score_against(probe, &entry.image) {
                Ok(score) => score,
                Err(e) => {
                    tracing::warn!(name = %entry.name, error = %e, "skipping gallery entry");
                    continue;
                }
            };
            compared += 1;
            tracing::debug!(name = %entry.name, score, "ssim score");

            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }

        tracing::info!(best_score, compared, "gallery comparison finished");

        match best_idx {
            Some(idx) if best_score > threshold => MatchResult {
                matched: true,
                score: best_score,
                name: Some(gallery[idx].name.clone()),
                compared,
            },
            _ => MatchResult {
                matched: false,
                score: best_score,
                name: None,
                compared,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn pattern(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 37 + y * 91 + x * y) % 256) as u8]))
    }

    fn inverted(img: &GrayImage) -> GrayImage {
        GrayImage::from_fn(img.width(), img.height(), |x, y| Luma([255 - img.get_pixel(x, y)[0]]))
    }

    fn entry(name: &str, image: GrayImage) -> GalleryEntry {
        GalleryEntry { name: name.into(), image }
    }

    #[test]
    fn test_emotion_roundtrip_labels() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.as_str().parse::<Emotion>().unwrap(), emotion);
        }
        assert!("ecstatic".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_emotion_serializes_lowercase() {
        let json = serde_json::to_string(&Emotion::Happy).unwrap();
        assert_eq!(json, "\"happy\"");
    }

    #[test]
    fn test_bbox_area_clamps_negative() {
        let b = BoundingBox { x: 0.0, y: 0.0, width: -4.0, height: 10.0, confidence: 0.9 };
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn test_ssim_matcher_identical_image_matches() {
        let probe = pattern(48, 40);
        let gallery = vec![entry("frown", inverted(&probe)), entry("smile", probe.clone())];

        let result = SsimMatcher.compare(&probe, &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("smile"));
        assert!((result.score - 1.0).abs() < 1e-4);
        assert_eq!(result.compared, 2);
    }

    #[test]
    fn test_ssim_matcher_unrelated_image_rejected() {
        let probe = pattern(48, 40);
        let gallery = vec![entry("smile", inverted(&probe))];

        let result = SsimMatcher.compare(&probe, &gallery, 0.5);
        assert!(!result.matched);
        assert!(result.name.is_none());
        assert!(result.score <= 0.5);
    }

    #[test]
    fn test_ssim_matcher_first_seen_wins_ties() {
        let probe = pattern(32, 32);
        let gallery = vec![entry("first", probe.clone()), entry("second", probe.clone())];

        let result = SsimMatcher.compare(&probe, &gallery, 0.5);
        assert_eq!(result.name.as_deref(), Some("first"));
    }

    #[test]
    fn test_ssim_matcher_score_equal_to_threshold_rejected() {
        let probe = pattern(32, 32);
        let gallery = vec![entry("smile", probe.clone())];

        // Identical images score 1.0; a threshold of 1.0 must not accept it.
        let result = SsimMatcher.compare(&probe, &gallery, 1.0);
        assert!(!result.matched);
    }

    #[test]
    fn test_ssim_matcher_skips_unscorable_entries() {
        let probe = pattern(32, 32);
        // A 3x3 probe cannot hold a single 7x7 window.
        let tiny_probe = pattern(3, 3);
        let gallery = vec![entry("smile", probe.clone())];

        let result = SsimMatcher.compare(&tiny_probe, &gallery, 0.5);
        assert!(!result.matched);
        assert_eq!(result.compared, 0);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_ssim_matcher_empty_gallery() {
        let probe = pattern(16, 16);
        let result = SsimMatcher.compare(&probe, &[], 0.5);
        assert_eq!(result, MatchResult::no_match());
    }

    #[test]
    fn test_ssim_matcher_mismatched_aspect_does_not_fail() {
        let probe = pattern(64, 48);
        let stored = image::imageops::resize(&probe, 20, 50, image::imageops::FilterType::Triangle);
        let gallery = vec![entry("stretched", stored)];

        let result = SsimMatcher.compare(&probe, &gallery, 0.5);
        assert_eq!(result.compared, 1);
    }
}
