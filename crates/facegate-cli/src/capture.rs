//! The live capture loop: pull a frame, outline faces, show it, poll a key.

use anyhow::Result;
use facegate_core::{BoundingBox, FaceDetector};
use facegate_hw::frame::draw_rect;
use facegate_hw::{Frame, FrameStream};
use image::{Rgb, RgbImage};

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Keys the capture loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Save,
    Quit,
}

/// How a capture loop ended.
pub enum CaptureOutcome {
    /// The save key was pressed; carries the frame on screen at that moment.
    Saved(Frame),
    Quit,
    /// The camera stopped producing frames.
    SourceEnded,
}

/// Anything that yields camera frames until it can't.
pub trait FrameSource {
    fn pull(&mut self) -> Option<Frame>;
}

impl FrameSource for FrameStream<'_> {
    fn pull(&mut self) -> Option<Frame> {
        match self.next_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, "camera produced no frame; ending capture");
                None
            }
        }
    }
}

/// Finds faces to outline in the preview.
pub trait FaceLocator {
    fn locate(&mut self, image: &RgbImage) -> Vec<BoundingBox>;
}

impl FaceLocator for FaceDetector {
    fn locate(&mut self, image: &RgbImage) -> Vec<BoundingBox> {
        self.detect(image).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "face detection failed on frame");
            Vec::new()
        })
    }
}

impl<L: FaceLocator> FaceLocator for Option<L> {
    fn locate(&mut self, image: &RgbImage) -> Vec<BoundingBox> {
        match self {
            Some(locator) => locator.locate(image),
            None => Vec::new(),
        }
    }
}

/// Where frames are shown and keys come from.
pub trait Viewport {
    fn present(&mut self, title: &str, image: &RgbImage, faces: usize) -> Result<()>;
    /// Non-blocking key check.
    fn poll_key(&mut self) -> Result<Option<Key>>;
}

/// Run until the save or quit key is pressed or the source runs dry.
pub fn run_capture(
    source: &mut impl FrameSource,
    locator: &mut impl FaceLocator,
    viewport: &mut impl Viewport,
    title: &str,
) -> Result<CaptureOutcome> {
    loop {
        let Some(frame) = source.pull() else {
            tracing::debug!(title, "capture source ended");
            return Ok(CaptureOutcome::SourceEnded);
        };

        let faces = locator.locate(&frame.image);
        let preview = annotate(&frame.image, &faces);
        viewport.present(title, &preview, faces.len())?;

        match viewport.poll_key()? {
            Some(Key::Save) => {
                tracing::info!(title, sequence = frame.sequence, faces = faces.len(), "frame captured");
                return Ok(CaptureOutcome::Saved(frame));
            }
            Some(Key::Quit) => return Ok(CaptureOutcome::Quit),
            None => {}
        }
    }
}

/// Copy of `image` with a green box around every face.
pub fn annotate(image: &RgbImage, faces: &[BoundingBox]) -> RgbImage {
    let mut out = image.clone();
    // Thick enough to survive the downscale into terminal cells.
    let thickness = (image.width() / 160).max(2);
    for face in faces {
        draw_rect(
            &mut out,
            face.x.round() as i32,
            face.y.round() as i32,
            face.width.round().max(0.0) as u32,
            face.height.round().max(0.0) as u32,
            OVERLAY_COLOR,
            thickness,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedSource(VecDeque<Frame>);

    impl FrameSource for ScriptedSource {
        fn pull(&mut self) -> Option<Frame> {
            self.0.pop_front()
        }
    }

    struct FixedLocator(Vec<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _image: &RgbImage) -> Vec<BoundingBox> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingViewport {
        keys: VecDeque<Option<Key>>,
        shown: Vec<(RgbImage, usize)>,
    }

    impl Viewport for RecordingViewport {
        fn present(&mut self, _title: &str, image: &RgbImage, faces: usize) -> Result<()> {
            self.shown.push((image.clone(), faces));
            Ok(())
        }

        fn poll_key(&mut self) -> Result<Option<Key>> {
            Ok(self.keys.pop_front().flatten())
        }
    }

    fn frames(n: u32) -> ScriptedSource {
        ScriptedSource((0..n).map(|i| Frame::new(RgbImage::new(32, 24), i)).collect())
    }

    fn viewport(keys: &[Option<Key>]) -> RecordingViewport {
        RecordingViewport {
            keys: keys.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn face() -> BoundingBox {
        BoundingBox { x: 4.0, y: 4.0, width: 10.0, height: 10.0, confidence: 0.9 }
    }

    #[test]
    fn test_save_key_returns_current_frame() {
        let mut source = frames(5);
        let mut vp = viewport(&[None, None, Some(Key::Save)]);
        let outcome = run_capture(&mut source, &mut None::<FixedLocator>, &mut vp, "t").unwrap();

        match outcome {
            CaptureOutcome::Saved(frame) => assert_eq!(frame.sequence, 2),
            _ => panic!("expected a saved frame"),
        }
        assert_eq!(vp.shown.len(), 3);
    }

    #[test]
    fn test_quit_key() {
        let mut source = frames(5);
        let mut vp = viewport(&[None, Some(Key::Quit)]);
        let outcome = run_capture(&mut source, &mut None::<FixedLocator>, &mut vp, "t").unwrap();
        assert!(matches!(outcome, CaptureOutcome::Quit));
    }

    #[test]
    fn test_source_exhaustion_ends_quietly() {
        let mut source = frames(2);
        let mut vp = viewport(&[]);
        let outcome = run_capture(&mut source, &mut None::<FixedLocator>, &mut vp, "t").unwrap();
        assert!(matches!(outcome, CaptureOutcome::SourceEnded));
        assert_eq!(vp.shown.len(), 2);
    }

    #[test]
    fn test_overlay_shown_but_saved_frame_clean() {
        let mut source = frames(1);
        let mut locator = FixedLocator(vec![face()]);
        let mut vp = viewport(&[Some(Key::Save)]);
        let outcome = run_capture(&mut source, &mut locator, &mut vp, "t").unwrap();

        let (shown, faces) = &vp.shown[0];
        assert_eq!(*faces, 1);
        assert_eq!(shown.get_pixel(4, 4), &OVERLAY_COLOR);

        let CaptureOutcome::Saved(frame) = outcome else {
            panic!("expected a saved frame");
        };
        assert_eq!(frame.image.get_pixel(4, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_without_faces_is_identity() {
        let img = RgbImage::from_pixel(16, 16, Rgb([9, 9, 9]));
        assert_eq!(annotate(&img, &[]), img);
    }
}
