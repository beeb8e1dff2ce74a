//! Flat-file registration store.
//!
//! Gesture registrations live in a JSON object mapping each name to the path
//! of its saved image; the emotion registration is a single JSON record.
//! Both files are loaded at the start of an operation and rewritten in full
//! on every registration.

use crate::similarity::to_gray;
use crate::types::{Emotion, GalleryEntry, MatchResult, Matcher, SsimMatcher};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("registration name must not be empty")]
    EmptyName,
    #[error("index {path} is malformed: {reason}")]
    MalformedIndex { path: String, reason: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write JSON with 4-space indentation.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    fs::write(path, buf).map_err(io_err(path))
}

/// Name → image path mapping, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureIndex {
    entries: Vec<(String, PathBuf)>,
}

impl GestureIndex {
    /// Load the index, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(io_err(path)(e)),
        };

        let map: Map<String, Value> = serde_json::from_str(&raw)?;
        let mut entries = Vec::with_capacity(map.len());
        for (name, value) in map {
            let Value::String(image_path) = value else {
                return Err(StoreError::MalformedIndex {
                    path: path.display().to_string(),
                    reason: format!("entry {name:?} is not a path string"),
                });
            };
            entries.push((name, PathBuf::from(image_path)));
        }

        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(name, p)| (name.clone(), Value::String(p.to_string_lossy().into_owned())))
            .collect();
        write_json(path, &map)
    }

    /// Map `name` to `image_path`, returning the previous path.
    ///
    /// An existing name keeps its position.
    pub fn insert(&mut self, name: &str, image_path: PathBuf) -> Option<PathBuf> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, image_path)),
            None => {
                self.entries.push((name.to_string(), image_path));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_path())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Gesture registrations: an index file plus a directory of saved images.
#[derive(Debug, Clone)]
pub struct GestureStore {
    index_path: PathBuf,
    image_dir: PathBuf,
}

impl GestureStore {
    pub fn new(index_path: impl Into<PathBuf>, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            image_dir: image_dir.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn index(&self) -> Result<GestureIndex, StoreError> {
        GestureIndex::load(&self.index_path)
    }

    /// Save `frame` as `<image_dir>/<name>.jpg` and point `name` at it,
    /// replacing any earlier registration under the same name.
    pub fn register(&self, name: &str, frame: &RgbImage) -> Result<PathBuf, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }

        // A malformed index must fail before any earlier image is replaced.
        let mut index = self.index()?;

        fs::create_dir_all(&self.image_dir).map_err(io_err(&self.image_dir))?;
        let image_path = self.image_dir.join(format!("{name}.jpg"));
        frame.save(&image_path)?;

        if let Some(previous) = index.insert(name, image_path.clone()) {
            tracing::info!(name, previous = %previous.display(), "overwriting registration");
        }
        index.save(&self.index_path)?;

        tracing::info!(name, path = %image_path.display(), "gesture registered");
        Ok(image_path)
    }

    /// Load every registered image as grayscale, in index order.
    ///
    /// Entries whose file is missing or cannot be decoded are skipped with a
    /// warning.
    pub fn load_gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let index = self.index()?;
        let mut gallery = Vec::with_capacity(index.len());

        for (name, path) in index.iter() {
            if !path.exists() {
                tracing::warn!(name, path = %path.display(), "registered image does not exist");
                continue;
            }
            match image::open(path) {
                Ok(img) => gallery.push(GalleryEntry {
                    name: name.to_string(),
                    image: to_gray(&img.into_rgb8()),
                }),
                Err(e) => {
                    tracing::warn!(name, path = %path.display(), error = %e, "unable to load registered image");
                }
            }
        }

        Ok(gallery)
    }

    /// Compare a live grayscale capture against every registered image.
    pub fn compare(&self, probe: &GrayImage, threshold: f32) -> Result<MatchResult, StoreError> {
        let gallery = self.load_gallery()?;
        Ok(SsimMatcher.compare(probe, &gallery, threshold))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmotionRecord {
    registered_emotion: Emotion,
}

/// The single registered emotion.
#[derive(Debug, Clone)]
pub struct EmotionStore {
    path: PathBuf,
}

impl EmotionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn register(&self, emotion: Emotion) -> Result<(), StoreError> {
        write_json(&self.path, &EmotionRecord { registered_emotion: emotion })?;
        tracing::info!(%emotion, "emotion registered");
        Ok(())
    }

    /// The registered emotion, or `None` if nothing has been registered.
    pub fn registered(&self) -> Result<Option<Emotion>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let record: EmotionRecord = serde_json::from_str(&raw)?;
                Ok(Some(record.registered_emotion))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&self.path)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use tempfile::TempDir;

    /// Smooth pattern that survives JPEG compression.
    fn frame(phase: u32) -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| {
            let fx = (x + phase) as f32 / 6.0;
            let fy = y as f32 / 5.0;
            let v = (128.0 + 100.0 * fx.sin() * fy.cos()) as u8;
            Rgb([v, v, v])
        })
    }

    fn store(dir: &TempDir) -> GestureStore {
        GestureStore::new(dir.path().join("gestures.json"), dir.path().join("registered_gestures"))
    }

    #[test]
    fn test_index_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = GestureIndex::load(&dir.path().join("absent.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_index_overwrite_keeps_position() {
        let mut index = GestureIndex::default();
        assert!(index.insert("smile", "a.jpg".into()).is_none());
        assert!(index.insert("wink", "b.jpg".into()).is_none());
        let prev = index.insert("smile", "c.jpg".into());

        assert_eq!(prev, Some(PathBuf::from("a.jpg")));
        let names: Vec<_> = index.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["smile", "wink"]);
        assert_eq!(index.get("smile"), Some(Path::new("c.jpg")));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_index_save_load_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gestures.json");
        let mut index = GestureIndex::default();
        for name in ["zeta", "alpha", "mid"] {
            index.insert(name, format!("{name}.jpg").into());
        }
        index.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n    \"zeta\": \"zeta.jpg\""), "{raw}");

        let loaded = GestureIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_index_rejects_non_string_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gestures.json");
        fs::write(&path, r#"{"smile": 3}"#).unwrap();
        let err = GestureIndex::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::MalformedIndex { .. }));
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).register("   ", &frame(0)).unwrap_err();
        assert!(matches!(err, StoreError::EmptyName));
        assert!(!dir.path().join("gestures.json").exists());
    }

    #[test]
    fn test_register_writes_image_and_index() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.register("smile", &frame(0)).unwrap();

        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "smile.jpg");
        assert_eq!(store.index().unwrap().get("smile"), Some(path.as_path()));
    }

    #[test]
    fn test_register_with_malformed_index_keeps_previous_image() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.register("smile", &frame(0)).unwrap();
        let before = fs::read(&path).unwrap();

        fs::write(store.index_path(), r#"{"smile": 3}"#).unwrap();
        let err = store.register("smile", &frame(19)).unwrap_err();
        assert!(matches!(err, StoreError::MalformedIndex { .. }));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_reregister_maps_to_latest_data() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register("smile", &frame(0)).unwrap();
        store.register("wink", &frame(7)).unwrap();
        let path = store.register("smile", &frame(19)).unwrap();

        let index = store.index().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("smile"), Some(path.as_path()));

        let saved = to_gray(&image::open(&path).unwrap().into_rgb8());
        let latest = to_gray(&frame(19));
        let first = to_gray(&frame(0));
        let vs_latest = crate::similarity::ssim(&saved, &latest).unwrap();
        let vs_first = crate::similarity::ssim(&saved, &first).unwrap();
        assert!(vs_latest > vs_first, "saved image should be the latest frame: {vs_latest} vs {vs_first}");
    }

    #[test]
    fn test_gallery_skips_missing_and_unreadable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register("smile", &frame(0)).unwrap();

        let garbage = dir.path().join("garbage.jpg");
        fs::write(&garbage, b"not an image").unwrap();
        let mut index = store.index().unwrap();
        index.insert("ghost", dir.path().join("missing.jpg"));
        index.insert("garbage", garbage);
        index.save(store.index_path()).unwrap();

        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].name, "smile");
    }

    #[test]
    fn test_compare_no_match_when_every_image_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut index = GestureIndex::default();
        index.insert("ghost", dir.path().join("missing.jpg"));
        index.save(store.index_path()).unwrap();

        let probe = GrayImage::from_pixel(32, 32, Luma([128]));
        let result = store.compare(&probe, 0.5).unwrap();
        assert!(!result.matched);
        assert_eq!(result.compared, 0);
    }

    #[test]
    fn test_register_then_login_scenario() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let image_a = frame(0);
        store.register("smile", &image_a).unwrap();

        let probe_a = to_gray(&image_a);
        let result = store.compare(&probe_a, 0.5).unwrap();
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("smile"));

        let probe_b = GrayImage::from_fn(64, 48, |x, y| Luma([255 - probe_a.get_pixel(x, y)[0]]));
        let result = store.compare(&probe_b, 0.5).unwrap();
        assert!(!result.matched);
        assert!(result.score <= 0.5);
    }

    #[test]
    fn test_emotion_store_roundtrip_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = EmotionStore::new(dir.path().join("emotion.json"));
        assert_eq!(store.registered().unwrap(), None);

        store.register(Emotion::Happy).unwrap();
        assert_eq!(store.registered().unwrap(), Some(Emotion::Happy));

        store.register(Emotion::Sad).unwrap();
        assert_eq!(store.registered().unwrap(), Some(Emotion::Sad));

        let raw = fs::read_to_string(dir.path().join("emotion.json")).unwrap();
        assert!(raw.contains("\"registered_emotion\": \"sad\""), "{raw}");
    }
}
