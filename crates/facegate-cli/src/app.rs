//! Interactive registration and login flows.

use crate::capture::{run_capture, CaptureOutcome};
use crate::config::Config;
use crate::tui::{DialogKind, MenuChoice, MenuState, Tui};
use anyhow::Result;
use facegate_core::detector::DetectorError;
use facegate_core::emotion::{dominant_emotion, EmotionError, EmotionScore};
use facegate_core::similarity::to_gray;
use facegate_core::store::StoreError;
use facegate_core::{Emotion, EmotionClassifier, EmotionStore, FaceDetector, GestureStore, MatchResult};
use facegate_hw::{Camera, Frame};

const NAME_PROMPT: &str = "Enter Gesture Name (e.g., smile, anger):";

/// What to tell the user once an operation finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info { title: String, body: String },
    Error { title: String, body: String },
    /// Successful login; carries the "Logged in with ..." line.
    Welcome(String),
}

impl Notice {
    fn info(title: &str, body: impl Into<String>) -> Self {
        Notice::Info { title: title.to_string(), body: body.into() }
    }

    fn error(title: &str, body: impl Into<String>) -> Self {
        Notice::Error { title: title.to_string(), body: body.into() }
    }

    pub fn is_welcome(&self) -> bool {
        matches!(self, Notice::Welcome(_))
    }
}

pub fn gesture_registered_notice(name: &str) -> Notice {
    Notice::info("Success", format!("Gesture '{name}' registered successfully!"))
}

pub fn gesture_registration_failed_notice(err: &StoreError) -> Notice {
    match err {
        StoreError::EmptyName => Notice::error("Registration Failed", "Gesture name must not be empty!"),
        other => Notice::error("Registration Failed", other.to_string()),
    }
}

pub fn gesture_login_notice(result: &MatchResult) -> Notice {
    match (&result.name, result.matched) {
        (Some(name), true) => Notice::Welcome(format!("Logged in with gesture: {name}")),
        _ if result.compared == 0 => {
            Notice::error("Login Failed", "No registered gesture could be loaded!")
        }
        _ => Notice::error("Login Failed", "No matching gesture found!"),
    }
}

pub fn emotion_registered_notice(emotion: Emotion) -> Notice {
    Notice::info("Success", format!("Emotion '{emotion}' registered successfully!"))
}

pub fn emotion_failed_notice(title: &str, err: &EmotionError) -> Notice {
    match err {
        EmotionError::NoFaceDetected => Notice::error(title, "No face detected!"),
        other => Notice::error(title, other.to_string()),
    }
}

pub fn emotion_login_notice(registered: Emotion, detected: Emotion) -> Notice {
    if registered == detected {
        Notice::Welcome(format!("Logged in with emotion: {detected}"))
    } else {
        Notice::error(
            "Login Failed",
            format!("Detected emotion '{detected}' does not match the registered emotion!"),
        )
    }
}

pub fn no_emotion_registered_notice() -> Notice {
    Notice::error("Login Failed", "No emotion registered!")
}

/// An interactive session: owns the terminal and the loaded models.
pub struct App {
    config: Config,
    tui: Tui,
    detector: Option<FaceDetector>,
    classifier: Option<EmotionClassifier>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let detector = match FaceDetector::load(&config.detector_model_path()) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "face detector unavailable; preview runs without overlay");
                None
            }
        };
        let tui = Tui::enter()?;
        Ok(Self { config, tui, detector, classifier: None })
    }

    fn gestures(&self) -> GestureStore {
        GestureStore::new(self.config.gesture_index_path(), self.config.gesture_image_dir())
    }

    fn emotions(&self) -> EmotionStore {
        EmotionStore::new(self.config.emotion_path())
    }

    /// Open the camera and run the preview loop. The camera is released
    /// before this returns.
    fn capture(&mut self, title: &str) -> Result<CaptureOutcome> {
        let camera = match Camera::open(&self.config.camera_device) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(device = %self.config.camera_device, error = %e, "cannot open camera");
                return Ok(CaptureOutcome::SourceEnded);
            }
        };
        let mut stream = match camera.stream() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "cannot start camera stream");
                return Ok(CaptureOutcome::SourceEnded);
            }
        };
        run_capture(&mut stream, &mut self.detector, &mut self.tui, title)
    }

    fn show(&mut self, notice: &Notice) -> Result<()> {
        match notice {
            Notice::Info { title, body } => self.tui.dialog(DialogKind::Info, title, body),
            Notice::Error { title, body } => self.tui.dialog(DialogKind::Error, title, body),
            Notice::Welcome(detail) => self.tui.welcome(detail),
        }
    }

    /// Register a named face image. Prompts for the name when `name` is `None`.
    pub fn register_gesture(&mut self, name: Option<String>) -> Result<()> {
        let name = match name {
            Some(n) => n,
            None => match self.tui.prompt("Register Gesture", NAME_PROMPT)? {
                Some(n) => n,
                None => return Ok(()),
            },
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            return self.show(&gesture_registration_failed_notice(&StoreError::EmptyName));
        }

        let CaptureOutcome::Saved(frame) = self.capture(&format!("Capture Gesture - {name}"))? else {
            return Ok(());
        };

        let notice = match self.gestures().register(&name, &frame.image) {
            Ok(_) => gesture_registered_notice(&name),
            Err(e) => {
                tracing::error!(name, error = %e, "gesture registration failed");
                gesture_registration_failed_notice(&e)
            }
        };
        self.show(&notice)
    }

    /// Capture a face and compare it with every registered image.
    /// Returns whether the user was let in.
    pub fn login_gesture(&mut self) -> Result<bool> {
        let CaptureOutcome::Saved(frame) = self.capture("Login - Capture Gesture")? else {
            return Ok(false);
        };

        let notice = match self.gestures().compare(&to_gray(&frame.image), self.config.match_threshold) {
            Ok(result) => {
                tracing::info!(matched = result.matched, score = result.score, "gesture login");
                gesture_login_notice(&result)
            }
            Err(e) => {
                tracing::error!(error = %e, "gesture login failed");
                Notice::error("Login Failed", e.to_string())
            }
        };
        self.show(&notice)?;
        Ok(notice.is_welcome())
    }

    fn classify(&mut self, frame: &Frame) -> Result<EmotionScore, EmotionError> {
        let Some(detector) = self.detector.as_mut() else {
            return Err(DetectorError::ModelNotFound(self.config.detector_model_path()).into());
        };
        if self.classifier.is_none() {
            self.classifier = Some(EmotionClassifier::load(&self.config.emotion_model_path())?);
        }
        let Some(classifier) = self.classifier.as_mut() else {
            return Err(EmotionError::ModelNotFound(self.config.emotion_model_path()));
        };
        dominant_emotion(detector, classifier, &frame.image)
    }

    /// Store the dominant emotion of a captured face.
    pub fn register_emotion(&mut self) -> Result<()> {
        let CaptureOutcome::Saved(frame) = self.capture("Register Emotion")? else {
            return Ok(());
        };

        let notice = match self.classify(&frame) {
            Ok(score) => match self.emotions().register(score.emotion) {
                Ok(()) => emotion_registered_notice(score.emotion),
                Err(e) => Notice::error("Registration Failed", e.to_string()),
            },
            Err(e) => {
                tracing::warn!(error = %e, "emotion registration failed");
                emotion_failed_notice("Registration Failed", &e)
            }
        };
        self.show(&notice)
    }

    /// Capture a face and compare its emotion with the registered one.
    /// Returns whether the user was let in.
    pub fn login_emotion(&mut self) -> Result<bool> {
        let registered = match self.emotions().registered() {
            Ok(Some(e)) => e,
            Ok(None) => {
                self.show(&no_emotion_registered_notice())?;
                return Ok(false);
            }
            Err(e) => {
                self.show(&Notice::error("Login Failed", e.to_string()))?;
                return Ok(false);
            }
        };

        let CaptureOutcome::Saved(frame) = self.capture("Login - Capture Emotion")? else {
            return Ok(false);
        };

        let notice = match self.classify(&frame) {
            Ok(score) => {
                tracing::info!(registered = %registered, detected = %score.emotion, "emotion login");
                emotion_login_notice(registered, score.emotion)
            }
            Err(e) => emotion_failed_notice("Login Failed", &e),
        };
        self.show(&notice)?;
        Ok(notice.is_welcome())
    }

    /// Main menu until the user quits.
    pub fn run_menu(&mut self) -> Result<()> {
        let mut menu = MenuState::default();
        loop {
            match self.tui.menu(&mut menu)? {
                MenuChoice::RegisterGesture => self.register_gesture(None)?,
                MenuChoice::LoginGesture => {
                    self.login_gesture()?;
                }
                MenuChoice::RegisterEmotion => self.register_emotion()?,
                MenuChoice::LoginEmotion => {
                    self.login_emotion()?;
                }
                MenuChoice::Quit => return Ok(()),
            }
        }
    }
}
