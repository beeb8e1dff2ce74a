mod app;
mod capture;
mod config;
mod logging;
mod tui;

use anyhow::{Context, Result};
use app::App;
use clap::{Parser, Subcommand};
use config::Config;
use facegate_core::similarity::{score_against, to_gray};
use facegate_core::{EmotionStore, FaceDetector, GestureStore, MatchResult, Matcher, SsimMatcher};
use facegate_hw::Camera;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facegate", version, about = "Webcam face and emotion login")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facegate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive main menu (the default)
    Menu,
    /// Register a face image under a name
    Register {
        /// Gesture name (e.g., "smile"); prompted for when omitted
        name: Option<String>,
    },
    /// Log in by comparing a live capture with the registered images
    Login,
    /// Register the dominant emotion of a live capture
    RegisterEmotion,
    /// Log in by matching the emotion of a live capture
    LoginEmotion,
    /// List registered gestures and the registered emotion
    List,
    /// Compare an image file against the registered gestures
    Compare {
        /// Image to use in place of a camera capture
        image: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test,
}

impl Commands {
    fn is_interactive(&self) -> bool {
        matches!(
            self,
            Commands::Menu
                | Commands::Register { .. }
                | Commands::Login
                | Commands::RegisterEmotion
                | Commands::LoginEmotion
        )
    }
}

#[derive(Serialize)]
struct EntryScore {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct CompareReport {
    probe: PathBuf,
    threshold: f32,
    scores: Vec<EntryScore>,
    result: MatchResult,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Menu);
    let config = Config::load(cli.config.as_deref())?;

    if command.is_interactive() {
        // Reported before the UI takes the screen; the session runs unlogged.
        if let Err(e) = logging::init_file(&config.log_dir()) {
            eprintln!("facegate: file logging disabled: {e:#}");
        }
    } else {
        logging::init_stderr();
    }
    tracing::debug!(?config, "configuration loaded");

    let authenticated = match command {
        Commands::Menu => {
            App::new(config)?.run_menu()?;
            true
        }
        Commands::Register { name } => {
            App::new(config)?.register_gesture(name)?;
            true
        }
        Commands::Login => App::new(config)?.login_gesture()?,
        Commands::RegisterEmotion => {
            App::new(config)?.register_emotion()?;
            true
        }
        Commands::LoginEmotion => App::new(config)?.login_emotion()?,
        Commands::List => {
            list(&config)?;
            true
        }
        Commands::Compare { image } => {
            compare(&config, image)?;
            true
        }
        Commands::Devices => {
            devices();
            true
        }
        Commands::Test => {
            test_camera(&config)?;
            true
        }
    };

    if !authenticated {
        std::process::exit(1);
    }
    Ok(())
}

fn gesture_store(config: &Config) -> GestureStore {
    GestureStore::new(config.gesture_index_path(), config.gesture_image_dir())
}

fn list(config: &Config) -> Result<()> {
    let index = gesture_store(config).index()?;
    if index.is_empty() {
        println!("No gestures registered");
    } else {
        println!("{:<20} PATH", "NAME");
        for (name, path) in index.iter() {
            let flag = if path.exists() { "" } else { "  (missing)" };
            println!("{name:<20} {}{flag}", path.display());
        }
    }

    match EmotionStore::new(config.emotion_path()).registered()? {
        Some(emotion) => println!("\nRegistered emotion: {emotion}"),
        None => println!("\nNo emotion registered"),
    }
    Ok(())
}

fn compare(config: &Config, image: PathBuf) -> Result<()> {
    let probe = image::open(&image)
        .with_context(|| format!("opening {}", image.display()))?
        .into_rgb8();
    let probe = to_gray(&probe);
    let gallery = gesture_store(config).load_gallery()?;

    let scores = gallery
        .iter()
        .map(|entry| match score_against(&probe, &entry.image) {
            Ok(score) => EntryScore { name: entry.name.clone(), score: Some(score), error: None },
            Err(e) => EntryScore { name: entry.name.clone(), score: None, error: Some(e.to_string()) },
        })
        .collect();
    let result = SsimMatcher.compare(&probe, &gallery, config.match_threshold);

    let report = CompareReport {
        probe: image,
        threshold: config.match_threshold,
        scores,
        result,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}

fn test_camera(config: &Config) -> Result<()> {
    println!("Running camera diagnostics on {}...", config.camera_device);
    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening {}", config.camera_device))?;
    println!("  format: {:?} {}x{}", camera.fourcc, camera.width, camera.height);

    let frame = camera.capture_frame().context("capturing a frame")?;
    println!("  frame:  {}x{} (sequence {})", frame.width(), frame.height(), frame.sequence);

    match FaceDetector::load(&config.detector_model_path()) {
        Ok(mut detector) => {
            let faces = detector.detect(&frame.image)?;
            println!("  faces:  {}", faces.len());
            for f in &faces {
                println!(
                    "          {:.0},{:.0} {:.0}x{:.0} conf {:.2}",
                    f.x, f.y, f.width, f.height, f.confidence
                );
            }
        }
        Err(e) => println!("  faces:  skipped ({e})"),
    }
    Ok(())
}
