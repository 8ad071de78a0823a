//! Emotion streaming server: webcam capture, emotion inference and an HTTP
//! MJPEG/JSON front end.

use anyhow::{Context, Result};
use clap::Parser;
use emotion_stream::{
    annotator::Annotator,
    camera::{CameraSource, PatternCamera},
    config::{Config, SourceKind},
    inference::{EmotionInference, NoopInference},
    lifecycle::Controller,
    server::StreamServer,
};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Camera index to use
    #[arg(long)]
    cam: Option<i32>,

    /// Frame source (camera, pattern)
    #[arg(short, long, value_parser = parse_source)]
    source: Option<SourceKind>,

    /// Run inference on every N-th frame
    #[arg(short = 'k', long)]
    skip_interval: Option<u32>,

    /// Do not mirror the video horizontally
    #[arg(long)]
    no_mirror: bool,

    /// Listen address (defaults to 0.0.0.0:$PORT, then the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// TrueType font for overlay text
    #[arg(long)]
    font: Option<PathBuf>,

    /// Haar cascade XML for face detection
    #[arg(long)]
    face_cascade: Option<PathBuf>,

    /// ONNX emotion classifier
    #[arg(long)]
    emotion_model: Option<PathBuf>,

    /// Wait for POST /start instead of capturing immediately
    #[arg(long)]
    no_autostart: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn parse_source(value: &str) -> std::result::Result<SourceKind, String> {
    value.parse().map_err(|e: emotion_stream::Error| e.to_string())
}

impl Args {
    /// Layer command line overrides on top of `config`
    fn apply(&self, mut config: Config) -> Config {
        if let Some(cam) = self.cam {
            config.camera.device = cam;
        }
        if let Some(source) = self.source {
            config.camera.source = source;
        }
        if let Some(k) = self.skip_interval {
            config.pipeline.skip_interval = k;
        }
        if self.no_mirror {
            config.pipeline.mirror = false;
        }
        if let Some(bind) = &self.bind {
            config.server.bind.clone_from(bind);
        } else if let Ok(port) = std::env::var("PORT") {
            config.server.bind = format!("0.0.0.0:{port}");
        }
        if let Some(font) = &self.font {
            config.display.font = Some(font.clone());
        }
        if let Some(path) = &self.face_cascade {
            config.models.face_cascade.clone_from(path);
        }
        if let Some(path) = &self.emotion_model {
            config.models.emotion_classifier.clone_from(path);
        }
        if self.no_autostart {
            config.server.autostart = false;
        }
        config
    }
}

fn build_camera(config: &Config) -> Result<Box<dyn CameraSource>> {
    match config.camera.source {
        SourceKind::Pattern => Ok(Box::new(PatternCamera::new(
            config.camera.width,
            config.camera.height,
            config.camera.pattern_fps,
        ))),
        SourceKind::Camera => build_webcam(config),
    }
}

#[cfg(feature = "opencv")]
#[allow(clippy::unnecessary_wraps)]
fn build_webcam(config: &Config) -> Result<Box<dyn CameraSource>> {
    Ok(Box::new(emotion_stream::camera::webcam::WebcamCamera::new(
        config.camera.device,
        config.camera.width,
        config.camera.height,
    )))
}

#[cfg(not(feature = "opencv"))]
fn build_webcam(_config: &Config) -> Result<Box<dyn CameraSource>> {
    anyhow::bail!("webcam capture needs the `opencv` feature; use --source pattern")
}

fn build_inference(config: &Config) -> Box<dyn EmotionInference> {
    #[cfg(feature = "onnx")]
    {
        if config.models_available() {
            match emotion_stream::inference::onnx::OnnxEmotionAdapter::new(
                &config.models.face_cascade,
                &config.models.emotion_classifier,
            ) {
                Ok(adapter) => return Box::new(adapter),
                Err(e) => warn!("Failed to load emotion models: {e}"),
            }
        } else {
            warn!(
                "Emotion models not found ({}, {})",
                config.models.face_cascade.display(),
                config.models.emotion_classifier.display()
            );
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        let _ = config;
        warn!("Built without the `onnx` feature");
    }

    warn!("Emotion inference disabled, streaming video only");
    Box::new(NoopInference)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger
    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    info!("Emotion Stream v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    };
    let config = args.apply(config);
    config.validate()?;

    let annotator = match &config.display.font {
        Some(font) => Annotator::from_font_file(font)?,
        None => {
            info!("No font configured, overlay text disabled");
            Annotator::new()
        }
    }
    .show_panel(config.display.show_panel);

    let camera = build_camera(&config)?;
    let inference = build_inference(&config);
    let controller = Arc::new(Controller::new(
        camera,
        inference,
        annotator,
        config.pipeline_settings(),
    )?);

    if config.server.autostart {
        if let Err(e) = controller.start() {
            warn!("Autostart failed, waiting for POST /start: {e}");
        }
    }

    let server = Arc::new(StreamServer::bind(&config.server.bind, Arc::clone(&controller))?);
    {
        let server = Arc::clone(&server);
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Interrupted, shutting down");
            server.unblock();
        }) {
            warn!("Failed to install Ctrl+C handler: {e}");
        }
    }
    server.serve();

    controller.stop();
    Ok(())
}
