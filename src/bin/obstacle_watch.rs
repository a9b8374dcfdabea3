//! obstacle_watch - live obstacle overlay
//!
//! 1. Loads configuration (file, `OBSTACLE_*` environment, then flags)
//! 2. Loads the detector; nothing starts until it is ready
//! 3. Opens the camera with constraints picked from the device profile
//! 4. Runs the frame loop until Ctrl-C, the source ends, or `--max-frames`

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use obstacle_watch::{
    detect, open_source, AppConfig, BackendKind, CancelToken, CaptureConstraints, CaptureSource,
    DetectionSession, JsonLinesSurface, LogSurface, LoopExit, OverlaySurface, SessionSettings,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputMode {
    /// Report overlay changes through the logger.
    Log,
    /// Write overlay operations to stdout as JSON lines.
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Scripted,
    Tract,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Scripted => BackendKind::Scripted,
            BackendArg::Tract => BackendKind::Tract,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Highlight obstacles in a live camera stream")]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = "OBSTACLE_CONFIG")]
    config: Option<PathBuf>,

    /// Camera source: a device path or stub://name.
    #[arg(long)]
    source: Option<String>,

    /// Detector backend.
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Scene file for the scripted backend.
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Stop after this many loop iterations.
    #[arg(long)]
    max_frames: Option<u64>,

    #[arg(long, value_enum, default_value = "log")]
    output: OutputMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend.into();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
    }
    if let Some(scene) = &args.scene {
        cfg.detector.scene_path = Some(scene.clone());
    }

    let profile = cfg.device_profile();
    let constraints = profile.constraints();
    let settings = cfg.session_settings()?;
    log::info!(
        "viewport {}x{} ({}), assumed source width {}, {} obstacle classes above {:.2}",
        cfg.viewport.width,
        cfg.viewport.height,
        if profile.mobile { "mobile" } else { "desktop" },
        profile.assumed_source_width(),
        cfg.obstacle_classes.len(),
        cfg.min_score
    );

    let source = match open_source(&cfg.source) {
        Ok(source) => source,
        Err(err) => {
            log::warn!("camera unavailable: {}", err);
            return Ok(());
        }
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping frame loop...");
        handler_token.cancel();
    })?;

    let ctx = RunContext {
        cfg: &cfg,
        settings,
        constraints,
        cancel: &cancel,
        max_frames: args.max_frames,
    };
    match args.output {
        OutputMode::Log => run_session(&ctx, source, LogSurface),
        OutputMode::Json => run_session(&ctx, source, JsonLinesSurface::new(std::io::stdout())),
    }
}

struct RunContext<'a> {
    cfg: &'a AppConfig,
    settings: SessionSettings,
    constraints: CaptureConstraints,
    cancel: &'a CancelToken,
    max_frames: Option<u64>,
}

fn run_session<S: OverlaySurface>(
    ctx: &RunContext<'_>,
    source: Box<dyn CaptureSource>,
    surface: S,
) -> Result<()> {
    let detector = detect::from_settings(&ctx.cfg.detector)?;
    let mut session = DetectionSession::new(detector, ctx.settings.clone(), surface);
    session.load_detector()?;
    log::info!("detector ready");

    let summary = session.run(source, &ctx.constraints, ctx.cancel, ctx.max_frames)?;
    match summary.exit {
        LoopExit::CaptureUnavailable(err) => {
            log::warn!("camera unavailable: {}", err);
        }
        exit => log::info!(
            "stopped ({:?}) after {} frames, {} dropped",
            exit,
            summary.iterations,
            summary.dropped_frames
        ),
    }
    Ok(())
}
