use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::alert::DEFAULT_ALERT_TIMEOUT_MS;
use crate::capture::{DeviceProfile, Viewport};
use crate::overlay::ViewportScale;
use crate::policy::{FilterPolicy, ObstacleSet, DEFAULT_MIN_SCORE, DEFAULT_OBSTACLE_CLASSES};
use crate::session::SessionSettings;

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_FPS: u32 = 15;
const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64)";
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_DETECTOR_MAX_BOXES: usize = 20;
const DEFAULT_DETECTOR_MIN_SCORE: f32 = 0.5;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    source: Option<SourceConfigFile>,
    viewport: Option<ViewportConfigFile>,
    detector: Option<DetectorConfigFile>,
    filter: Option<FilterConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    environment_url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    frame_limit: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewportConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    scene_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    max_boxes: Option<usize>,
    min_score: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    min_score: Option<f32>,
    classes: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Scripted,
    Tract,
}

impl BackendKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "scripted" => Ok(Self::Scripted),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// `stub://...` for the synthetic source, otherwise a device path.
    pub url: String,
    /// Device used when the rear camera is requested.
    pub environment_url: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Stop after this many frames (synthetic sources only).
    pub frame_limit: Option<u64>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            environment_url: None,
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            target_fps: DEFAULT_SOURCE_FPS,
            frame_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportSettings {
    pub width: u32,
    pub height: u32,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: Option<PathBuf>,
    pub scene_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub max_boxes: usize,
    /// Backend-side cutoff, applied before the obstacle filter.
    pub min_score: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Scripted,
            model_path: None,
            scene_path: None,
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            max_boxes: DEFAULT_DETECTOR_MAX_BOXES,
            min_score: DEFAULT_DETECTOR_MIN_SCORE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceSettings,
    pub viewport: ViewportSettings,
    pub detector: DetectorSettings,
    pub min_score: f32,
    pub obstacle_classes: Vec<u32>,
    pub alert_timeout_ms: u64,
}

impl AppConfig {
    /// Defaults, then the file named by `OBSTACLE_CONFIG`, then `OBSTACLE_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OBSTACLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, still honouring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let viewport = file.viewport.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let filter = file.filter.unwrap_or_default();

        let backend = match detector.backend.as_deref() {
            Some(name) => BackendKind::parse(name)?,
            None => BackendKind::Scripted,
        };

        Ok(Self {
            source: SourceSettings {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                environment_url: source.environment_url,
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                frame_limit: source.frame_limit,
            },
            viewport: ViewportSettings {
                width: viewport.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
                height: viewport.height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT),
                user_agent: viewport
                    .user_agent
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            },
            detector: DetectorSettings {
                backend,
                model_path: detector.model_path,
                scene_path: detector.scene_path,
                input_width: detector.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: detector.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
                max_boxes: detector.max_boxes.unwrap_or(DEFAULT_DETECTOR_MAX_BOXES),
                min_score: detector.min_score.unwrap_or(DEFAULT_DETECTOR_MIN_SCORE),
            },
            min_score: filter.min_score.unwrap_or(DEFAULT_MIN_SCORE),
            obstacle_classes: filter
                .classes
                .unwrap_or_else(|| DEFAULT_OBSTACLE_CLASSES.to_vec()),
            alert_timeout_ms: file
                .alert
                .and_then(|alert| alert.timeout_ms)
                .unwrap_or(DEFAULT_ALERT_TIMEOUT_MS),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_non_empty("OBSTACLE_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(backend) = env_non_empty("OBSTACLE_BACKEND") {
            self.detector.backend = BackendKind::parse(&backend)?;
        }
        if let Some(path) = env_non_empty("OBSTACLE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_non_empty("OBSTACLE_SCENE_PATH") {
            self.detector.scene_path = Some(PathBuf::from(path));
        }
        if let Some(width) = env_non_empty("OBSTACLE_VIEWPORT_WIDTH") {
            self.viewport.width = width
                .parse()
                .map_err(|_| anyhow!("OBSTACLE_VIEWPORT_WIDTH must be an integer pixel count"))?;
        }
        if let Some(height) = env_non_empty("OBSTACLE_VIEWPORT_HEIGHT") {
            self.viewport.height = height
                .parse()
                .map_err(|_| anyhow!("OBSTACLE_VIEWPORT_HEIGHT must be an integer pixel count"))?;
        }
        if let Some(agent) = env_non_empty("OBSTACLE_USER_AGENT") {
            self.viewport.user_agent = agent;
        }
        if let Some(score) = env_non_empty("OBSTACLE_MIN_SCORE") {
            self.min_score = score
                .parse()
                .map_err(|_| anyhow!("OBSTACLE_MIN_SCORE must be a number in [0, 1]"))?;
        }
        if let Ok(classes) = std::env::var("OBSTACLE_CLASSES") {
            let parsed = split_csv(&classes)
                .iter()
                .map(|entry| {
                    entry
                        .parse::<u32>()
                        .map_err(|_| anyhow!("OBSTACLE_CLASSES entry '{}' is not a class id", entry))
                })
                .collect::<Result<Vec<_>>>()?;
            if !parsed.is_empty() {
                self.obstacle_classes = parsed;
            }
        }
        if let Some(timeout) = env_non_empty("OBSTACLE_ALERT_TIMEOUT_MS") {
            self.alert_timeout_ms = timeout.parse().map_err(|_| {
                anyhow!("OBSTACLE_ALERT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(anyhow!("filter.min_score must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_score) {
            return Err(anyhow!("detector.min_score must be within [0, 1]"));
        }
        if self.obstacle_classes.is_empty() {
            return Err(anyhow!("filter.classes must name at least one class id"));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(anyhow!("viewport dimensions must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be greater than zero"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input dimensions must be greater than zero"));
        }
        if self.alert_timeout_ms == 0 {
            return Err(anyhow!("alert.timeout_ms must be greater than zero"));
        }
        Ok(())
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.viewport.width, self.viewport.height)
    }

    pub fn device_profile(&self) -> DeviceProfile {
        DeviceProfile::detect(&self.viewport.user_agent, self.viewport())
    }

    pub fn filter_policy(&self) -> Result<FilterPolicy> {
        FilterPolicy::new(
            ObstacleSet::new(self.obstacle_classes.iter().copied()),
            self.min_score,
        )
    }

    /// Policy, scale and timeout for a detection session.
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let profile = self.device_profile();
        Ok(SessionSettings {
            policy: self.filter_policy()?,
            scale: ViewportScale::new(
                self.viewport.width as f32,
                profile.assumed_source_width() as f32,
            ),
            alert_timeout_ms: self.alert_timeout_ms,
        })
    }
}

/// Read a config file. `.toml` files are parsed as TOML, anything else as JSON.
fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_behaviour() -> Result<()> {
        let cfg = AppConfig::from_file(AppConfigFile::default())?;
        cfg.validate()?;
        assert_eq!(cfg.source.url, "stub://camera");
        assert_eq!(cfg.min_score, 0.66);
        assert_eq!(cfg.obstacle_classes, DEFAULT_OBSTACLE_CLASSES.to_vec());
        assert_eq!(cfg.alert_timeout_ms, 5_000);
        assert_eq!(cfg.detector.backend, BackendKind::Scripted);
        Ok(())
    }

    #[test]
    fn session_scale_uses_assumed_source_width() -> Result<()> {
        let mut cfg = AppConfig::from_file(AppConfigFile::default())?;
        cfg.viewport.width = 390;
        cfg.viewport.height = 844;
        cfg.viewport.user_agent = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)".to_string();
        let settings = cfg.session_settings()?;
        assert_eq!(settings.scale.source_width, 480.0);
        assert_eq!(settings.scale.viewport_width, 390.0);
        Ok(())
    }

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!(BackendKind::parse(" Tract ").unwrap(), BackendKind::Tract);
        assert!(BackendKind::parse("coreml").is_err());
    }

    #[test]
    fn split_csv_skips_blanks() {
        assert_eq!(split_csv(" 1, ,3,"), vec!["1", "3"]);
    }
}
