use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::{coco_class_id, coco_label};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Backend that replays a fixed scene, one detection list per call, cycling.
///
/// Used for tests and for running the pipeline without model weights.
pub struct ScriptedBackend {
    source: SceneSource,
    frames: Vec<Vec<Detection>>,
    cursor: usize,
    ready: bool,
}

enum SceneSource {
    Inline(Vec<Vec<Detection>>),
    File(PathBuf),
}

#[derive(Debug, Deserialize)]
struct SceneFile {
    frames: Vec<Vec<SceneDetection>>,
}

/// Scene entries may name a class by id, by COCO label, or both.
#[derive(Debug, Deserialize)]
struct SceneDetection {
    class_id: Option<u32>,
    label: Option<String>,
    score: f32,
    bbox: BoundingBox,
}

impl SceneDetection {
    fn resolve(self) -> Result<Detection> {
        let class_id = match (self.class_id, self.label.as_deref()) {
            (Some(id), _) => id,
            (None, Some(label)) => {
                coco_class_id(label).ok_or_else(|| anyhow!("unknown class label '{}'", label))?
            }
            (None, None) => return Err(anyhow!("scene entry needs class_id or label")),
        };
        let label = self
            .label
            .or_else(|| coco_label(class_id).map(str::to_string))
            .unwrap_or_else(|| format!("class {}", class_id));
        Ok(Detection::new(class_id, label, self.score, self.bbox))
    }
}

impl ScriptedBackend {
    /// Scene given in memory. Still requires `load` before use.
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            source: SceneSource::Inline(frames),
            frames: Vec::new(),
            cursor: 0,
            ready: false,
        }
    }

    /// Scene read from a JSON file on `load`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source: SceneSource::File(path.as_ref().to_path_buf()),
            frames: Vec::new(),
            cursor: 0,
            ready: false,
        }
    }

    /// Already-loaded backend over an in-memory scene.
    pub fn loaded(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            source: SceneSource::Inline(Vec::new()),
            frames,
            cursor: 0,
            ready: true,
        }
    }

    /// Built-in scene: a person walks toward a 640px-wide camera, a dog
    /// passes at low confidence, the street goes quiet, then a car appears.
    pub fn demo() -> Self {
        let person = |x: f32, w: f32, score: f32| {
            Detection::new(1, "person", score, BoundingBox::new(x, 120.0, w, w * 2.2))
        };
        let mut frames = vec![
            vec![person(280.0, 60.0, 0.58)],
            vec![person(270.0, 80.0, 0.71)],
            vec![person(255.0, 110.0, 0.83)],
            vec![
                person(240.0, 150.0, 0.91),
                Detection::new(18, "dog", 0.41, BoundingBox::new(40.0, 300.0, 90.0, 70.0)),
            ],
            vec![Detection::new(62, "chair", 0.88, BoundingBox::new(500.0, 260.0, 80.0, 120.0))],
        ];
        frames.extend(std::iter::repeat_with(Vec::new).take(60));
        frames.push(vec![Detection::new(
            3,
            "car",
            0.77,
            BoundingBox::new(60.0, 180.0, 300.0, 160.0),
        )]);
        Self::new(frames)
    }

    /// Number of scripted frames.
    pub fn scene_len(&self) -> usize {
        self.frames.len()
    }

    fn read_scene(path: &Path) -> Result<Vec<Vec<Detection>>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scene file {}", path.display()))?;
        let scene: SceneFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid scene file {}", path.display()))?;
        scene
            .frames
            .into_iter()
            .map(|frame| frame.into_iter().map(SceneDetection::resolve).collect())
            .collect()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn load(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        self.frames = match &mut self.source {
            SceneSource::Inline(frames) => std::mem::take(frames),
            SceneSource::File(path) => Self::read_scene(path)?,
        };
        self.cursor = 0;
        self.ready = true;
        log::info!("scripted detector loaded {} frames", self.frames.len());
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if !self.ready {
            return Err(anyhow!("scripted detector used before load"));
        }
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.frames[self.cursor % self.frames.len()].clone();
        self.cursor += 1;
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replays_scene_cyclically() -> Result<()> {
        let car = Detection::new(3, "car", 0.9, BoundingBox::new(0.0, 0.0, 5.0, 5.0));
        let mut backend = ScriptedBackend::new(vec![vec![car.clone()], vec![]]);
        assert!(!backend.is_ready());
        backend.load()?;
        let frame = Frame::blank(0, 1, 1)?;

        assert_eq!(backend.detect(&frame)?, vec![car.clone()]);
        assert!(backend.detect(&frame)?.is_empty());
        assert_eq!(backend.detect(&frame)?, vec![car]);
        Ok(())
    }

    #[test]
    fn detect_before_load_fails() -> Result<()> {
        let mut backend = ScriptedBackend::new(Vec::new());
        assert!(backend.detect(&Frame::blank(0, 1, 1)?).is_err());
        Ok(())
    }

    #[test]
    fn scene_file_resolves_labels_and_ids() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(
            br#"{"frames": [
                [{"label": "dog", "score": 0.8, "bbox": [1, 2, 3, 4]}],
                [{"class_id": 44, "score": 0.7, "bbox": [5, 6, 7, 8]}]
            ]}"#,
        )?;
        let mut backend = ScriptedBackend::from_path(file.path());
        backend.load()?;
        assert_eq!(backend.scene_len(), 2);

        let frame = Frame::blank(0, 1, 1)?;
        let first = backend.detect(&frame)?;
        assert_eq!(first[0].class_id, 18);
        let second = backend.detect(&frame)?;
        assert_eq!(second[0].label, "bottle");
        Ok(())
    }

    #[test]
    fn scene_entry_without_class_is_rejected() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(br#"{"frames": [[{"score": 0.8, "bbox": [1, 2, 3, 4]}]]}"#)?;
        let mut backend = ScriptedBackend::from_path(file.path());
        assert!(backend.load().is_err());
        assert!(!backend.is_ready());
        Ok(())
    }

    #[test]
    fn demo_scene_loads() -> Result<()> {
        let mut backend = ScriptedBackend::demo();
        backend.load()?;
        assert!(backend.scene_len() > 60);
        Ok(())
    }
}
