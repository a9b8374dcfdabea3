#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::coco_label;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Upper bound on boxes reported per frame.
pub const DEFAULT_MAX_BOXES: usize = 20;
/// Boxes below this score are never reported by the backend.
pub const DEFAULT_MIN_SCORE: f32 = 0.5;

type Plan = TypedSimplePlan<TypedModel>;

/// Tract-based SSD-MobileNet backend.
///
/// Expects the TensorFlow object-detection export layout: a `u8[1, H, W, 3]`
/// image input and four outputs (boxes `[1, N, 4]` as normalized
/// `ymin, xmin, ymax, xmax`, classes `[1, N]`, scores `[1, N]`, count `[1]`).
pub struct TractBackend {
    model_path: PathBuf,
    model: Option<Plan>,
    input_width: u32,
    input_height: u32,
    max_boxes: usize,
    min_score: f32,
}

impl TractBackend {
    /// Prepare a backend. The model is read on `load`.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            model: None,
            input_width,
            input_height,
            max_boxes: DEFAULT_MAX_BOXES,
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    pub fn with_limits(mut self, max_boxes: usize, min_score: f32) -> Self {
        self.max_boxes = max_boxes;
        self.min_score = min_score;
        self
    }

    /// Nearest-neighbour resample into the model's NHWC input.
    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("empty frame {}x{}", frame.width, frame.height));
        }
        let in_w = self.input_width as usize;
        let in_h = self.input_height as usize;
        let sx = frame.width as f32 / in_w as f32;
        let sy = frame.height as f32 / in_h as f32;
        let input = tract_ndarray::Array4::<u8>::from_shape_fn(
            (1, in_h, in_w, 3),
            |(_, y, x, channel)| {
                let src_x = (x as f32 * sx) as u32;
                let src_y = (y as f32 * sy) as u32;
                frame.rgb_at(src_x, src_y)[channel]
            },
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        if outputs.len() < 4 {
            return Err(anyhow!("expected 4 model outputs, got {}", outputs.len()));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("boxes output was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("classes output was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("scores output was not f32")?;
        let count = outputs[3]
            .to_array_view::<f32>()
            .context("count output was not f32")?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0)
            .max(0.0) as usize;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        let n = count.min(scores.len()).min(classes.len()).min(boxes.len() / 4);

        let fw = frame.width as f32;
        let fh = frame.height as f32;
        let mut detections = Vec::new();
        for i in 0..n {
            let score = scores[i];
            if score < self.min_score {
                continue;
            }
            let class_id = classes[i].round() as u32;
            let [ymin, xmin, ymax, xmax] = [
                boxes[i * 4].clamp(0.0, 1.0),
                boxes[i * 4 + 1].clamp(0.0, 1.0),
                boxes[i * 4 + 2].clamp(0.0, 1.0),
                boxes[i * 4 + 3].clamp(0.0, 1.0),
            ];
            let label = coco_label(class_id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("class {}", class_id));
            detections.push(Detection::new(
                class_id,
                label,
                score,
                BoundingBox::new(
                    xmin * fw,
                    ymin * fh,
                    (xmax - xmin) * fw,
                    (ymax - ymin) * fh,
                ),
            ));
        }

        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        detections.truncate(self.max_boxes);
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&mut self) -> Result<()> {
        let model = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, self.input_height as usize, self.input_width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.model = Some(model);
        log::info!(
            "tract detector loaded {} ({}x{} input)",
            self.model_path.display(),
            self.input_width,
            self.input_height
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract detector used before load"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}
