//! Overlay rendering and reconciliation.
//!
//! `render_overlay` is a pure function from one frame's detections to the
//! desired set of overlay elements. `OverlayLayer` owns the live elements and
//! reconciles a desired set onto an `OverlaySurface` by destroying every
//! previous element before creating the new ones, so elements from different
//! inferences never coexist.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use crate::detect::Detection;
use crate::policy::FilterPolicy;

/// Caption offset (viewport px) above and inside the highlight box.
const CAPTION_INSET: f32 = 10.0;

/// Uniform source-to-viewport scale.
///
/// The source width is an assumed device-class value (640 or 480), not the
/// measured stream width, so the mapping is approximate whenever the real
/// stream differs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportScale {
    pub viewport_width: f32,
    pub source_width: f32,
}

impl ViewportScale {
    pub fn new(viewport_width: f32, source_width: f32) -> Self {
        Self {
            viewport_width,
            source_width,
        }
    }

    pub fn ratio(&self) -> f32 {
        if self.source_width > 0.0 {
            self.viewport_width / self.source_width
        } else {
            0.0
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OverlayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Caption {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
}

/// Highlight box plus caption for one qualifying detection, in viewport px.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayElement {
    pub class_id: u32,
    pub label: String,
    pub score: f32,
    pub highlight: OverlayRect,
    pub caption: Caption,
}

impl OverlayElement {
    pub fn from_detection(detection: &Detection, scale: ViewportScale) -> Self {
        let r = scale.ratio();
        let b = detection.bbox;
        Self {
            class_id: detection.class_id,
            label: detection.label.clone(),
            score: detection.score,
            highlight: OverlayRect {
                left: b.x * r,
                top: b.y * r,
                width: b.width * r,
                height: b.height * r,
            },
            caption: Caption {
                text: caption_text(&detection.label, detection.score),
                left: b.x * r,
                top: b.y * r - CAPTION_INSET,
                width: b.width * r - CAPTION_INSET,
            },
        }
    }
}

pub fn caption_text(label: &str, score: f32) -> String {
    format!("{} - with {}% confidence.", label, (score * 100.0).round() as i64)
}

/// Desired overlay for one frame: one element per qualifying detection, in
/// detector order.
pub fn render_overlay(
    detections: &[Detection],
    policy: &FilterPolicy,
    scale: ViewportScale,
) -> Vec<OverlayElement> {
    policy
        .select(detections)
        .map(|d| OverlayElement::from_detection(d, scale))
        .collect()
}

/// Identifier of a live element on a surface. Never reused within a layer.
pub type ElementId = u64;

/// Sink that displays overlay elements and the alert header.
pub trait OverlaySurface {
    fn create(&mut self, id: ElementId, element: &OverlayElement) -> Result<()>;
    fn destroy(&mut self, id: ElementId) -> Result<()>;
    fn show_alert(&mut self, message: &str) -> Result<()>;
    fn hide_alert(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayDiff {
    pub destroyed: usize,
    pub created: usize,
}

/// Owner of the live element list.
#[derive(Debug, Default)]
pub struct OverlayLayer {
    live: Vec<(ElementId, OverlayElement)>,
    next_id: ElementId,
}

impl OverlayLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live elements with `desired`.
    ///
    /// All previous elements are destroyed before any new one is created.
    /// If the surface fails mid-way, the layer keeps tracking exactly the
    /// elements that were not destroyed or were already created.
    pub fn reconcile<S: OverlaySurface + ?Sized>(
        &mut self,
        desired: Vec<OverlayElement>,
        surface: &mut S,
    ) -> Result<OverlayDiff> {
        let mut diff = OverlayDiff::default();
        while let Some(&(id, _)) = self.live.last() {
            surface
                .destroy(id)
                .with_context(|| format!("failed to destroy overlay element {}", id))?;
            self.live.pop();
            diff.destroyed += 1;
        }
        for element in desired {
            let id = self.next_id;
            self.next_id += 1;
            surface
                .create(id, &element)
                .with_context(|| format!("failed to create overlay element {}", id))?;
            self.live.push((id, element));
            diff.created += 1;
        }
        Ok(diff)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn elements(&self) -> impl Iterator<Item = &OverlayElement> {
        self.live.iter().map(|(_, element)| element)
    }
}

/// In-memory surface: live element map plus alert header state.
#[derive(Debug, Default)]
pub struct MemorySurface {
    live: BTreeMap<ElementId, OverlayElement>,
    alert: Option<String>,
    created_total: u64,
    destroyed_total: u64,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> impl Iterator<Item = &OverlayElement> {
        self.live.values()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Visible alert text, if shown.
    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn created_total(&self) -> u64 {
        self.created_total
    }

    pub fn destroyed_total(&self) -> u64 {
        self.destroyed_total
    }
}

impl OverlaySurface for MemorySurface {
    fn create(&mut self, id: ElementId, element: &OverlayElement) -> Result<()> {
        if self.live.insert(id, element.clone()).is_some() {
            anyhow::bail!("overlay element {} already exists", id);
        }
        self.created_total += 1;
        Ok(())
    }

    fn destroy(&mut self, id: ElementId) -> Result<()> {
        self.live
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("overlay element {} is not live", id))?;
        self.destroyed_total += 1;
        Ok(())
    }

    fn show_alert(&mut self, message: &str) -> Result<()> {
        self.alert = Some(message.to_string());
        Ok(())
    }

    fn hide_alert(&mut self) -> Result<()> {
        self.alert = None;
        Ok(())
    }
}

/// Surface that reports operations through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSurface;

impl OverlaySurface for LogSurface {
    fn create(&mut self, id: ElementId, element: &OverlayElement) -> Result<()> {
        log::debug!(
            "overlay +{} {} at ({:.0},{:.0}) {:.0}x{:.0}",
            id,
            element.caption.text,
            element.highlight.left,
            element.highlight.top,
            element.highlight.width,
            element.highlight.height
        );
        Ok(())
    }

    fn destroy(&mut self, id: ElementId) -> Result<()> {
        log::debug!("overlay -{}", id);
        Ok(())
    }

    fn show_alert(&mut self, message: &str) -> Result<()> {
        log::info!("alert: {}", message);
        Ok(())
    }

    fn hide_alert(&mut self) -> Result<()> {
        log::info!("alert cleared");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SurfaceEvent<'a> {
    Create {
        id: ElementId,
        element: &'a OverlayElement,
    },
    Destroy {
        id: ElementId,
    },
    ShowAlert {
        message: &'a str,
    },
    HideAlert,
}

/// Surface that writes one JSON object per operation, newline-delimited.
pub struct JsonLinesSurface<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: &SurfaceEvent<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, event).context("failed to encode overlay event")?;
        self.out
            .write_all(b"\n")
            .context("failed to write overlay event")?;
        Ok(())
    }
}

impl<W: Write> OverlaySurface for JsonLinesSurface<W> {
    fn create(&mut self, id: ElementId, element: &OverlayElement) -> Result<()> {
        self.emit(&SurfaceEvent::Create { id, element })
    }

    fn destroy(&mut self, id: ElementId) -> Result<()> {
        self.emit(&SurfaceEvent::Destroy { id })
    }

    fn show_alert(&mut self, message: &str) -> Result<()> {
        self.emit(&SurfaceEvent::ShowAlert { message })?;
        self.out.flush().context("failed to flush overlay events")
    }

    fn hide_alert(&mut self) -> Result<()> {
        self.emit(&SurfaceEvent::HideAlert)?;
        self.out.flush().context("failed to flush overlay events")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::policy::ObstacleSet;

    fn det(class_id: u32, score: f32, bbox: [f32; 4]) -> Detection {
        Detection::new(class_id, "person", score, BoundingBox::from(bbox))
    }

    #[test]
    fn element_scales_box_and_caption() {
        let scale = ViewportScale::new(1280.0, 640.0);
        let element = OverlayElement::from_detection(&det(1, 0.834, [10.0, 20.0, 30.0, 40.0]), scale);
        assert_eq!(
            element.highlight,
            OverlayRect {
                left: 20.0,
                top: 40.0,
                width: 60.0,
                height: 80.0
            }
        );
        assert_eq!(element.caption.text, "person - with 83% confidence.");
        assert_eq!(element.caption.top, 30.0);
        assert_eq!(element.caption.width, 50.0);
    }

    #[test]
    fn scaling_is_linear_in_viewport_width() {
        let d = det(1, 0.9, [12.0, 34.0, 56.0, 78.0]);
        let base = OverlayElement::from_detection(&d, ViewportScale::new(640.0, 640.0));
        let tripled = OverlayElement::from_detection(&d, ViewportScale::new(1920.0, 640.0));
        assert_eq!(tripled.highlight.left, base.highlight.left * 3.0);
        assert_eq!(tripled.highlight.top, base.highlight.top * 3.0);
        assert_eq!(tripled.highlight.width, base.highlight.width * 3.0);
        assert_eq!(tripled.highlight.height, base.highlight.height * 3.0);
    }

    #[test]
    fn render_filters_mixed_detections() {
        let policy = FilterPolicy::new(ObstacleSet::new([1, 3]), 0.66).unwrap();
        let detections = vec![
            det(1, 0.70, [0.0, 0.0, 1.0, 1.0]),
            det(2, 0.99, [0.0, 0.0, 1.0, 1.0]),
            det(3, 0.50, [0.0, 0.0, 1.0, 1.0]),
        ];
        let overlay = render_overlay(&detections, &policy, ViewportScale::new(640.0, 640.0));
        assert_eq!(overlay.len(), 1);
        assert_eq!(overlay[0].class_id, 1);
    }

    #[test]
    fn zero_source_width_collapses_to_origin() {
        assert_eq!(ViewportScale::new(800.0, 0.0).ratio(), 0.0);
    }

    #[test]
    fn reconcile_replaces_every_previous_element() -> Result<()> {
        let mut layer = OverlayLayer::new();
        let mut surface = MemorySurface::new();
        let scale = ViewportScale::new(640.0, 640.0);
        let a = OverlayElement::from_detection(&det(1, 0.9, [0.0, 0.0, 1.0, 1.0]), scale);

        let diff = layer.reconcile(vec![a.clone(), a.clone()], &mut surface)?;
        assert_eq!(diff, OverlayDiff { destroyed: 0, created: 2 });
        assert_eq!(surface.live_count(), 2);

        let diff = layer.reconcile(vec![a.clone()], &mut surface)?;
        assert_eq!(diff, OverlayDiff { destroyed: 2, created: 1 });
        assert_eq!(surface.live_count(), 1);
        assert_eq!(layer.len(), 1);

        let diff = layer.reconcile(Vec::new(), &mut surface)?;
        assert_eq!(diff, OverlayDiff { destroyed: 1, created: 0 });
        assert_eq!(surface.live_count(), 0);
        assert_eq!(surface.created_total(), 3);
        assert_eq!(surface.destroyed_total(), 3);
        Ok(())
    }

    #[test]
    fn json_lines_surface_writes_tagged_events() -> Result<()> {
        let mut surface = JsonLinesSurface::new(Vec::new());
        let element = OverlayElement::from_detection(
            &det(1, 0.5, [1.0, 2.0, 3.0, 4.0]),
            ViewportScale::new(640.0, 640.0),
        );
        surface.create(7, &element)?;
        surface.destroy(7)?;
        surface.show_alert("There is a person in front of you.")?;
        surface.hide_alert()?;

        let out = String::from_utf8(surface.into_inner())?;
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["op"], "create");
        assert_eq!(lines[0]["id"], 7);
        assert_eq!(lines[0]["element"]["caption"]["text"], "person - with 50% confidence.");
        assert_eq!(lines[1]["op"], "destroy");
        assert_eq!(lines[2]["message"], "There is a person in front of you.");
        assert_eq!(lines[3]["op"], "hide_alert");
        Ok(())
    }
}
