//! The detection session and its frame loop.
//!
//! A `DetectionSession` owns everything one loop mutates: the detector, the
//! overlay layer, the staleness tracker, the clock, and the surface. Nothing
//! is shared with other threads except the capture slot, so no locking is
//! needed around session state.
//!
//! `run` re-arms only after the current inference resolves. It is not a
//! fixed-rate timer, so the effective frame rate is bounded by detector
//! latency, and frames captured in the meantime are dropped.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alert::{AlertTransition, AlertVisibility, StalenessTracker};
use crate::capture::{spawn_capture, CaptureConstraints, CaptureError, CaptureSource};
use crate::clock::{Clock, SystemClock};
use crate::detect::DetectorBackend;
use crate::frame::{Frame, LatestFrame, SlotRead};
use crate::overlay::{
    render_overlay, OverlayDiff, OverlayElement, OverlayLayer, OverlaySurface, ViewportScale,
};
use crate::policy::FilterPolicy;

/// How often a waiting loop re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of one loop iteration.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub frame_id: u64,
    /// Detections returned by the detector, before filtering.
    pub detections: usize,
    pub overlay: Vec<OverlayElement>,
    pub diff: OverlayDiff,
    pub alert: AlertVisibility,
    pub transition: Option<AlertTransition>,
    pub inference: Duration,
    pub timestamp_ms: u64,
}

#[derive(Debug)]
pub enum LoopExit {
    /// The detector was not loaded; activation was a no-op.
    DetectorNotReady,
    /// The stream could not be opened; the loop was never entered.
    CaptureUnavailable(CaptureError),
    Cancelled,
    IterationLimit,
    SourceEnded,
}

#[derive(Debug)]
pub struct LoopSummary {
    pub iterations: u64,
    /// Frames overwritten while the detector was busy.
    pub dropped_frames: u64,
    pub exit: LoopExit,
}

impl LoopSummary {
    fn not_started(exit: LoopExit) -> Self {
        Self {
            iterations: 0,
            dropped_frames: 0,
            exit,
        }
    }
}

/// Filtering and scaling applied to every frame of a session.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub policy: FilterPolicy,
    pub scale: ViewportScale,
    pub alert_timeout_ms: u64,
}

pub struct DetectionSession<S: OverlaySurface> {
    detector: Box<dyn DetectorBackend>,
    policy: FilterPolicy,
    scale: ViewportScale,
    layer: OverlayLayer,
    tracker: StalenessTracker,
    clock: Box<dyn Clock>,
    surface: S,
}

impl<S: OverlaySurface> DetectionSession<S> {
    pub fn new(detector: Box<dyn DetectorBackend>, settings: SessionSettings, surface: S) -> Self {
        Self {
            detector,
            policy: settings.policy,
            scale: settings.scale,
            layer: OverlayLayer::new(),
            tracker: StalenessTracker::new(settings.alert_timeout_ms),
            clock: Box::new(SystemClock),
            surface,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_ready()
    }

    /// Load the detector. Must succeed before the loop does anything.
    pub fn load_detector(&mut self) -> Result<()> {
        let name = self.detector.name();
        self.detector
            .load()
            .with_context(|| format!("failed to load {} detector", name))
    }

    /// One iteration: detect, render, reconcile, track.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport> {
        let started = Instant::now();
        let detections = self
            .detector
            .detect(frame)
            .with_context(|| format!("detection failed on frame {}", frame.id))?;
        let inference = started.elapsed();
        let now_ms = self.clock.now_ms();

        let overlay = render_overlay(&detections, &self.policy, self.scale);
        let diff = self.layer.reconcile(overlay.clone(), &mut self.surface)?;

        let newest_label = overlay.last().map(|element| element.label.as_str());
        let transition = self.tracker.observe(now_ms, newest_label);
        match transition {
            Some(AlertTransition::Shown) => {
                if let Some(message) = self.tracker.message() {
                    self.surface.show_alert(message)?;
                }
            }
            Some(AlertTransition::Hidden) => self.surface.hide_alert()?,
            None => {}
        }

        log::trace!(
            "frame {}: {} detections, {} overlays, {:?} inference",
            frame.id,
            detections.len(),
            overlay.len(),
            inference
        );

        Ok(FrameReport {
            frame_id: frame.id,
            detections: detections.len(),
            overlay,
            diff,
            alert: self.tracker.visibility(),
            transition,
            inference,
            timestamp_ms: now_ms,
        })
    }

    /// Run the frame loop on `source` until cancelled, the source ends, or
    /// `limit` iterations have completed.
    ///
    /// An unloaded detector makes this a no-op. A source that cannot be
    /// opened is logged and the loop is never entered. A detector error
    /// stops capture and is returned.
    pub fn run(
        &mut self,
        mut source: Box<dyn CaptureSource>,
        constraints: &CaptureConstraints,
        cancel: &CancelToken,
        limit: Option<u64>,
    ) -> Result<LoopSummary> {
        if !self.detector.is_ready() {
            log::debug!(
                "{} detector not loaded; ignoring activation",
                self.detector.name()
            );
            return Ok(LoopSummary::not_started(LoopExit::DetectorNotReady));
        }

        let stream = match source.open(constraints) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("{}: {}", source.describe(), err);
                return Ok(LoopSummary::not_started(LoopExit::CaptureUnavailable(err)));
            }
        };
        log::info!(
            "frame loop started on {} ({}x{}), overlay scale {:.3}",
            stream.label,
            stream.width,
            stream.height,
            self.scale.ratio()
        );

        let slot = LatestFrame::new();
        let stop = CancelToken::new();
        let capture = spawn_capture(source, slot.clone(), stop.clone());

        let mut iterations = 0u64;
        let outcome = loop {
            if limit.is_some_and(|limit| iterations >= limit) {
                break Ok(LoopExit::IterationLimit);
            }
            match slot.wait_next(cancel, CANCEL_POLL) {
                Ok(SlotRead::Frame(frame)) => match self.process_frame(&frame) {
                    Ok(_) => iterations += 1,
                    Err(err) => break Err(err),
                },
                Ok(SlotRead::Closed) => break Ok(LoopExit::SourceEnded),
                Ok(SlotRead::Cancelled) => break Ok(LoopExit::Cancelled),
                Err(err) => break Err(err),
            }
        };

        stop.cancel();
        let captured = capture
            .join()
            .map_err(|_| anyhow::anyhow!("capture thread panicked"))?;
        let exit = outcome?;
        let captured = captured.context("capture failed")?;

        let summary = LoopSummary {
            iterations,
            dropped_frames: slot.dropped()?,
            exit,
        };
        log::info!(
            "frame loop stopped ({:?}): {} iterations, {} frames captured, {} dropped",
            summary.exit,
            summary.iterations,
            captured,
            summary.dropped_frames
        );
        Ok(summary)
    }

    pub fn live_overlay(&self) -> impl Iterator<Item = &OverlayElement> {
        self.layer.elements()
    }

    pub fn live_overlay_count(&self) -> usize {
        self.layer.len()
    }

    pub fn alert(&self) -> &StalenessTracker {
        &self.tracker
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::{BoundingBox, Detection, ScriptedBackend};
    use crate::overlay::MemorySurface;
    use crate::policy::ObstacleSet;

    fn det(class_id: u32, label: &str, score: f32) -> Detection {
        Detection::new(class_id, label, score, BoundingBox::new(10.0, 10.0, 50.0, 50.0))
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            policy: FilterPolicy::new(ObstacleSet::new([1, 3]), 0.66).unwrap(),
            scale: ViewportScale::new(1280.0, 640.0),
            alert_timeout_ms: 5_000,
        }
    }

    fn session(frames: Vec<Vec<Detection>>, clock: &ManualClock) -> DetectionSession<MemorySurface> {
        DetectionSession::new(
            Box::new(ScriptedBackend::loaded(frames)),
            settings(),
            MemorySurface::new(),
        )
        .with_clock(clock.clone())
    }

    #[test]
    fn mixed_frame_produces_single_overlay() -> Result<()> {
        let clock = ManualClock::new(0);
        let mut session = session(
            vec![vec![
                det(1, "person", 0.70),
                det(2, "bicycle", 0.99),
                det(3, "car", 0.50),
            ]],
            &clock,
        );
        let report = session.process_frame(&Frame::blank(1, 2, 2)?)?;
        assert_eq!(report.detections, 3);
        assert_eq!(report.overlay.len(), 1);
        assert_eq!(report.overlay[0].class_id, 1);
        assert_eq!(session.surface().live_count(), 1);
        Ok(())
    }

    #[test]
    fn overlay_never_carries_elements_across_frames() -> Result<()> {
        let clock = ManualClock::new(0);
        let mut session = session(
            vec![
                vec![det(1, "person", 0.9), det(3, "car", 0.8)],
                vec![det(3, "car", 0.95)],
                vec![],
            ],
            &clock,
        );
        let frame = Frame::blank(1, 2, 2)?;

        let first = session.process_frame(&frame)?;
        assert_eq!(first.diff, OverlayDiff { destroyed: 0, created: 2 });
        let second = session.process_frame(&frame)?;
        assert_eq!(second.diff, OverlayDiff { destroyed: 2, created: 1 });
        assert_eq!(session.surface().live_count(), 1);
        assert_eq!(session.live_overlay().next().map(|e| e.class_id), Some(3));
        let third = session.process_frame(&frame)?;
        assert_eq!(third.diff, OverlayDiff { destroyed: 1, created: 0 });
        assert_eq!(session.surface().live_count(), 0);
        Ok(())
    }

    #[test]
    fn alert_follows_last_qualifying_label_and_times_out() -> Result<()> {
        let clock = ManualClock::new(10_000);
        let mut session = session(
            vec![
                vec![det(1, "person", 0.9), det(3, "car", 0.9)],
                vec![],
                vec![],
            ],
            &clock,
        );
        let frame = Frame::blank(1, 2, 2)?;

        let report = session.process_frame(&frame)?;
        assert_eq!(report.transition, Some(AlertTransition::Shown));
        assert_eq!(
            session.surface().alert(),
            Some("There is a car in front of you.")
        );

        clock.advance(5_000);
        let report = session.process_frame(&frame)?;
        assert_eq!(report.alert, AlertVisibility::Visible);

        clock.advance(1);
        let report = session.process_frame(&frame)?;
        assert_eq!(report.transition, Some(AlertTransition::Hidden));
        assert_eq!(report.alert, AlertVisibility::Hidden);
        assert_eq!(session.surface().alert(), None);
        Ok(())
    }

    #[test]
    fn unloaded_detector_makes_run_a_noop() -> Result<()> {
        let mut session = DetectionSession::new(
            Box::new(ScriptedBackend::new(vec![vec![det(1, "person", 0.9)]])),
            settings(),
            MemorySurface::new(),
        );
        let source = crate::capture::open_source(&crate::config::SourceSettings::default())?;
        let summary = session.run(
            source,
            &CaptureConstraints::default(),
            &CancelToken::new(),
            Some(3),
        )?;
        assert!(matches!(summary.exit, LoopExit::DetectorNotReady));
        assert_eq!(summary.iterations, 0);
        assert_eq!(session.surface().created_total(), 0);
        Ok(())
    }

    #[test]
    fn detector_errors_propagate_from_process_frame() -> Result<()> {
        let mut session = DetectionSession::new(
            Box::new(ScriptedBackend::new(Vec::new())),
            settings(),
            MemorySurface::new(),
        );
        assert!(session.process_frame(&Frame::blank(1, 1, 1)?).is_err());
        assert_eq!(session.live_overlay_count(), 0);
        Ok(())
    }

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }
}
