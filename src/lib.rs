//! Obstacle Watch
//!
//! Runs an object detector over a live camera stream and keeps an overlay of
//! nearby obstacles in sync with the newest frame.
//!
//! # Module Structure
//!
//! - `capture`: camera sources (synthetic, V4L2) and device profiles
//! - `detect`: detector backends and the COCO label table
//! - `policy`: which detections count as obstacles
//! - `overlay`: pure overlay rendering and reconciliation onto a surface
//! - `alert`: the "There is a ... in front of you." staleness tracker
//! - `session`: the frame loop that ties the above together
//! - `frame`, `clock`, `config`: shared plumbing

pub mod alert;
pub mod capture;
pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod overlay;
pub mod policy;
pub mod session;

pub use alert::{alert_message, AlertTransition, AlertVisibility, StalenessTracker};
pub use capture::{
    open_source, CaptureConstraints, CaptureError, CaptureSource, DeviceProfile, FacingMode,
    StreamInfo, SyntheticSource, Viewport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, BackendKind, DetectorSettings, SourceSettings, ViewportSettings};
pub use detect::{BoundingBox, Detection, DetectorBackend, ScriptedBackend};
pub use frame::{Frame, LatestFrame, SlotRead};
pub use overlay::{
    caption_text, render_overlay, JsonLinesSurface, LogSurface, MemorySurface, OverlayDiff,
    OverlayElement, OverlayLayer, OverlaySurface, ViewportScale,
};
pub use policy::{FilterPolicy, ObstacleSet};
pub use session::{
    CancelToken, DetectionSession, FrameReport, LoopExit, LoopSummary, SessionSettings,
};
