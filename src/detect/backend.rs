use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector backend.
///
/// A backend is unusable until `load` succeeds. The frame loop checks
/// `is_ready` before activating and treats an unloaded backend as a no-op.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load model weights. Called once at startup before any `detect`.
    fn load(&mut self) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Run detection on a frame.
    ///
    /// Boxes are reported in the frame's own pixel coordinates.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}
