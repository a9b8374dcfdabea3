//! Device-class heuristics for camera selection and coordinate scaling.

use serde::Serialize;

/// Source width assumed for desktops and landscape phones.
pub const LANDSCAPE_SOURCE_WIDTH: u32 = 640;
/// Source width assumed for phones held in portrait.
pub const PORTRAIT_SOURCE_WIDTH: u32 = 480;

const MOBILE_MARKERS: &[&str] = &["iPhone", "iPad", "iPod", "Android"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.width < self.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Any camera will do.
    Any,
    /// Exactly the rear ("environment") camera.
    Environment,
}

/// What the frame loop asks of a capture source. Video only, no audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub facing: FacingMode,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::Any,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceProfile {
    pub mobile: bool,
    pub portrait: bool,
}

impl DeviceProfile {
    /// Classify a client from its user-agent string and viewport.
    ///
    /// A marker only counts when it appears after the first character, which
    /// is where real user agents carry it (`Mozilla/5.0 (iPhone; ...`).
    pub fn detect(user_agent: &str, viewport: Viewport) -> Self {
        let mobile = MOBILE_MARKERS
            .iter()
            .any(|marker| user_agent.find(marker).is_some_and(|pos| pos > 0));
        Self {
            mobile,
            portrait: viewport.is_portrait(),
        }
    }

    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            facing: if self.mobile {
                FacingMode::Environment
            } else {
                FacingMode::Any
            },
        }
    }

    /// Heuristic source width used for overlay scaling. Not measured from
    /// the stream.
    pub fn assumed_source_width(&self) -> u32 {
        if self.mobile && self.portrait {
            PORTRAIT_SOURCE_WIDTH
        } else {
            LANDSCAPE_SOURCE_WIDTH
        }
    }
}
