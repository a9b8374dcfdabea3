//! Camera capture sources.
//!
//! - Synthetic source (`stub://...`) for tests and demos
//! - Local V4L2 webcams (feature: ingest-v4l2)
//!
//! Every source produces RGB24 `Frame`s. `spawn_capture` runs a source on its
//! own thread and publishes into a `LatestFrame` slot, so a slow detector
//! only ever sees the newest frame.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod profile;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use std::thread::JoinHandle;

pub use profile::{CaptureConstraints, DeviceProfile, FacingMode, Viewport};
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

use crate::config::SourceSettings;
use crate::frame::{Frame, LatestFrame};
use crate::session::CancelToken;

/// Reasons a camera stream could not be started.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera capture is not supported: {0}")]
    Unsupported(String),

    #[error("camera permission denied for {0}")]
    PermissionDenied(String),

    #[error("no camera satisfies the requested constraints: {0}")]
    Overconstrained(String),

    #[error("camera device {device} failed")]
    Device {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

/// Properties of an opened stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub facing: FacingMode,
}

/// A camera that yields RGB24 frames once opened.
pub trait CaptureSource: Send {
    /// Human-readable source name for logs.
    fn describe(&self) -> String;

    /// Request the stream. Nothing is captured before this succeeds.
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<StreamInfo, CaptureError>;

    /// Next frame, or `None` when a finite source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Pick a source implementation for the configured URL.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn CaptureSource>, CaptureError> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    device_source(settings)
}

#[cfg(feature = "ingest-v4l2")]
fn device_source(settings: &SourceSettings) -> Result<Box<dyn CaptureSource>, CaptureError> {
    Ok(Box::new(V4l2Source::new(settings.clone())))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn device_source(settings: &SourceSettings) -> Result<Box<dyn CaptureSource>, CaptureError> {
    Err(CaptureError::Unsupported(format!(
        "{} requires the ingest-v4l2 feature",
        settings.url
    )))
}

/// Run `source` on a capture thread until it ends, fails, or `stop` trips.
///
/// The slot is closed when the thread exits for any reason. The thread
/// returns the number of frames it published.
pub fn spawn_capture(
    mut source: Box<dyn CaptureSource>,
    slot: LatestFrame,
    stop: CancelToken,
) -> JoinHandle<Result<u64>> {
    std::thread::spawn(move || {
        let result = (|| -> Result<u64> {
            let mut published = 0u64;
            while !stop.is_cancelled() {
                match source.next_frame()? {
                    Some(frame) => {
                        slot.publish(frame)?;
                        published += 1;
                    }
                    None => {
                        log::info!("{}: stream ended after {} frames", source.describe(), published);
                        break;
                    }
                }
            }
            Ok(published)
        })();
        if let Err(err) = slot.close() {
            log::warn!("failed to close frame slot: {}", err);
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_urls_are_unsupported_without_v4l2() {
        let settings = SourceSettings {
            url: "/dev/video0".to_string(),
            ..SourceSettings::default()
        };
        assert!(matches!(
            open_source(&settings),
            Err(CaptureError::Unsupported(_))
        ));
    }

    #[test]
    fn capture_thread_publishes_until_source_ends() -> Result<()> {
        let settings = SourceSettings {
            url: "stub://test".to_string(),
            width: 4,
            height: 2,
            target_fps: 0,
            frame_limit: Some(5),
            ..SourceSettings::default()
        };
        let mut source = open_source(&settings)?;
        source.open(&CaptureConstraints::default())?;

        let slot = LatestFrame::new();
        let handle = spawn_capture(source, slot.clone(), CancelToken::new());
        let published = handle.join().expect("capture thread")?;

        assert_eq!(published, 5);
        assert_eq!(slot.published()?, 5);
        let last = slot.try_take()?.expect("latest frame");
        assert_eq!(last.id, 5);
        Ok(())
    }
}
