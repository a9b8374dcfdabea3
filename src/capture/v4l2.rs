//! V4L2 webcam source.
//!
//! Opens a local device node (e.g. `/dev/video0`), asks for RGB3 and falls
//! back to YUYV, which is converted to RGB24 per frame. A rear-camera request
//! needs `environment_url` to name the device that faces outward.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::io;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureConstraints, CaptureError, CaptureSource, FacingMode, StreamInfo};
use crate::config::SourceSettings;
use crate::frame::Frame;

pub struct V4l2Source {
    settings: SourceSettings,
    state: Option<V4l2State>,
    device_path: String,
    format: PixelFormat,
    width: u32,
    height: u32,
    /// Driver `bytesperline`; rows may be padded past `width * bpp`.
    stride: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            device_path: settings.url.clone(),
            width: settings.width,
            height: settings.height,
            settings,
            state: None,
            format: PixelFormat::Rgb24,
            stride: 0,
            frame_count: 0,
        }
    }

    fn select_device(&self, constraints: &CaptureConstraints) -> Result<String, CaptureError> {
        match constraints.facing {
            FacingMode::Any => Ok(self.settings.url.clone()),
            FacingMode::Environment => self.settings.environment_url.clone().ok_or_else(|| {
                CaptureError::Overconstrained(
                    "rear camera requested but no environment device is configured".to_string(),
                )
            }),
        }
    }

    fn device_error(&self, err: io::Error) -> CaptureError {
        match err.kind() {
            io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(self.device_path.clone())
            }
            io::ErrorKind::NotFound => {
                CaptureError::Unsupported(format!("{} does not exist", self.device_path))
            }
            _ => CaptureError::Device {
                device: self.device_path.clone(),
                source: err,
            },
        }
    }

    /// Negotiate RGB3, then YUYV.
    fn negotiate_format(&self, device: &mut v4l::Device) -> Result<v4l::Format, CaptureError> {
        use v4l::video::Capture;

        let mut format = device.format().map_err(|e| self.device_error(e))?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        for fourcc in [b"RGB3", b"YUYV"] {
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(active) if PixelFormat::from_fourcc(&active.fourcc.repr).is_some() => {
                    return Ok(active)
                }
                Ok(active) => log::debug!(
                    "V4l2Source: {} answered {} when asked for {}",
                    self.device_path,
                    active.fourcc,
                    format.fourcc
                ),
                Err(err) => log::warn!(
                    "V4l2Source: failed to set format {} on {}: {}",
                    format.fourcc,
                    self.device_path,
                    err
                ),
            }
        }
        Err(CaptureError::Unsupported(format!(
            "{} offers neither RGB3 nor YUYV",
            self.device_path
        )))
    }
}

impl CaptureSource for V4l2Source {
    fn describe(&self) -> String {
        format!("{} (v4l2)", self.device_path)
    }

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<StreamInfo, CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.device_path = self.select_device(constraints)?;
        let mut device =
            v4l::Device::with_path(&self.device_path).map_err(|e| self.device_error(e))?;
        let format = self.negotiate_format(&mut device)?;

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        self.width = format.width;
        self.height = format.height;
        self.stride = format.stride;
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).unwrap_or(PixelFormat::Rgb24);

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|e| self.device_error(e))?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?}, stride {})",
            self.device_path,
            self.width,
            self.height,
            self.format,
            self.stride
        );
        Ok(StreamInfo {
            label: self.describe(),
            width: self.width,
            height: self.height,
            facing: constraints.facing,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not opened")?;
        let (width, height, stride, format) = (self.width, self.height, self.stride, self.format);
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            normalize_to_rgb(buf, width, height, stride, format)
        })?;

        self.frame_count += 1;
        Frame::new(self.frame_count, width, height, pixels).map(Some)
    }
}
