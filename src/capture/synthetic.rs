//! Synthetic capture source (`stub://...`).
//!
//! Produces a drifting RGB gradient at the configured size. It paces itself
//! to `target_fps` (0 disables pacing) and can stop after `frame_limit`
//! frames, which keeps test runs finite.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{CaptureConstraints, CaptureError, CaptureSource, StreamInfo};
use crate::config::SourceSettings;
use crate::frame::{rgb_len, Frame};

pub struct SyntheticSource {
    settings: SourceSettings,
    opened: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            opened: false,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn pace(&mut self) {
        if self.settings.target_fps == 0 {
            return;
        }
        let interval = Duration::from_millis(1000 / self.settings.target_fps as u64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate_pixels(&self) -> Result<Vec<u8>> {
        let width = self.settings.width as u64;
        let mut pixels = vec![0u8; rgb_len(self.settings.width, self.settings.height)?];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i as u64 % width.max(1);
            let y = i as u64 / width.max(1);
            px[0] = ((x + self.frame_count) % 256) as u8;
            px[1] = ((y + self.frame_count / 2) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl CaptureSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.settings.url)
    }

    /// Synthetic cameras satisfy any facing constraint.
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<StreamInfo, CaptureError> {
        self.opened = true;
        log::info!(
            "SyntheticSource: opened {} ({}x{}, facing {:?})",
            self.settings.url,
            self.settings.width,
            self.settings.height,
            constraints.facing
        );
        Ok(StreamInfo {
            label: self.describe(),
            width: self.settings.width,
            height: self.settings.height,
            facing: constraints.facing,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.opened {
            return Err(anyhow!("synthetic source read before open"));
        }
        if self
            .settings
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.pace();
        self.frame_count += 1;
        let pixels = self.generate_pixels()?;
        Frame::new(
            self.frame_count,
            self.settings.width,
            self.settings.height,
            pixels,
        )
        .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SourceSettings {
        SourceSettings {
            url: "stub://test".to_string(),
            width: 8,
            height: 4,
            target_fps: 0,
            frame_limit: Some(2),
            ..SourceSettings::default()
        }
    }

    #[test]
    fn produces_frames_of_configured_size() -> Result<()> {
        let mut source = SyntheticSource::new(settings());
        source.open(&CaptureConstraints::default())?;
        let frame = source.next_frame()?.expect("frame");
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.pixels().len(), 8 * 4 * 3);
        Ok(())
    }

    #[test]
    fn frames_change_over_time() -> Result<()> {
        let mut source = SyntheticSource::new(settings());
        source.open(&CaptureConstraints::default())?;
        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn stops_at_frame_limit() -> Result<()> {
        let mut source = SyntheticSource::new(settings());
        source.open(&CaptureConstraints::default())?;
        source.next_frame()?;
        source.next_frame()?;
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.frames_captured(), 2);
        Ok(())
    }

    #[test]
    fn read_before_open_fails() {
        let mut source = SyntheticSource::new(settings());
        assert!(source.next_frame().is_err());
    }
}
