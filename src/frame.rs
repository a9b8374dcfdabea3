//! Captured frames and the latest-frame slot.
//!
//! - `Frame`: one RGB24 image handed from a capture source to the detector.
//! - `LatestFrame`: single-slot mailbox between the capture thread and the
//!   frame loop. Publishing overwrites any frame the loop has not taken yet,
//!   so the loop always works on the most recent frame and intermediate
//!   frames are dropped.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::session::CancelToken;

/// One captured RGB24 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Monotonic id assigned by the capture source.
    pub id: u64,
    pub width: u32,
    pub height: u32,
    /// Capture instant (for latency logging).
    pub captured_at: Instant,
    pixels: Vec<u8>,
}

impl Frame {
    /// Create a frame. `pixels` must hold exactly `width * height * 3` bytes
    /// and both dimensions must be non-zero.
    pub fn new(id: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("empty frame {}x{}", width, height));
        }
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            id,
            width,
            height,
            captured_at: Instant::now(),
            pixels,
        })
    }

    /// Solid black frame, mostly for tests.
    pub fn blank(id: u64, width: u32, height: u32) -> Result<Self> {
        Self::new(id, width, height, vec![0u8; rgb_len(width, height)?])
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB triple at `(x, y)`. Coordinates are clamped to the frame.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let y = y.min(self.height.saturating_sub(1)) as usize;
        let idx = (y * self.width as usize + x) * 3;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// Result of waiting on the slot.
#[derive(Debug)]
pub enum SlotRead {
    Frame(Frame),
    /// The producer closed the slot and no frame is pending.
    Closed,
    Cancelled,
}

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    closed: bool,
    published: u64,
    dropped: u64,
}

/// Single-slot, newest-wins frame mailbox. Clones share the slot.
#[derive(Clone, Default)]
pub struct LatestFrame {
    inner: Arc<(Mutex<SlotState>, Condvar)>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame, replacing any frame not yet taken.
    pub fn publish(&self, frame: Frame) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        if state.frame.replace(frame).is_some() {
            state.dropped += 1;
        }
        state.published += 1;
        cvar.notify_one();
        Ok(())
    }

    /// Mark the producer as finished. A pending frame can still be taken.
    pub fn close(&self) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        state.closed = true;
        cvar.notify_all();
        Ok(())
    }

    /// Take the pending frame without waiting.
    pub fn try_take(&self) -> Result<Option<Frame>> {
        let (lock, _) = &*self.inner;
        let mut state = lock
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        Ok(state.frame.take())
    }

    /// Block until a frame is available, the slot is closed, or `cancel` trips.
    ///
    /// The cancellation token is polled every `poll` interval.
    pub fn wait_next(&self, cancel: &CancelToken, poll: Duration) -> Result<SlotRead> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        loop {
            if cancel.is_cancelled() {
                return Ok(SlotRead::Cancelled);
            }
            if let Some(frame) = state.frame.take() {
                return Ok(SlotRead::Frame(frame));
            }
            if state.closed {
                return Ok(SlotRead::Closed);
            }
            let (guard, _timeout) = cvar
                .wait_timeout(state, poll)
                .map_err(|_| anyhow!("frame slot lock poisoned"))?;
            state = guard;
        }
    }

    /// Frames overwritten before the loop took them.
    pub fn dropped(&self) -> Result<u64> {
        self.inner
            .0
            .lock()
            .map(|state| state.dropped)
            .map_err(|_| anyhow!("frame slot lock poisoned"))
    }

    pub fn published(&self) -> Result<u64> {
        self.inner
            .0
            .lock()
            .map(|state| state.published)
            .map_err(|_| anyhow!("frame slot lock poisoned"))
    }
}
