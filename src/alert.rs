//! Obstacle alert staleness tracking.
//!
//! Two states, `Visible` and `Hidden`. A frame with a qualifying detection
//! shows the alert and refreshes the timestamp. Any other frame hides it once
//! the gap since the last qualifying detection exceeds the timeout. The check
//! only runs when a frame is observed, so a stalled detector never hides it.

use serde::Serialize;

/// Quiet period after which the alert is hidden.
pub const DEFAULT_ALERT_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertVisibility {
    Visible,
    Hidden,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertTransition {
    Shown,
    Hidden,
}

/// Alert header text for an obstacle label.
pub fn alert_message(label: &str) -> String {
    format!("There is a {} in front of you.", label)
}

#[derive(Clone, Debug)]
pub struct StalenessTracker {
    timeout_ms: u64,
    last_qualifying_ms: Option<u64>,
    visibility: AlertVisibility,
    message: Option<String>,
}

impl StalenessTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            last_qualifying_ms: None,
            visibility: AlertVisibility::Hidden,
            message: None,
        }
    }

    /// Feed one completed iteration.
    ///
    /// `newest_label` is the label of the last qualifying detection in the
    /// frame, if any. Returns the state change, if one happened. A new label
    /// while already visible is reported as `Shown` so the header text updates.
    pub fn observe(&mut self, now_ms: u64, newest_label: Option<&str>) -> Option<AlertTransition> {
        if let Some(label) = newest_label {
            self.last_qualifying_ms = Some(now_ms);
            let message = alert_message(label);
            let changed = self.visibility != AlertVisibility::Visible
                || self.message.as_deref() != Some(message.as_str());
            self.visibility = AlertVisibility::Visible;
            self.message = Some(message);
            return changed.then_some(AlertTransition::Shown);
        }

        if self.visibility == AlertVisibility::Visible && self.is_stale(now_ms) {
            self.visibility = AlertVisibility::Hidden;
            return Some(AlertTransition::Hidden);
        }
        None
    }

    fn is_stale(&self, now_ms: u64) -> bool {
        match self.last_qualifying_ms {
            Some(last) => now_ms.saturating_sub(last) > self.timeout_ms,
            None => true,
        }
    }

    pub fn visibility(&self) -> AlertVisibility {
        self.visibility
    }

    /// Current header text. Kept after hiding so it can be inspected.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn last_qualifying_ms(&self) -> Option<u64> {
        self.last_qualifying_ms
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

impl Default for StalenessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_hidden_and_stays_hidden_without_obstacles() {
        let mut tracker = StalenessTracker::default();
        assert_eq!(tracker.visibility(), AlertVisibility::Hidden);
        assert_eq!(tracker.observe(100_000, None), None);
        assert_eq!(tracker.visibility(), AlertVisibility::Hidden);
    }

    #[test]
    fn hides_only_after_gap_exceeds_timeout() {
        let mut tracker = StalenessTracker::default();
        assert_eq!(
            tracker.observe(1_000, Some("person")),
            Some(AlertTransition::Shown)
        );
        assert_eq!(tracker.message(), Some("There is a person in front of you."));

        assert_eq!(tracker.observe(6_000, None), None);
        assert_eq!(tracker.visibility(), AlertVisibility::Visible);

        assert_eq!(tracker.observe(6_001, None), Some(AlertTransition::Hidden));
        assert_eq!(tracker.visibility(), AlertVisibility::Hidden);
        assert_eq!(tracker.observe(9_000, None), None);
    }

    #[test]
    fn qualifying_frame_refreshes_timestamp() {
        let mut tracker = StalenessTracker::new(5_000);
        tracker.observe(0, Some("car"));
        assert_eq!(tracker.observe(4_000, Some("car")), None);
        assert_eq!(tracker.last_qualifying_ms(), Some(4_000));
        assert_eq!(tracker.observe(8_500, None), None);
        assert_eq!(tracker.visibility(), AlertVisibility::Visible);
    }

    #[test]
    fn label_change_while_visible_is_reported() {
        let mut tracker = StalenessTracker::default();
        tracker.observe(0, Some("car"));
        assert_eq!(tracker.observe(10, Some("dog")), Some(AlertTransition::Shown));
        assert_eq!(tracker.message(), Some("There is a dog in front of you."));
    }

    #[test]
    fn clock_going_backwards_does_not_hide() {
        let mut tracker = StalenessTracker::default();
        tracker.observe(10_000, Some("bus"));
        assert_eq!(tracker.observe(2_000, None), None);
        assert_eq!(tracker.visibility(), AlertVisibility::Visible);
    }
}
