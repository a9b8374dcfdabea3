//! Obstacle filtering policy.
//!
//! A detection qualifies for an overlay iff its class id is in the obstacle
//! set AND its score is strictly above the minimum score.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

use crate::detect::Detection;

/// Default minimum score. Comparison is strict (`score > 0.66`).
pub const DEFAULT_MIN_SCORE: f32 = 0.66;

/// COCO class ids treated as obstacles by default: person, bicycle, car,
/// motorcycle, bus, train, truck, fire hydrant, dog, suitcase, sports ball,
/// skateboard, bottle, potted plant.
pub const DEFAULT_OBSTACLE_CLASSES: &[u32] = &[1, 2, 3, 4, 6, 7, 8, 11, 18, 33, 37, 41, 44, 64];

/// Fixed set of class ids that count as obstacles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObstacleSet {
    classes: BTreeSet<u32>,
}

impl ObstacleSet {
    pub fn new<I: IntoIterator<Item = u32>>(classes: I) -> Self {
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn contains(&self, class_id: u32) -> bool {
        self.classes.contains(&class_id)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.classes.iter().copied()
    }
}

impl Default for ObstacleSet {
    fn default() -> Self {
        Self::new(DEFAULT_OBSTACLE_CLASSES.iter().copied())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterPolicy {
    pub obstacles: ObstacleSet,
    pub min_score: f32,
}

impl FilterPolicy {
    pub fn new(obstacles: ObstacleSet, min_score: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_score) {
            return Err(anyhow!("min_score must be within [0, 1], got {}", min_score));
        }
        Ok(Self {
            obstacles,
            min_score,
        })
    }

    pub fn qualifies(&self, detection: &Detection) -> bool {
        self.obstacles.contains(detection.class_id) && detection.score > self.min_score
    }

    /// Qualifying detections, in detector order.
    pub fn select<'a>(
        &'a self,
        detections: &'a [Detection],
    ) -> impl Iterator<Item = &'a Detection> + 'a {
        detections.iter().filter(move |d| self.qualifies(d))
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            obstacles: ObstacleSet::default(),
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(class_id: u32, score: f32) -> Detection {
        Detection::new(class_id, "thing", score, BoundingBox::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn qualifies_requires_class_and_strict_score() {
        let policy = FilterPolicy::new(ObstacleSet::new([1, 3]), 0.66).unwrap();
        assert!(policy.qualifies(&det(1, 0.70)));
        assert!(!policy.qualifies(&det(2, 0.99)));
        assert!(!policy.qualifies(&det(3, 0.50)));
        assert!(!policy.qualifies(&det(1, 0.66)));
    }

    #[test]
    fn select_keeps_detector_order() {
        let policy = FilterPolicy::default();
        let detections = vec![det(3, 0.9), det(5, 0.9), det(1, 0.8)];
        let ids: Vec<u32> = policy.select(&detections).map(|d| d.class_id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn default_set_matches_obstacle_classes() {
        let set = ObstacleSet::default();
        assert_eq!(set.len(), DEFAULT_OBSTACLE_CLASSES.len());
        assert!(set.contains(1));
        assert!(set.contains(64));
        assert!(!set.contains(5));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        assert!(FilterPolicy::new(ObstacleSet::default(), 1.5).is_err());
        assert!(FilterPolicy::new(ObstacleSet::default(), -0.1).is_err());
    }
}
