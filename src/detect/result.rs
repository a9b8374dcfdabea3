use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixel coordinates.
///
/// Serialized as `[x, y, width, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x, y, width, height]: [f32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One object reported by a detector backend for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub label: String,
    /// Detector confidence in [0, 1].
    pub score: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, label: impl Into<String>, score: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            label: label.into(),
            score,
            bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_reads_as_array() {
        let json = r#"{"class_id":3,"label":"car","score":0.9,"bbox":[10,20,30,40]}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.bbox, BoundingBox::new(10.0, 20.0, 30.0, 40.0));
        assert_eq!(det.label, "car");
    }
}
