use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::BBox;

/// One detector output for a single frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    #[serde(rename = "b")]
    pub bbox: BBox,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c", default)]
    pub class: i32,
}

impl Detection {
    #[inline]
    pub fn new(bbox: BBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            class: 0,
        }
    }
}

/// Keeps detections of `class` with at least `min_confidence`.
///
/// Malformed boxes break the detector contract and are dropped here so the
/// tracker never sees them.
pub fn select(detections: Vec<Detection>, class: i32, min_confidence: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|det| det.class == class && det.confidence >= min_confidence)
        .filter(|det| {
            if det.bbox.is_well_formed() {
                true
            } else {
                debug!("dropping malformed detection box {:?}", det.bbox);
                false
            }
        })
        .collect()
}
