use nalgebra as na;

use crate::bbox::{iou, BBox};

/// `tracks x detections` matrix of `1 - IoU`.
///
/// Either side being empty yields a matrix with no elements.
pub fn iou_cost(track_boxes: &[BBox], det_boxes: &[BBox]) -> na::DMatrix<f32> {
    if track_boxes.is_empty() || det_boxes.is_empty() {
        return na::DMatrix::zeros(0, 0);
    }

    na::DMatrix::from_fn(track_boxes.len(), det_boxes.len(), |r, c| {
        1.0 - iou(&track_boxes[r], &det_boxes[c])
    })
}
