use ndarray::prelude::*;

use crate::bbox::BBox;

/// Cropped person image, `rows x cols x channels`.
pub type Crop = Array3<u8>;

pub struct Frame {
    pub index: u64,
    pub timestamp: f32, // in seconds
    /// Interleaved pixels, `rows x cols x channels`.
    pub image: Array3<u8>,
}

impl Frame {
    #[inline]
    pub fn new(index: u64, timestamp: f32, image: Array3<u8>) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }

    /// `(width, height)` in pixels.
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        let (rows, cols, _) = self.image.dim();
        (cols as u32, rows as u32)
    }

    /// Copies the region under `bbox`, clamped to the frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn crop(&self, bbox: &BBox) -> Option<Crop> {
        let (width, height) = self.dims();
        let b = bbox.clamp(width, height);

        if b.x2 <= b.x1 || b.y2 <= b.y1 {
            return None;
        }

        let (x1, y1, x2, y2) = (b.x1 as usize, b.y1 as usize, b.x2 as usize, b.y2 as usize);

        Some(self.image.slice(s![y1..y2, x1..x2, ..]).to_owned())
    }
}
