use serde_derive::{Deserialize, Serialize};

/// Left-top-right-bottom box in integer pixel coordinates.
///
/// Edges are inclusive: a box spanning `x1..=x2` is `x2 - x1 + 1` pixels wide.
/// Well-formed boxes have `x1 < x2` and `y1 < y2`.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl From<[i32; 4]> for BBox {
    #[inline]
    fn from(v: [i32; 4]) -> Self {
        BBox::ltrb(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [i32; 4] {
    #[inline]
    fn from(bbox: BBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

impl BBox {
    #[inline]
    pub const fn ltrb(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline(always)]
    pub fn is_well_formed(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    #[inline(always)]
    pub fn width(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64 + 1).max(0)
    }

    #[inline(always)]
    pub fn height(&self) -> i64 {
        (self.y2 as i64 - self.y1 as i64 + 1).max(0)
    }

    #[inline]
    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Left, top, width, height with exclusive right/bottom edges, as drawing APIs expect.
    #[inline]
    pub fn as_ltwh(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2 - self.x1, self.y2 - self.y1]
    }

    /// Clamps every coordinate into `[0, width] x [0, height]`.
    pub fn clamp(&self, width: u32, height: u32) -> BBox {
        let w = width.min(i32::MAX as u32) as i32;
        let h = height.min(i32::MAX as u32) as i32;

        BBox::ltrb(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        )
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        iou(self, other)
    }
}

/// Intersection over union of two boxes, in `[0, 1]`.
///
/// Disjoint boxes give 0. A zero union (both boxes empty) also gives 0.
pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let inter = BBox::ltrb(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2));
    let i_area = inter.area();
    let union = a.area() + b.area() - i_area;

    if union <= 0 {
        return 0.0;
    }

    (i_area as f64 / union as f64) as f32
}
