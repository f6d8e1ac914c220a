use crate::bbox::BBox;
use crate::clip_buffer::ClipBuffer;
use crate::frame::Crop;

pub type TrackId = u64;

pub const UNKNOWN_ACTIVITY: &str = "unknown";

/// One followed person.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: TrackId,
    pub bbox: BBox,
    pub buffer: ClipBuffer<Crop>,
    pub last_activity: String,

    // consecutive updates without a match
    pub misses: u32,
}

impl Track {
    pub fn new(track_id: TrackId, bbox: BBox, clip_len: usize) -> Self {
        Self {
            track_id,
            bbox,
            buffer: ClipBuffer::with_capacity(clip_len),
            last_activity: UNKNOWN_ACTIVITY.to_string(),
            misses: 0,
        }
    }

    #[inline]
    pub fn hit(&mut self, bbox: BBox) {
        self.bbox = bbox;
        self.misses = 0;
    }

    #[inline]
    pub fn miss(&mut self) {
        self.misses = self.misses.saturating_add(1);
    }
}
