use log::debug;

use crate::assignment::assign;
use crate::bbox::BBox;
use crate::cost::iou_cost;
use crate::frame::{Crop, Frame};
use crate::track::{Track, TrackId};
use crate::Detection;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// A track and a detection are linked only when their IoU is above this.
    pub iou_threshold: f32,
    /// Crops accumulated per track before a classification attempt.
    pub clip_buffer_size: usize,
    /// Evict a track once it went unmatched more than this many updates.
    /// `None` keeps every track for the lifetime of the store.
    pub max_misses: Option<u32>,
}

/// What one `update` did, by track id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// `(track id, detection index)`
    pub matched: Vec<(TrackId, usize)>,
    pub created: Vec<TrackId>,
    pub evicted: Vec<TrackId>,
}

/// A track's buffer reached capacity; `frames` is its drained content.
#[derive(Debug)]
pub struct FullClip {
    pub track_id: TrackId,
    pub frames: Vec<Crop>,
}

pub struct TrackStore {
    config: TrackerConfig,
    // sorted by id, ids are handed out in increasing order
    tracks: Vec<Track>,
    next_id: TrackId,
}

impl TrackStore {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(32),
            next_id: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        let idx = self.tracks.binary_search_by_key(&id, |t| t.track_id).ok()?;
        Some(&self.tracks[idx])
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        let idx = self.tracks.binary_search_by_key(&id, |t| t.track_id).ok()?;
        Some(&mut self.tracks[idx])
    }

    /// Links `detections` to the current tracks and creates tracks for the rest.
    ///
    /// Unmatched tracks keep their previous box.
    pub fn update(&mut self, detections: &[Detection]) -> UpdateReport {
        let mut report = UpdateReport::default();

        if self.tracks.is_empty() {
            for det in detections {
                report.created.push(self.spawn(det.bbox));
            }

            return report;
        }

        let track_boxes: Vec<BBox> = self.tracks.iter().map(|t| t.bbox).collect();
        let det_boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
        let cost = iou_cost(&track_boxes, &det_boxes);

        let mut matched = vec![false; self.tracks.len()];
        let mut unmatched_dets: Vec<usize> = (0..detections.len()).collect();

        if !cost.is_empty() {
            let assignment = assign(&cost, 1.0 - self.config.iou_threshold);

            for &(r, c) in &assignment.matches {
                let track = &mut self.tracks[r];
                track.hit(det_boxes[c]);
                matched[r] = true;
                report.matched.push((track.track_id, c));
            }

            unmatched_dets = assignment.unmatched_cols;
        }

        for (track, hit) in self.tracks.iter_mut().zip(&matched) {
            if !hit {
                track.miss();
            }
        }

        if let Some(max_misses) = self.config.max_misses {
            let evicted = &mut report.evicted;

            self.tracks.retain(|t| {
                if t.misses > max_misses {
                    debug!("evicting track {} after {} misses", t.track_id, t.misses);
                    evicted.push(t.track_id);
                    false
                } else {
                    true
                }
            });
        }

        for c in unmatched_dets {
            report.created.push(self.spawn(det_boxes[c]));
        }

        report
    }

    /// Crops every track out of `frame` and appends it to the track's buffer.
    ///
    /// Buffers that fill up are drained and returned. Tracks whose box lies
    /// outside the frame skip this frame.
    pub fn accumulate(&mut self, frame: &Frame) -> Vec<FullClip> {
        let mut full = Vec::new();

        for track in self.tracks.iter_mut() {
            let crop = match frame.crop(&track.bbox) {
                Some(crop) => crop,
                None => {
                    debug!(
                        "track {} box {:?} is outside frame {}, skipping crop",
                        track.track_id, track.bbox, frame.index
                    );
                    continue;
                }
            };

            if let Some(frames) = track.buffer.push(crop) {
                debug!("buffer full for track {}", track.track_id);
                full.push(FullClip {
                    track_id: track.track_id,
                    frames,
                });
            }
        }

        full
    }

    /// Appends one crop to a track's buffer, returning the clip if it filled.
    pub fn append(&mut self, id: TrackId, crop: Crop) -> Option<FullClip> {
        let track = self.get_mut(id)?;
        let frames = track.buffer.push(crop)?;

        Some(FullClip {
            track_id: id,
            frames,
        })
    }

    fn spawn(&mut self, bbox: BBox) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;

        debug!("new track {} at {:?}", id, bbox);
        self.tracks
            .push(Track::new(id, bbox, self.config.clip_buffer_size));

        id
    }
}

#[cfg(test)]
mod tests {
    use super::{TrackStore, TrackerConfig};
    use crate::bbox::{iou, BBox};
    use crate::frame::Frame;
    use crate::track::UNKNOWN_ACTIVITY;
    use crate::Detection;
    use ndarray::Array3;

    fn store(max_misses: Option<u32>) -> TrackStore {
        TrackStore::new(TrackerConfig {
            iou_threshold: 0.4,
            clip_buffer_size: 4,
            max_misses,
        })
    }

    fn det(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection::new(BBox::ltrb(x1, y1, x2, y2), 0.9)
    }

    #[test]
    fn empty_store_creates_one_track_per_detection() {
        let mut s = store(None);
        let dets = [det(0, 0, 10, 10), det(50, 50, 60, 60), det(0, 0, 10, 10)];

        let report = s.update(&dets);

        assert_eq!(report.created, vec![0, 1, 2]);
        assert_eq!(s.len(), 3);
        for (track, d) in s.tracks().iter().zip(&dets) {
            assert_eq!(track.bbox, d.bbox);
            assert!(track.buffer.is_empty());
            assert_eq!(track.last_activity, UNKNOWN_ACTIVITY);
        }
    }

    #[test]
    fn matches_retains_and_spawns() {
        let mut s = store(None);
        s.update(&[det(0, 0, 10, 10), det(100, 100, 110, 110)]);

        let report = s.update(&[det(1, 1, 11, 11), det(300, 300, 310, 310)]);

        assert_eq!(report.matched, vec![(0, 0)]);
        assert_eq!(report.created, vec![2]);
        assert_eq!(s.get(0).unwrap().bbox, BBox::ltrb(1, 1, 11, 11));
        assert_eq!(s.get(1).unwrap().bbox, BBox::ltrb(100, 100, 110, 110));
        assert_eq!(s.get(2).unwrap().bbox, BBox::ltrb(300, 300, 310, 310));
    }

    #[test]
    fn accepted_pairs_exceed_threshold() {
        let mut s = store(None);
        s.update(&[det(0, 0, 100, 100), det(200, 0, 300, 100), det(400, 0, 500, 100)]);

        let dets = [
            det(30, 0, 130, 100),
            det(260, 0, 360, 100),
            det(405, 5, 505, 105),
            det(0, 300, 50, 350),
        ];
        let before: Vec<_> = s.tracks().iter().map(|t| (t.track_id, t.bbox)).collect();
        let report = s.update(&dets);

        for (id, c) in &report.matched {
            let (_, old) = before.iter().find(|(tid, _)| tid == id).unwrap();
            assert!(iou(old, &dets[*c].bbox) > 0.4);
        }

        // 260..360 overlaps 200..300 by less than the threshold
        assert!(report.matched.iter().all(|&(_, c)| c != 1));
        assert_eq!(s.get(1).unwrap().bbox, BBox::ltrb(200, 0, 300, 100));
        assert_eq!(report.created.len(), 2);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut s = store(Some(0));
        s.update(&[det(0, 0, 10, 10)]);
        let report = s.update(&[det(500, 500, 510, 510)]);

        assert_eq!(report.evicted, vec![0]);
        assert_eq!(report.created, vec![1]);

        let report = s.update(&[]);
        assert_eq!(report.evicted, vec![1]);
        assert!(s.is_empty());

        let report = s.update(&[det(0, 0, 10, 10)]);
        assert_eq!(report.created, vec![2]);
    }

    #[test]
    fn without_bound_tracks_persist() {
        let mut s = store(None);
        s.update(&[det(0, 0, 10, 10)]);

        for _ in 0..50 {
            let report = s.update(&[]);
            assert!(report.evicted.is_empty());
        }

        let track = s.get(0).unwrap();
        assert_eq!(track.bbox, BBox::ltrb(0, 0, 10, 10));
        assert_eq!(track.misses, 50);
    }

    #[test]
    fn match_resets_miss_counter() {
        let mut s = store(Some(2));
        s.update(&[det(0, 0, 10, 10)]);
        s.update(&[]);
        s.update(&[]);
        assert_eq!(s.get(0).unwrap().misses, 2);

        s.update(&[det(0, 0, 10, 10)]);
        assert_eq!(s.get(0).unwrap().misses, 0);

        s.update(&[]);
        s.update(&[]);
        let report = s.update(&[]);
        assert_eq!(report.evicted, vec![0]);
    }

    #[test]
    fn accumulate_reports_full_buffers_once() {
        let mut s = store(None);
        s.update(&[det(0, 0, 10, 10), det(500, 500, 510, 510)]);

        let frame = Frame::new(0, 0.0, Array3::zeros((48, 64, 3)));

        for _ in 0..3 {
            assert!(s.accumulate(&frame).is_empty());
        }
        assert_eq!(s.get(0).unwrap().buffer.len(), 3);
        // second track lies outside the frame
        assert_eq!(s.get(1).unwrap().buffer.len(), 0);

        let full = s.accumulate(&frame);
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].track_id, 0);
        assert_eq!(full[0].frames.len(), 4);
        assert!(s.get(0).unwrap().buffer.is_empty());
    }

    #[test]
    fn append_targets_a_single_track() {
        let mut s = store(None);
        s.update(&[det(0, 0, 10, 10)]);

        for _ in 0..3 {
            assert!(s.append(0, Array3::zeros((2, 2, 3))).is_none());
        }
        assert!(s.append(0, Array3::zeros((2, 2, 3))).is_some());
        assert!(s.append(7, Array3::zeros((2, 2, 3))).is_none());
    }
}
