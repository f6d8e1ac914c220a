use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::detection::Detection;
use crate::error::Error;
use crate::frame::Frame;

/// Person detector for a single frame.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error>;
}

/// Replays detections dumped by an offline detector run.
///
/// One line per frame: `<frame index>:<json array of detections>`. Frames
/// without a line have no detections.
pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut frames = HashMap::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (index, vector) = line.split_once(':').ok_or_else(|| {
                Error::Detector(format!("line {}: expected `<frame>:<detections>`", lineno + 1))
            })?;

            let index: u64 = index.trim().parse().map_err(|_| {
                Error::Detector(format!("line {}: bad frame index {:?}", lineno + 1, index))
            })?;

            let dets: Vec<Detection> = serde_json::from_str(vector)?;
            frames.insert(index, dets);
        }

        Ok(Self { frames })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        Ok(self.frames.remove(&frame.index).unwrap_or_default())
    }
}
