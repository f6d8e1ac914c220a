use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::store::TrackerConfig;
use crate::trigger::TriggerConfig;

/// Where frames come from: a capture device index or a video file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum VideoSource {
    Device(i32),
    File(PathBuf),
}

impl FromStr for VideoSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().parse::<i32>() {
            Ok(idx) => VideoSource::Device(idx),
            Err(_) => VideoSource::File(PathBuf::from(s)),
        })
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoSource::Device(idx) => write!(f, "device {}", idx),
            VideoSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub video_source: VideoSource,

    // detection
    pub confidence_threshold: f32,
    pub person_class: i32,

    // tracking
    pub iou_threshold: f32,
    pub max_misses: Option<u32>,

    // classification
    pub clip_buffer_size: usize,
    pub target_activities: BTreeSet<String>,
    pub classify_workers: usize,
    pub classify_queue: usize,
    pub classify_timeout_ms: u64,

    // output
    pub output_video: PathBuf,
    pub output_log: PathBuf,
    pub log_backlog: usize,
    pub preview: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video_source: VideoSource::File(PathBuf::from("videos/gym_session.mp4")),
            confidence_threshold: 0.5,
            person_class: 0,
            iou_threshold: 0.4,
            max_misses: None,
            clip_buffer_size: 32,
            target_activities: [
                "squat",
                "push up",
                "pull up",
                "biceps curl",
                "bench press",
                "cycling",
                "rowing machine",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            classify_workers: 2,
            classify_queue: 8,
            classify_timeout_ms: 10_000,
            output_video: PathBuf::from("output.mp4"),
            output_log: PathBuf::from("activity_log.csv"),
            log_backlog: 1024,
            preview: true,
        }
    }
}

impl Config {
    /// Reads a JSON config file; missing keys take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let config: Config = serde_json::from_reader(std::io::BufReader::new(file))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(Error::Config(format!(
                "iou_threshold must be in [0, 1], got {}",
                self.iou_threshold
            )));
        }

        if self.clip_buffer_size == 0 {
            return Err(Error::Config("clip_buffer_size must be positive".into()));
        }

        if self.classify_workers > 0 && self.classify_queue == 0 {
            return Err(Error::Config(
                "classify_queue must be positive when workers are enabled".into(),
            ));
        }

        if self.target_activities.is_empty() {
            log::warn!("target_activities is empty, nothing will be logged");
        }

        Ok(())
    }

    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            iou_threshold: self.iou_threshold,
            clip_buffer_size: self.clip_buffer_size,
            max_misses: self.max_misses,
        }
    }

    pub fn trigger(&self) -> TriggerConfig {
        TriggerConfig {
            target_activities: self.target_activities.clone(),
            workers: self.classify_workers,
            queue: self.classify_queue,
            timeout: Duration::from_millis(self.classify_timeout_ms),
        }
    }
}
