use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::activity_log::ActivityLog;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::detection::select;
use crate::detector::Detector;
use crate::error::Error;
use crate::frame::Frame;
use crate::store::TrackStore;
use crate::track::Track;
use crate::trigger::{ClassificationTrigger, Outcome, Verdict};

/// Yields frames until the video is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;

    fn release(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Draws track annotations onto a frame.
pub trait Renderer {
    fn render(&mut self, frame: &mut Frame, tracks: &[Track]) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Consumes annotated frames: a video file, a preview window.
pub trait FrameSink {
    fn write(&mut self, frame: &Frame) -> Result<Flow, Error>;

    fn release(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Renders nothing.
pub struct NoRender;

impl Renderer for NoRender {
    fn render(&mut self, _frame: &mut Frame, _tracks: &[Track]) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub tracks_created: u64,
    pub labels_logged: u64,
    pub clips_dropped: u64,
}

pub struct Pipeline {
    person_class: i32,
    confidence_threshold: f32,
    detector: Box<dyn Detector>,
    renderer: Box<dyn Renderer>,
    store: TrackStore,
    trigger: ClassificationTrigger,
    log: ActivityLog,
    stop: Arc<AtomicBool>,
    summary: RunSummary,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        detector: Box<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let log = ActivityLog::open(&config.output_log, config.log_backlog)?;
        let trigger = ClassificationTrigger::new(classifier, config.trigger())?;

        Ok(Self {
            person_class: config.person_class,
            confidence_threshold: config.confidence_threshold,
            detector,
            renderer,
            store: TrackStore::new(config.tracker()),
            trigger,
            log,
            stop: Arc::new(AtomicBool::new(false)),
            summary: RunSummary::default(),
        })
    }

    /// Setting the returned flag ends [`run`](Self::run) after the current frame.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    #[inline]
    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    #[inline]
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// One cycle: detect, associate, buffer, classify full clips, render.
    pub fn process_frame(&mut self, frame: &mut Frame) -> Result<(), Error> {
        let detections = match self.detector.detect(frame) {
            Ok(dets) => select(dets, self.person_class, self.confidence_threshold),
            Err(err) => {
                warn!("frame {}: detection failed: {}", frame.index, err);
                Vec::new()
            }
        };

        let report = self.store.update(&detections);
        self.summary.tracks_created += report.created.len() as u64;

        for outcome in self.trigger.poll() {
            self.apply(outcome);
        }

        for clip in self.store.accumulate(frame) {
            debug!(
                "frame {}: classifying track {} ({} frames)",
                frame.index,
                clip.track_id,
                clip.frames.len()
            );

            if let Some(outcome) = self.trigger.submit(clip) {
                self.apply(outcome);
            }
        }

        self.renderer.render(frame, self.store.tracks())?;
        self.summary.frames += 1;

        Ok(())
    }

    /// Drives `source` to exhaustion or until a sink or the stop flag ends
    /// the run, then drains classification and releases everything.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sinks: &mut [Box<dyn FrameSink>],
    ) -> Result<RunSummary, Error> {
        let result = self.run_loop(source, sinks);

        for outcome in self.trigger.shutdown() {
            self.apply(outcome);
        }

        if let Err(err) = self.log.flush() {
            warn!(
                "{} activity row(s) could not be written to {}: {}",
                self.log.pending(),
                self.log.path().display(),
                err
            );
        }

        // release everything, then report the first failure
        let mut released = source.release();
        for sink in sinks.iter_mut() {
            let res = sink.release();
            if released.is_ok() {
                released = res;
            } else if let Err(err) = res {
                warn!("sink release failed: {}", err);
            }
        }

        self.summary.clips_dropped = self.trigger.dropped();
        result?;
        released?;

        info!(
            "processed {} frames, {} tracks, {} activities logged",
            self.summary.frames, self.summary.tracks_created, self.summary.labels_logged
        );

        Ok(self.summary)
    }

    fn run_loop(
        &mut self,
        source: &mut dyn FrameSource,
        sinks: &mut [Box<dyn FrameSink>],
    ) -> Result<(), Error> {
        while let Some(mut frame) = source.next_frame()? {
            self.process_frame(&mut frame)?;

            let mut flow = Flow::Continue;
            for sink in sinks.iter_mut() {
                if sink.write(&frame)? == Flow::Stop {
                    flow = Flow::Stop;
                }
            }

            if flow == Flow::Stop || self.stop.load(Ordering::Relaxed) {
                info!("stop requested at frame {}", frame.index);
                break;
            }
        }

        Ok(())
    }

    fn apply(&mut self, outcome: Outcome) {
        let id = outcome.track_id;

        match outcome.verdict {
            Verdict::Accepted(label) => {
                if let Some(track) = self.store.get_mut(id) {
                    track.last_activity = label.clone();
                }

                self.log.record(id, &label);
                self.summary.labels_logged += 1;
            }

            Verdict::Rejected(label) => {
                debug!("track {}: {:?} is not a target activity", id, label);
            }

            Verdict::Failed(err) => {
                warn!("track {}: classification failed: {}", id, err);
            }

            Verdict::TimedOut => {
                warn!("track {}: classification timed out", id);
            }

            Verdict::Empty => {}
        }
    }
}
