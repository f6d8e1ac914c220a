use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use gymtrack::classifier::CommandClassifier;
use gymtrack::config::{Config, VideoSource};
use gymtrack::detector::ReplayDetector;
use gymtrack::pipeline::FrameSink;
use gymtrack::video;
use gymtrack::Pipeline;

/// Tracks people in a video and logs the activities they perform.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON configuration file, overridden by the flags below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Video file or capture device index
    #[arg(short, long)]
    source: Option<VideoSource>,

    /// Detections dump, one `<frame>:<json>` line per frame
    #[arg(short, long)]
    detections: PathBuf,

    /// Classifier command; reads a clip on stdin, prints a label
    #[arg(long)]
    classifier: String,

    /// Arguments passed to the classifier command
    #[arg(long, num_args = 0.., allow_hyphen_values = true)]
    classifier_arg: Vec<String>,

    /// Frames the classifier expects per clip
    #[arg(long, default_value_t = 8)]
    clip_len: usize,

    #[arg(long)]
    conf: Option<f32>,

    #[arg(long)]
    iou: Option<f32>,

    /// Frames buffered per person before classifying
    #[arg(long)]
    buffer: Option<usize>,

    /// Comma separated target activities
    #[arg(long, value_delimiter = ',')]
    activities: Option<Vec<String>>,

    /// Retire a person after this many frames without a match
    #[arg(long)]
    max_misses: Option<u32>,

    /// Classification worker threads, 0 classifies inline
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    output_video: Option<PathBuf>,

    #[arg(long)]
    output_log: Option<PathBuf>,

    /// Do not open a preview window
    #[arg(long)]
    no_preview: bool,
}

impl Args {
    fn into_config(self, mut config: Config) -> Config {
        if let Some(source) = self.source {
            config.video_source = source;
        }
        if let Some(conf) = self.conf {
            config.confidence_threshold = conf;
        }
        if let Some(iou) = self.iou {
            config.iou_threshold = iou;
        }
        if let Some(buffer) = self.buffer {
            config.clip_buffer_size = buffer;
        }
        if let Some(activities) = self.activities {
            config.target_activities = activities
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if self.max_misses.is_some() {
            config.max_misses = self.max_misses;
        }
        if let Some(workers) = self.workers {
            config.classify_workers = workers;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.classify_timeout_ms = timeout_ms;
        }
        if let Some(output_video) = self.output_video {
            config.output_video = output_video;
        }
        if let Some(output_log) = self.output_log {
            config.output_log = output_log;
        }
        if self.no_preview {
            config.preview = false;
        }

        config
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let base = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    let detections = args.detections.clone();
    let classifier = CommandClassifier::new(
        &args.classifier,
        args.classifier_arg.clone(),
        args.clip_len,
    );

    let config = args.into_config(base);
    config.validate()?;

    let mut source = video::VideoSource::open(&config.video_source)?;

    let detector = ReplayDetector::open(&detections)?;
    info!("loaded detections for {} frames", detector.len());

    let mut sinks: Vec<Box<dyn FrameSink>> = vec![Box::new(video::VideoWriter::new(
        &config.output_video,
        source.fps(),
    ))];

    if config.preview {
        sinks.push(Box::new(video::Preview::new("Smart Gym System")?));
        info!("processing video, press 'q' to quit");
    }

    let mut pipeline = Pipeline::new(
        &config,
        Box::new(detector),
        Arc::new(classifier),
        Box::new(video::OverlayRenderer::default()),
    )?;

    let summary = pipeline.run(&mut source, &mut sinks)?;

    info!(
        "finished: {} frames, output video {}, activity log {}",
        summary.frames,
        config.output_video.display(),
        config.output_log.display()
    );

    Ok(())
}
