use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "video")]
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Video source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Detector Error: {0}")]
    Detector(String),

    #[error("Classifier Error: {0}")]
    Classifier(String),

    #[error("Frame Error: {0}")]
    Frame(String),
}
