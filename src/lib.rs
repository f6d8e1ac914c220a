pub mod activity_log;
pub mod assignment;
pub mod bbox;
pub mod classifier;
pub mod config;
pub mod cost;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod store;
pub mod track;
pub mod trigger;

#[cfg(feature = "video")]
pub mod video;

mod clip_buffer;

pub use bbox::BBox;
pub use clip_buffer::ClipBuffer;
pub use config::Config;
pub use detection::Detection;
pub use error::Error;
pub use frame::{Crop, Frame};
pub use pipeline::Pipeline;
pub use store::TrackStore;
pub use track::{Track, TrackId};
