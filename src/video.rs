use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::Array3;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size},
    highgui, imgproc,
    prelude::*,
    videoio,
};

use crate::config;
use crate::error::Error;
use crate::frame::Frame;
use crate::pipeline::{Flow, FrameSink, FrameSource, Renderer};
use crate::track::Track;

const DEFAULT_FPS: f64 = 25.0;

fn mat_type(channels: usize) -> Result<i32, Error> {
    match channels {
        1 => Ok(core::CV_8UC1),
        3 => Ok(core::CV_8UC3),
        4 => Ok(core::CV_8UC4),
        n => Err(Error::Frame(format!("unsupported channel count {}", n))),
    }
}

pub fn mat_to_array(mat: &Mat) -> Result<Array3<u8>, Error> {
    let (rows, cols, channels) = (
        mat.rows() as usize,
        mat.cols() as usize,
        mat.channels() as usize,
    );

    let bytes = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };

    Array3::from_shape_vec((rows, cols, channels), bytes).map_err(|e| Error::Frame(e.to_string()))
}

pub fn array_to_mat(image: &Array3<u8>) -> Result<Mat, Error> {
    let (rows, cols, channels) = image.dim();
    let mut mat = Mat::new_rows_cols_with_default(
        rows as i32,
        cols as i32,
        mat_type(channels)?,
        Scalar::all(0.0),
    )?;

    let dst = mat.data_bytes_mut()?;
    match image.as_slice() {
        Some(src) => dst.copy_from_slice(src),
        None => dst
            .iter_mut()
            .zip(image.iter())
            .for_each(|(d, s)| *d = *s),
    }

    Ok(mat)
}

/// Frames from a capture device or a video file.
pub struct VideoSource {
    cap: videoio::VideoCapture,
    next_index: u64,
    fps: f64,
}

impl VideoSource {
    pub fn open(source: &config::VideoSource) -> Result<Self, Error> {
        let cap = match source {
            config::VideoSource::Device(idx) => videoio::VideoCapture::new(*idx, videoio::CAP_ANY)?,
            config::VideoSource::File(path) => {
                videoio::VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?
            }
        };

        if !videoio::VideoCapture::is_opened(&cap)? {
            return Err(Error::SourceUnavailable(source.to_string()));
        }

        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let fps = if fps > 0.0 { fps } else { DEFAULT_FPS };

        info!(
            "video {} opened: {}x{} @ {:.1} fps",
            source,
            cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
            fps
        );

        Ok(Self {
            cap,
            next_index: 0,
            fps,
        })
    }

    #[inline]
    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let mut mat = Mat::default();

        if !self.cap.read(&mut mat)? || mat.rows() == 0 || mat.cols() == 0 {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;

        let timestamp = (index as f64 / self.fps) as f32;
        Ok(Some(Frame::new(index, timestamp, mat_to_array(&mat)?)))
    }

    fn release(&mut self) -> Result<(), Error> {
        self.cap.release()?;
        Ok(())
    }
}

/// Writes frames to a video file, opened lazily at the first frame's size.
pub struct VideoWriter {
    writer: Option<videoio::VideoWriter>,
    size: Option<(i32, i32)>,
    out_file: PathBuf,
    fps: f64,
}

impl VideoWriter {
    pub fn new<P: AsRef<Path>>(out_file: P, fps: f64) -> Self {
        Self {
            writer: None,
            size: None,
            out_file: out_file.as_ref().to_path_buf(),
            fps,
        }
    }

    fn reinit(&mut self, size: (i32, i32)) -> Result<(), Error> {
        debug!("video writer reinit {:?}", size);
        FrameSink::release(self)?;

        self.writer = Some(videoio::VideoWriter::new(
            &self.out_file.to_string_lossy(),
            videoio::VideoWriter::fourcc('m', 'p', '4', 'v')?,
            self.fps,
            Size::new(size.0, size.1),
            true,
        )?);
        self.size = Some(size);

        Ok(())
    }
}

impl FrameSink for VideoWriter {
    fn write(&mut self, frame: &Frame) -> Result<Flow, Error> {
        let (w, h) = frame.dims();
        let size = (w as i32, h as i32);

        if self.writer.is_none() || self.size != Some(size) {
            self.reinit(size)?;
        }

        let mat = array_to_mat(&frame.image)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&mat)?;
        }

        Ok(Flow::Continue)
    }

    fn release(&mut self) -> Result<(), Error> {
        if let Some(mut w) = self.writer.take() {
            w.release()?;
        }

        Ok(())
    }
}

/// Box, id and last activity above every track.
pub struct OverlayRenderer {
    color: Scalar,
    text_color: Scalar,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self {
            color: Scalar::new(0.0, 255.0, 0.0, 0.0),
            text_color: Scalar::new(0.0, 0.0, 0.0, 0.0),
        }
    }
}

impl OverlayRenderer {
    fn draw_track(&self, mat: &mut Mat, track: &Track) -> opencv::Result<()> {
        let [x, y, w, h] = track.bbox.as_ltwh();

        imgproc::rectangle(mat, Rect::new(x, y, w, h), self.color, 2, imgproc::LINE_8, 0)?;

        // label background
        imgproc::rectangle(
            mat,
            Rect::new(x, y - 45, 180, 45),
            self.color,
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;

        let lines = [
            (format!("ID: {}", track.track_id), y - 25),
            (format!("Activity: {}", track.last_activity), y - 5),
        ];

        for (text, ty) in &lines {
            imgproc::put_text(
                mat,
                text,
                Point::new(x + 5, *ty),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.6,
                self.text_color,
                2,
                imgproc::LINE_AA,
                false,
            )?;
        }

        Ok(())
    }
}

impl Renderer for OverlayRenderer {
    fn render(&mut self, frame: &mut Frame, tracks: &[Track]) -> Result<(), Error> {
        if tracks.is_empty() {
            return Ok(());
        }

        let mut mat = array_to_mat(&frame.image)?;
        for track in tracks {
            self.draw_track(&mut mat, track)?;
        }

        frame.image = mat_to_array(&mat)?;
        Ok(())
    }
}

/// Interactive window; `q` or Esc stops the run.
pub struct Preview {
    window: String,
}

impl Preview {
    pub fn new<S: ToString>(window: S) -> Result<Self, Error> {
        let window = window.to_string();
        highgui::named_window(&window, highgui::WINDOW_AUTOSIZE)?;

        Ok(Self { window })
    }
}

impl FrameSink for Preview {
    fn write(&mut self, frame: &Frame) -> Result<Flow, Error> {
        let mat = array_to_mat(&frame.image)?;
        highgui::imshow(&self.window, &mat)?;

        let key = highgui::wait_key(1)?;
        if key & 0xFF == b'q' as i32 || key == 27 {
            return Ok(Flow::Stop);
        }

        Ok(Flow::Continue)
    }

    fn release(&mut self) -> Result<(), Error> {
        highgui::destroy_all_windows()?;
        Ok(())
    }
}
