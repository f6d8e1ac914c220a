use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, trace};

use crate::error::Error;
use crate::frame::Crop;

/// Activity classifier over a short clip of person crops.
///
/// Implementations return one label from their closed vocabulary. They are
/// shared between worker threads, so `classify` takes `&self`.
pub trait Classifier: Send + Sync {
    /// Number of frames the model consumes per clip.
    fn clip_len(&self) -> usize;

    fn classify(&self, clip: &[Crop]) -> Result<String, Error>;

    /// Same as [`classify`](Self::classify), but may give up once `deadline`
    /// passes. The default ignores the deadline.
    fn classify_until(&self, clip: &[Crop], _deadline: Instant) -> Result<String, Error> {
        self.classify(clip)
    }
}

/// `n` evenly spaced indices over `0..=len-1`, truncated toward zero.
///
/// The first and last index are always `0` and `len - 1`. Indices repeat when
/// `n > len`.
pub fn sample_indices(len: usize, n: usize) -> Vec<usize> {
    if len == 0 || n == 0 {
        return Vec::new();
    }

    if n == 1 {
        return vec![0];
    }

    let last = len - 1;
    (0..n).map(|i| i * last / (n - 1)).collect()
}

/// Picks `n` frames of `clip` with [`sample_indices`].
pub fn sample_clip(clip: &[Crop], n: usize) -> Vec<Crop> {
    sample_indices(clip.len(), n)
        .into_iter()
        .map(|i| clip[i].clone())
        .collect()
}

/// Classifier backed by an external process.
///
/// The sampled clip is written to the child's stdin as, per frame, a
/// `"<rows> <cols> <channels>\n"` header followed by the raw pixel bytes.
/// The first line the child prints is the label.
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    clip_len: usize,
}

impl CommandClassifier {
    pub fn new<S: ToString>(program: S, args: Vec<String>, clip_len: usize) -> Self {
        Self {
            program: program.to_string(),
            args,
            clip_len,
        }
    }

    fn encode(clip: &[Crop], out: &mut impl Write) -> std::io::Result<()> {
        for crop in clip {
            let (rows, cols, channels) = crop.dim();
            writeln!(out, "{} {} {}", rows, cols, channels)?;

            match crop.as_slice() {
                Some(bytes) => out.write_all(bytes)?,
                None => {
                    let bytes: Vec<u8> = crop.iter().copied().collect();
                    out.write_all(&bytes)?;
                }
            }
        }

        out.flush()
    }
}

impl CommandClassifier {
    fn run(&self, clip: &[Crop], deadline: Option<Instant>) -> Result<String, Error> {
        let mut payload: Vec<u8> = Vec::new();
        Self::encode(clip, &mut payload)?;

        let mut child = Running(
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .spawn()?,
        );

        let mut stdin = child
            .0
            .stdin
            .take()
            .ok_or_else(|| Error::Classifier("classifier stdin unavailable".into()))?;

        let stdout = child
            .0
            .stdout
            .take()
            .ok_or_else(|| Error::Classifier("classifier stdout unavailable".into()))?;

        // pipes are serviced off-thread so a stuck child can still be killed
        std::thread::spawn(move || {
            if let Err(err) = stdin.write_all(&payload).and_then(|_| stdin.flush()) {
                debug!("classifier closed stdin early: {}", err);
            }
        });

        let (line_tx, line_rx) = bounded(1);
        std::thread::spawn(move || {
            let mut line = String::new();
            let res = BufReader::new(stdout).read_line(&mut line).map(|_| line);
            let _ = line_tx.send(res);
        });

        let status = match deadline {
            Some(deadline) => self.wait_until(&mut child.0, deadline)?,
            None => child.0.wait()?,
        };

        if !status.success() {
            return Err(Error::Classifier(format!(
                "{} exited with {}",
                self.program, status
            )));
        }

        let line = match deadline {
            Some(deadline) => line_rx.recv_deadline(deadline),
            None => line_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let line = match line {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(Error::Classifier(format!(
                    "{} printed no label before the deadline",
                    self.program
                )))
            }
            Err(RecvTimeoutError::Disconnected) => String::new(),
        };

        let label = line.trim();
        if label.is_empty() {
            return Err(Error::Classifier(format!("{} returned no label", self.program)));
        }

        trace!("raw prediction: {}", label);
        Ok(label.to_string())
    }

    fn wait_until(&self, child: &mut Child, deadline: Instant) -> Result<ExitStatus, Error> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if Instant::now() >= deadline {
                child.kill()?;
                child.wait()?;

                return Err(Error::Classifier(format!(
                    "{} killed after missing its deadline",
                    self.program
                )));
            }

            std::thread::sleep(WAIT_POLL);
        }
    }
}

const WAIT_POLL: Duration = Duration::from_millis(5);

// Kills and reaps the child on every early return.
struct Running(Child);

impl Drop for Running {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

impl Classifier for CommandClassifier {
    #[inline]
    fn clip_len(&self) -> usize {
        self.clip_len
    }

    fn classify(&self, clip: &[Crop]) -> Result<String, Error> {
        self.run(clip, None)
    }

    fn classify_until(&self, clip: &[Crop], deadline: Instant) -> Result<String, Error> {
        self.run(clip, Some(deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::{sample_clip, sample_indices, Classifier, CommandClassifier};
    use ndarray::Array3;
    use std::time::{Duration, Instant};

    #[cfg(unix)]
    fn sh(script: &str) -> CommandClassifier {
        CommandClassifier::new("sh", vec!["-c".into(), script.into()], 2)
    }

    #[cfg(unix)]
    fn frames() -> Vec<Array3<u8>> {
        vec![Array3::zeros((4, 4, 3)); 2]
    }

    #[test]
    fn samples_eight_of_thirty_two() {
        assert_eq!(sample_indices(32, 8), vec![0, 4, 8, 13, 17, 22, 26, 31]);
    }

    #[test]
    fn sampling_edge_cases() {
        assert!(sample_indices(0, 8).is_empty());
        assert!(sample_indices(10, 0).is_empty());
        assert_eq!(sample_indices(10, 1), vec![0]);
        assert_eq!(sample_indices(5, 5), vec![0, 1, 2, 3, 4]);
        assert_eq!(sample_indices(3, 5), vec![0, 0, 1, 1, 2]);
        assert_eq!(sample_indices(1, 3), vec![0, 0, 0]);
    }

    #[test]
    fn sample_clip_keeps_order() {
        let clip: Vec<_> = (0..6u8)
            .map(|i| Array3::from_elem((1, 1, 1), i))
            .collect();

        let sampled = sample_clip(&clip, 3);
        let values: Vec<u8> = sampled.iter().map(|c| c[[0, 0, 0]]).collect();
        assert_eq!(values, vec![0, 2, 5]);
    }

    #[test]
    fn encodes_header_and_pixels() {
        let clip = vec![Array3::from_elem((2, 1, 3), 7u8)];
        let mut out = Vec::new();
        CommandClassifier::encode(&clip, &mut out).unwrap();

        assert_eq!(&out[..6], b"2 1 3\n");
        assert_eq!(&out[6..], &[7u8; 6]);
    }

    #[cfg(unix)]
    #[test]
    fn command_prints_label() {
        let label = sh("cat >/dev/null; echo squat").classify(&frames()).unwrap();
        assert_eq!(label, "squat");
    }

    #[cfg(unix)]
    #[test]
    fn command_failure_is_an_error() {
        let err = sh("exit 3").classify(&frames()).unwrap_err();
        assert!(err.to_string().contains("exited"));
    }

    #[cfg(unix)]
    #[test]
    fn command_without_label_is_an_error() {
        let err = sh("cat >/dev/null").classify(&frames()).unwrap_err();
        assert!(err.to_string().contains("no label"));
    }

    #[cfg(unix)]
    #[test]
    fn command_is_killed_at_deadline() {
        let started = Instant::now();
        let res = sh("exec sleep 5").classify_until(&frames(), started + Duration::from_millis(50));

        assert!(res.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
