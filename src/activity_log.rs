use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::Error;
use crate::track::TrackId;

const HEADER: &str = "Timestamp,PersonID,Activity";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of the log: `Timestamp,PersonID,Activity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub timestamp: String,
    pub person_id: TrackId,
    pub activity: String,
}

impl ActivityRecord {
    fn to_csv(&self) -> String {
        format!(
            "{},{},{}",
            csv_field(&self.timestamp),
            self.person_id,
            csv_field(&self.activity)
        )
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Append-only CSV of accepted activities.
///
/// Rows that fail to reach the file stay in a bounded backlog and are written
/// ahead of the next row.
pub struct ActivityLog {
    path: PathBuf,
    backlog: VecDeque<ActivityRecord>,
    max_backlog: usize,
    written: u64,
}

impl ActivityLog {
    /// Opens `path`, writing the header only when the file does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P, max_backlog: usize) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let mut file = std::fs::File::create(&path)?;
            writeln!(file, "{}", HEADER)?;
        }

        Ok(Self {
            path,
            backlog: VecDeque::new(),
            max_backlog: max_backlog.max(1),
            written: 0,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows waiting for a successful write.
    #[inline]
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Records `activity` for `person_id` with the current local time.
    pub fn record(&mut self, person_id: TrackId, activity: &str) {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();

        self.push(ActivityRecord {
            timestamp,
            person_id,
            activity: activity.to_string(),
        });
    }

    pub fn push(&mut self, record: ActivityRecord) {
        if self.backlog.len() >= self.max_backlog {
            if let Some(lost) = self.backlog.pop_front() {
                warn!("activity log backlog full, dropping {:?}", lost);
            }
        }

        info!("Logged: Person {} - {}", record.person_id, record.activity);
        self.backlog.push_back(record);

        if let Err(err) = self.flush() {
            warn!(
                "failed to write {}: {}; {} row(s) pending",
                self.path.display(),
                err,
                self.backlog.len()
            );
        }
    }

    /// Writes every pending row.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.backlog.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        self.drain_into(&mut file)
    }

    // Rows leave the backlog only once written, so a retry resumes after the
    // last complete row.
    fn drain_into<W: Write>(&mut self, out: &mut W) -> Result<(), Error> {
        while let Some(record) = self.backlog.front() {
            let mut row = record.to_csv();
            row.push('\n');

            out.write_all(row.as_bytes())?;
            self.backlog.pop_front();
            self.written += 1;
        }

        out.flush()?;
        Ok(())
    }
}
