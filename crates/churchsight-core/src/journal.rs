//! Daily operator journal: `logs/<YYYY-MM-DD>.csv`, one `HH:MM:SS,message` row per entry.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOG_DIR: &str = "logs";

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Append-only, one file per calendar day.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Journal kept in `<root>/logs`.
    pub fn in_root(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(LOG_DIR))
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", day.format("%Y-%m-%d")))
    }

    pub fn append(&self, message: &str) -> Result<(), JournalError> {
        self.append_at(Local::now().naive_local(), message)
    }

    pub fn append_at(&self, at: NaiveDateTime, message: &str) -> Result<(), JournalError> {
        let path = self.path_for(at.date());
        let wrap = |source| JournalError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(wrap)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(wrap)?;

        let row = format!("{},{}\r\n", at.format("%H:%M:%S"), csv_field(message));
        file.write_all(row.as_bytes()).map_err(wrap)
    }

    pub fn read_today(&self) -> Result<String, JournalError> {
        self.read_day(Local::now().date_naive())
    }

    /// Full text of one day's journal; empty when nothing was written that day.
    pub fn read_day(&self, day: NaiveDate) -> Result<String, JournalError> {
        let path = self.path_for(day);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(JournalError::Io { path, source }),
        }
    }
}

/// Minimal CSV quoting: wrap in quotes only when the field needs it.
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
