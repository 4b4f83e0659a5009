//! On-disk face image layout.
//!
//! ```text
//! <root>/known_faces/<PersonName>/<image>
//! <root>/unknown_faces/face_<YYYYMMDD_HHMMSS>_<frameIndex>.jpg
//! ```
//!
//! Missing directories read as empty.

use chrono::NaiveDateTime;
use image::RgbImage;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const KNOWN_DIR: &str = "known_faces";
pub const UNKNOWN_DIR: &str = "unknown_faces";

/// Timestamp format used in stored file names.
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const LIBRARY_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid person name {0:?}")]
    InvalidName(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory entries sorted by file name. A missing directory yields nothing.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };

    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(dir))?;
    paths.sort();
    Ok(paths)
}

fn has_library_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| LIBRARY_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Known and unknown face folders under one root.
#[derive(Debug, Clone)]
pub struct FaceStore {
    known_root: PathBuf,
    unknown_root: PathBuf,
}

impl FaceStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            known_root: root.join(KNOWN_DIR),
            unknown_root: root.join(UNKNOWN_DIR),
        }
    }

    pub fn known_root(&self) -> &Path {
        &self.known_root
    }

    pub fn unknown_root(&self) -> &Path {
        &self.unknown_root
    }

    /// Write an unknown face crop. Empty crops are skipped and yield `None`.
    ///
    /// File names have one-second resolution, so a second crop at the same
    /// frame index within the same second replaces the first.
    pub fn save_unknown(
        &self,
        crop: &RgbImage,
        at: NaiveDateTime,
        frame_index: usize,
    ) -> Result<Option<PathBuf>, StoreError> {
        if crop.width() == 0 || crop.height() == 0 {
            tracing::debug!(frame_index, "empty face crop, not saved");
            return Ok(None);
        }

        fs::create_dir_all(&self.unknown_root).map_err(io_err(&self.unknown_root))?;

        let path = self
            .unknown_root
            .join(format!("face_{}_{frame_index}.jpg", at.format(FILE_STAMP_FORMAT)));
        if path.exists() {
            tracing::debug!(path = %path.display(), "replacing unknown face saved this second");
        }
        crop.save(&path).map_err(|source| StoreError::Image {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "saved unknown face");
        Ok(Some(path))
    }

    /// Regular files waiting in the unknown folder, sorted by name.
    pub fn pending_unknowns(&self) -> Result<Vec<PathBuf>, StoreError> {
        Ok(sorted_entries(&self.unknown_root)?
            .into_iter()
            .filter(|p| p.is_file())
            .collect())
    }

    /// Move every pending unknown file into `known_faces/<name>/`, prefixing
    /// each file name with `at`. Returns the new paths.
    ///
    /// With nothing pending the person folder is not created.
    pub fn move_unknowns_to(&self, name: &str, at: NaiveDateTime) -> Result<Vec<PathBuf>, StoreError> {
        let target = self.person_dir(name)?;
        let pending = self.pending_unknowns()?;
        if pending.is_empty() {
            tracing::info!(name, "no unknown faces to move");
            return Ok(Vec::new());
        }
        fs::create_dir_all(&target).map_err(io_err(&target))?;

        let stamp = at.format(FILE_STAMP_FORMAT).to_string();
        let mut moved = Vec::new();

        for src in pending {
            let Some(file_name) = src.file_name() else {
                continue;
            };
            let mut dst_name = OsString::from(format!("{stamp}_"));
            dst_name.push(file_name);
            let dst = target.join(dst_name);
            fs::rename(&src, &dst).map_err(io_err(&src))?;
            moved.push(dst);
        }

        tracing::info!(name, count = moved.len(), "moved unknown faces");
        Ok(moved)
    }

    /// Folder for one person. Names that would escape the known root are rejected.
    pub fn person_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let is_plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !is_plain {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.known_root.join(name))
    }

    /// `(name, folder)` for every person folder, sorted by name.
    pub fn person_dirs(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        Ok(sorted_entries(&self.known_root)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?.to_string();
                Some((name, p))
            })
            .collect())
    }

    /// Regular files in one person folder, sorted by name.
    pub fn person_images(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        Ok(sorted_entries(dir)?.into_iter().filter(|p| p.is_file()).collect())
    }

    /// Every stored face image, unknown ones first, then the known tree.
    pub fn library(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut images = Vec::new();
        for root in [&self.unknown_root, &self.known_root] {
            collect_images(root, &mut images)?;
        }
        Ok(images)
    }
}

fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    for path in sorted_entries(dir)? {
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if has_library_extension(&path) {
            out.push(path);
        }
    }
    Ok(())
}
