//! Frame sources: anything that can hand over the next color frame on demand.

use crate::frame::Frame;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Supplies successive frames. A failed read is `None`, never an error; the
/// caller simply tries again on its next tick.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;

    /// True once the source will never produce another frame.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Replays the image files of a directory in file name order.
pub struct ImageDirSource {
    pending: VecDeque<PathBuf>,
    sequence: u32,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> io::Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)));
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        tracing::info!(dir = %dir.display(), frames = files.len(), "replaying image directory");
        Ok(Self {
            pending: files.into(),
            sequence: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Option<Frame> {
        let path = self.pending.pop_front()?;
        self.sequence += 1;

        match image::open(&path) {
            Ok(img) => Some(Frame::new(img.to_rgb8(), self.sequence)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to decode replay frame");
                None
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }
}
