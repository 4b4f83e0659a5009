//! Face sighting tracker.
//!
//! Sorts every detected face into one of three buckets: a known person, an
//! unknown face seen before, or a brand-new unknown face. Unknown faces are
//! saved to disk the first few times they are seen so an operator can label
//! them later.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::journal::{Journal, JournalError};
use crate::store::{FaceStore, StoreError};
use crate::types::{Embedding, EuclideanMatcher, KnownIdentity, Matcher, DEFAULT_TOLERANCE};
use chrono::{Local, NaiveDateTime};
use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Images saved per unknown face before further sightings are ignored.
pub const DEFAULT_MAX_CAPTURES: u32 = 2;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Maximum embedding distance for two faces to count as the same person.
    pub tolerance: f32,
    /// Once an unknown face has been seen this many times it is no longer saved.
    pub max_captures_per_sighting: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_captures_per_sighting: DEFAULT_MAX_CAPTURES,
        }
    }
}

/// One distinct face that has not been given a name yet.
#[derive(Debug, Clone)]
pub struct UnknownSighting {
    /// Embedding from the first time the face was seen.
    pub embedding: Embedding,
    pub count: u32,
}

/// What happened to a single detection.
#[derive(Debug, Clone, PartialEq)]
pub enum SightingOutcome {
    Known { name: String, distance: f32 },
    NewUnknown { index: usize, saved: Option<PathBuf> },
    RepeatUnknown { index: usize, count: u32, saved: Option<PathBuf> },
    /// Seen too often already; dropped without saving.
    Suppressed { index: usize },
}

/// Result of processing one camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub faces: usize,
    pub outcomes: Vec<SightingOutcome>,
}

pub struct SightingTracker {
    store: FaceStore,
    journal: Journal,
    matcher: EuclideanMatcher,
    max_captures: u32,
    known: Vec<KnownIdentity>,
    unknown: Vec<UnknownSighting>,
    session_start: Instant,
}

impl SightingTracker {
    /// Tracker keeping faces and journal under `root`. Known identities start
    /// empty until [`load_known_identities`](Self::load_known_identities) runs.
    pub fn new(root: impl AsRef<Path>, config: TrackerConfig) -> Self {
        let root = root.as_ref();
        Self::with_parts(FaceStore::new(root), Journal::in_root(root), config)
    }

    pub fn with_parts(store: FaceStore, journal: Journal, config: TrackerConfig) -> Self {
        Self {
            store,
            journal,
            matcher: EuclideanMatcher {
                tolerance: config.tolerance,
            },
            max_captures: config.max_captures_per_sighting,
            known: Vec::new(),
            unknown: Vec::new(),
            session_start: Instant::now(),
        }
    }

    pub fn store(&self) -> &FaceStore {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Known identities, sorted by name.
    pub fn known(&self) -> &[KnownIdentity] {
        &self.known
    }

    pub fn known_names(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(|k| k.name.as_str())
    }

    /// Unknown sightings in the order they were first seen.
    pub fn unknown_sightings(&self) -> &[UnknownSighting] {
        &self.unknown
    }

    pub fn session_elapsed(&self) -> Duration {
        self.session_start.elapsed()
    }

    /// Rebuild the known set from `known_faces/<name>/*`.
    ///
    /// Each person keeps the embedding of the last image (in file name order)
    /// that contains a face. Unreadable images and images without a face are
    /// skipped. Returns the number of known identities.
    pub fn load_known_identities(&mut self, encoder: &mut dyn FaceEncoder) -> Result<usize, TrackerError> {
        self.known.clear();

        for (name, dir) in self.store.person_dirs()? {
            let mut latest: Option<Embedding> = None;

            for path in self.store.person_images(&dir)? {
                let image = match image::open(&path) {
                    Ok(img) => img.to_rgb8(),
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "skipping unreadable image");
                        continue;
                    }
                };
                match encoder.encode(&image) {
                    Ok(faces) => match faces.into_iter().next() {
                        Some(face) => latest = Some(face.embedding),
                        None => tracing::debug!(path = %path.display(), "no face in reference image"),
                    },
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to encode reference image");
                    }
                }
            }

            if let Some(embedding) = latest {
                self.known.push(KnownIdentity { name, embedding });
            }
        }

        tracing::info!(count = self.known.len(), "loaded known identities");
        Ok(self.known.len())
    }

    /// Classify one detection and do the bookkeeping for it.
    pub fn process_detection(
        &mut self,
        embedding: &Embedding,
        crop: &RgbImage,
        frame_index: usize,
    ) -> Result<SightingOutcome, TrackerError> {
        self.process_detection_at(embedding, crop, frame_index, Local::now().naive_local())
    }

    pub(crate) fn process_detection_at(
        &mut self,
        embedding: &Embedding,
        crop: &RgbImage,
        frame_index: usize,
        at: NaiveDateTime,
    ) -> Result<SightingOutcome, TrackerError> {
        let known = self.matcher.compare(embedding, self.known.iter().map(|k| &k.embedding));
        if let Some(i) = known.index {
            return Ok(SightingOutcome::Known {
                name: self.known[i].name.clone(),
                distance: known.distance,
            });
        }

        let seen = self.matcher.compare(embedding, self.unknown.iter().map(|u| &u.embedding));
        match seen.index {
            Some(index) if self.unknown[index].count >= self.max_captures => {
                tracing::debug!(index, count = self.unknown[index].count, "unknown face capture limit reached");
                Ok(SightingOutcome::Suppressed { index })
            }
            Some(index) => {
                self.unknown[index].count += 1;
                let count = self.unknown[index].count;
                let saved = self.store.save_unknown(crop, at, frame_index)?;
                Ok(SightingOutcome::RepeatUnknown { index, count, saved })
            }
            None => {
                self.unknown.push(UnknownSighting {
                    embedding: embedding.clone(),
                    count: 1,
                });
                let index = self.unknown.len() - 1;
                tracing::debug!(index, "new unknown face");
                let saved = self.store.save_unknown(crop, at, frame_index)?;
                Ok(SightingOutcome::NewUnknown { index, saved })
            }
        }
    }

    /// Detect every face in a frame, process each one, then journal the face count.
    ///
    /// A failure on one detection is logged and does not stop the others.
    pub fn process_frame(
        &mut self,
        frame: &RgbImage,
        encoder: &mut dyn FaceEncoder,
    ) -> Result<FrameReport, TrackerError> {
        let detections = encoder.encode(frame)?;
        let mut outcomes = Vec::with_capacity(detections.len());

        for (i, face) in detections.iter().enumerate() {
            let (x, y, w, h) = face.bbox.clamp_to(frame.width(), frame.height());
            let crop = imageops::crop_imm(frame, x, y, w, h).to_image();

            match self.process_detection(&face.embedding, &crop, i) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(frame_index = i, error = %e, "failed to record detection"),
            }
        }

        self.journal
            .append(&format!("Detected {} face(s)", detections.len()))?;

        Ok(FrameReport {
            faces: detections.len(),
            outcomes,
        })
    }

    /// File every pending unknown image under `name` and reload known identities.
    ///
    /// Blank names are ignored. If a move fails partway the known set is still
    /// reloaded before the error is returned. Unknown sightings are forgotten once their
    /// images have been moved. Returns the number of files moved.
    pub fn label_unknowns_as(
        &mut self,
        name: &str,
        encoder: &mut dyn FaceEncoder,
    ) -> Result<usize, TrackerError> {
        self.label_unknowns_at(name, encoder, Local::now().naive_local())
    }

    pub(crate) fn label_unknowns_at(
        &mut self,
        name: &str,
        encoder: &mut dyn FaceEncoder,
        at: NaiveDateTime,
    ) -> Result<usize, TrackerError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(0);
        }

        let moved = match self.store.move_unknowns_to(name, at) {
            Err(e @ StoreError::InvalidName(_)) => return Err(e.into()),
            result => result,
        };

        // A failed move may still have filed some images; reload either way.
        self.unknown.clear();
        let reloaded = self.load_known_identities(encoder);
        let moved = moved?;
        reloaded?;

        Ok(moved.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FILE_STAMP_FORMAT;
    use crate::testing::{color_embedding, striped, ColorEncoder};
    use chrono::NaiveDate;
    use image::Rgb;
    use std::fs;

    const RED: [u8; 3] = [220, 20, 20];
    const GREEN: [u8; 3] = [20, 220, 20];
    const BLUE: [u8; 3] = [20, 20, 220];

    fn at(s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 0, s))
            .unwrap()
    }

    fn crop() -> RgbImage {
        RgbImage::from_pixel(10, 10, Rgb(RED))
    }

    // Color embeddings are not unit vectors; RED and GREEN sit about 1.1 apart.
    fn color_config() -> TrackerConfig {
        TrackerConfig { tolerance: 0.5, ..TrackerConfig::default() }
    }

    fn tracker(root: &Path) -> SightingTracker {
        SightingTracker::new(root, color_config())
    }

    fn write_reference(root: &Path, person: &str, file: &str, color: [u8; 3]) {
        let dir = root.join("known_faces").join(person);
        fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(10, 10, Rgb(color)).save(dir.join(file)).unwrap();
    }

    fn file_count(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_known_face_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "Carol", "c.png", RED);
        let mut t = tracker(dir.path());
        t.load_known_identities(&mut ColorEncoder::default()).unwrap();

        for s in 0..3 {
            let outcome = t.process_detection_at(&color_embedding(RED), &crop(), 0, at(s)).unwrap();
            assert!(matches!(outcome, SightingOutcome::Known { ref name, .. } if name == "Carol"));
        }
        assert!(t.unknown_sightings().is_empty());
        assert_eq!(file_count(t.store().unknown_root()), 0);
    }

    #[test]
    fn test_new_face_creates_one_sighting_and_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());

        let outcome = t.process_detection_at(&color_embedding(GREEN), &crop(), 2, at(0)).unwrap();

        let expected = dir.path().join("unknown_faces/face_20240501_120000_2.jpg");
        assert_eq!(outcome, SightingOutcome::NewUnknown { index: 0, saved: Some(expected.clone()) });
        assert_eq!(t.unknown_sightings().len(), 1);
        assert_eq!(t.unknown_sightings()[0].count, 1);
        assert!(expected.is_file());
        assert_eq!(file_count(t.store().unknown_root()), 1);
    }

    #[test]
    fn test_third_sighting_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let first = color_embedding(GREEN);
        let near = Embedding::new(first.values.iter().map(|v| v + 0.05).collect());

        let o1 = t.process_detection_at(&first, &crop(), 0, at(0)).unwrap();
        assert!(matches!(o1, SightingOutcome::NewUnknown { index: 0, saved: Some(_) }));
        assert_eq!(t.unknown_sightings()[0].count, 1);

        let o2 = t.process_detection_at(&near, &crop(), 0, at(1)).unwrap();
        assert!(matches!(o2, SightingOutcome::RepeatUnknown { index: 0, count: 2, saved: Some(_) }));
        assert_eq!(t.unknown_sightings()[0].count, 2);

        let o3 = t.process_detection_at(&near, &crop(), 0, at(2)).unwrap();
        assert_eq!(o3, SightingOutcome::Suppressed { index: 0 });
        assert_eq!(t.unknown_sightings()[0].count, 2);

        assert_eq!(t.unknown_sightings().len(), 1);
        assert_eq!(file_count(t.store().unknown_root()), 2);
    }

    #[test]
    fn test_capture_limit_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig { max_captures_per_sighting: 1, ..color_config() };
        let mut t = SightingTracker::new(dir.path(), config);
        let e = color_embedding(BLUE);

        t.process_detection_at(&e, &crop(), 0, at(0)).unwrap();
        let again = t.process_detection_at(&e, &crop(), 0, at(1)).unwrap();
        assert_eq!(again, SightingOutcome::Suppressed { index: 0 });
    }

    #[test]
    fn test_empty_crop_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());

        let outcome = t
            .process_detection_at(&color_embedding(BLUE), &RgbImage::new(0, 0), 0, at(0))
            .unwrap();

        assert_eq!(outcome, SightingOutcome::NewUnknown { index: 0, saved: None });
        assert_eq!(t.unknown_sightings().len(), 1);
        assert_eq!(file_count(t.store().unknown_root()), 0);
    }

    #[test]
    fn test_distinct_faces_get_distinct_sightings() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());

        t.process_detection_at(&color_embedding(GREEN), &crop(), 0, at(0)).unwrap();
        let o = t.process_detection_at(&color_embedding(BLUE), &crop(), 1, at(0)).unwrap();

        assert!(matches!(o, SightingOutcome::NewUnknown { index: 1, .. }));
        assert_eq!(t.unknown_sightings().len(), 2);
    }

    #[test]
    fn test_load_keeps_last_image_per_person() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "Dan", "a.png", GREEN);
        write_reference(dir.path(), "Dan", "b.png", BLUE);
        let mut t = tracker(dir.path());

        assert_eq!(t.load_known_identities(&mut ColorEncoder::default()).unwrap(), 1);

        assert_eq!(t.known().len(), 1);
        assert_eq!(t.known()[0].name, "Dan");
        assert_eq!(t.known()[0].embedding, color_embedding(BLUE));
    }

    #[test]
    fn test_load_skips_unreadable_and_faceless_images() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "Eve", "a.png", RED);
        write_reference(dir.path(), "Eve", "b.png", [0, 0, 0]);
        fs::write(dir.path().join("known_faces/Eve/c.jpg"), b"not an image").unwrap();
        write_reference(dir.path(), "Nobody", "x.png", [0, 0, 0]);
        let mut t = tracker(dir.path());

        t.load_known_identities(&mut ColorEncoder::default()).unwrap();

        let names: Vec<&str> = t.known_names().collect();
        assert_eq!(names, vec!["Eve"]);
        assert_eq!(t.known()[0].embedding, color_embedding(RED));
    }

    #[test]
    fn test_load_without_known_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        assert_eq!(t.load_known_identities(&mut ColorEncoder::default()).unwrap(), 0);
        assert!(t.known().is_empty());
    }

    #[test]
    fn test_load_replaces_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "Fay", "a.png", RED);
        let mut t = tracker(dir.path());
        t.load_known_identities(&mut ColorEncoder::default()).unwrap();

        fs::remove_dir_all(dir.path().join("known_faces/Fay")).unwrap();
        write_reference(dir.path(), "Gus", "a.png", GREEN);
        t.load_known_identities(&mut ColorEncoder::default()).unwrap();

        let names: Vec<&str> = t.known_names().collect();
        assert_eq!(names, vec!["Gus"]);
    }

    #[test]
    fn test_closest_known_identity_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "Amy", "a.png", [200, 200, 200]);
        write_reference(dir.path(), "Ben", "a.png", [230, 230, 230]);
        let mut t = tracker(dir.path());
        t.load_known_identities(&mut ColorEncoder::default()).unwrap();

        let outcome = t
            .process_detection_at(&color_embedding([228, 228, 228]), &crop(), 0, at(0))
            .unwrap();
        assert!(matches!(outcome, SightingOutcome::Known { ref name, .. } if name == "Ben"));
    }

    #[test]
    fn test_label_moves_everything_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let face = RgbImage::from_pixel(10, 10, Rgb(GREEN));
        for s in 0..3 {
            t.store().save_unknown(&face, at(s), 0).unwrap();
        }

        let mut encoder = ColorEncoder::default();
        let moved = t.label_unknowns_at("Alice", &mut encoder, at(30)).unwrap();

        assert_eq!(moved, 3);
        assert_eq!(file_count(t.store().unknown_root()), 0);
        assert_eq!(file_count(&dir.path().join("known_faces/Alice")), 3);
        assert!(t.known_names().any(|n| n == "Alice"));

        t.load_known_identities(&mut encoder).unwrap();
        assert!(t.known_names().any(|n| n == "Alice"));
    }

    #[test]
    fn test_label_clears_unknown_sightings() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let face = RgbImage::from_pixel(10, 10, Rgb(GREEN));
        t.process_detection_at(&color_embedding(GREEN), &face, 0, at(0)).unwrap();
        t.process_detection_at(&color_embedding(GREEN), &face, 0, at(1)).unwrap();
        assert_eq!(t.unknown_sightings()[0].count, 2);

        let mut encoder = ColorEncoder::default();
        t.label_unknowns_at("Hal", &mut encoder, at(5)).unwrap();
        assert!(t.unknown_sightings().is_empty());

        // The same face is now recognised instead of being suppressed.
        let outcome = t.process_detection_at(&color_embedding(GREEN), &face, 0, at(9)).unwrap();
        assert!(matches!(outcome, SightingOutcome::Known { ref name, .. } if name == "Hal"));
    }

    #[test]
    fn test_label_blank_name_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        t.process_detection_at(&color_embedding(GREEN), &crop(), 0, at(0)).unwrap();

        let mut encoder = ColorEncoder::default();
        for blank in ["", "   "] {
            assert_eq!(t.label_unknowns_at(blank, &mut encoder, at(5)).unwrap(), 0);
        }

        assert_eq!(file_count(t.store().unknown_root()), 1);
        assert!(!t.store().known_root().exists());
        assert_eq!(t.unknown_sightings().len(), 1);
        assert_eq!(encoder.calls, 0);
    }

    #[test]
    fn test_label_failure_still_reloads_known() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let face = RgbImage::from_pixel(10, 10, Rgb(GREEN));
        let first = t.store().save_unknown(&face, at(0), 0).unwrap().unwrap();
        let second = t.store().save_unknown(&face, at(1), 0).unwrap().unwrap();
        t.process_detection_at(&color_embedding(GREEN), &face, 0, at(2)).unwrap();

        // A directory squatting on the second file's destination makes its rename fail.
        let stamp = at(30).format(FILE_STAMP_FORMAT);
        let second_name = second.file_name().unwrap().to_string_lossy();
        let blocker = dir.path().join("known_faces/Jo").join(format!("{stamp}_{second_name}"));
        fs::create_dir_all(blocker.join("inner")).unwrap();

        let err = t.label_unknowns_at("Jo", &mut ColorEncoder::default(), at(30));
        assert!(matches!(err, Err(TrackerError::Store(StoreError::Io { .. }))));

        assert!(!first.exists());
        assert!(second.exists());
        assert!(t.known_names().any(|n| n == "Jo"));
        assert!(t.unknown_sightings().is_empty());
    }

    #[test]
    fn test_label_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let err = t.label_unknowns_at("../evil", &mut ColorEncoder::default(), at(0));
        assert!(matches!(err, Err(TrackerError::Store(StoreError::InvalidName(_)))));
    }

    #[test]
    fn test_process_frame_journals_face_count() {
        let dir = tempfile::tempdir().unwrap();
        write_reference(dir.path(), "Ida", "a.png", RED);
        let mut t = tracker(dir.path());
        let mut encoder = ColorEncoder::default();
        t.load_known_identities(&mut encoder).unwrap();

        let frame = striped(&[RED, [0, 0, 0], GREEN], 12);
        let report = t.process_frame(&frame, &mut encoder).unwrap();

        assert_eq!(report.faces, 2);
        assert!(matches!(report.outcomes[0], SightingOutcome::Known { ref name, .. } if name == "Ida"));
        match &report.outcomes[1] {
            SightingOutcome::NewUnknown { saved: Some(path), .. } => {
                let saved = image::open(path).unwrap();
                assert_eq!((saved.width(), saved.height()), (10, 12));
                assert!(path.to_string_lossy().ends_with("_1.jpg"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let empty = RgbImage::new(20, 12);
        let report = t.process_frame(&empty, &mut encoder).unwrap();
        assert_eq!(report.faces, 0);

        let log = t.journal().read_today().unwrap();
        let messages: Vec<&str> = log.lines().filter_map(|l| l.split_once(',')).map(|(_, m)| m).collect();
        assert_eq!(messages, vec!["Detected 2 face(s)", "Detected 0 face(s)"]);
    }
}
