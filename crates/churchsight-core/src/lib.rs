//! churchsight-core — Face sighting tracker.
//!
//! Sorts faces seen by a camera into known people and unknown sightings,
//! keeps unknown face crops on disk for later labeling, and journals
//! activity to a daily CSV file. Faces are located and embedded by SCRFD
//! and ArcFace running on ONNX Runtime behind the [`FaceEncoder`] trait.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod journal;
pub mod recognizer;
pub mod store;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use encoder::{default_model_dir, EncoderError, FaceEncoder, OnnxFaceEncoder};
pub use journal::{Journal, JournalError};
pub use store::{FaceStore, StoreError};
pub use tracker::{
    FrameReport, SightingOutcome, SightingTracker, TrackerConfig, TrackerError, UnknownSighting,
};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, FaceDetection, KnownIdentity, MatchResult, Matcher};
