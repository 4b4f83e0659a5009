use serde::Serialize;

/// Cosine similarity at which two ArcFace embeddings are taken to be the same person.
pub const ARCFACE_MIN_COSINE: f32 = 0.40;

/// Default maximum Euclidean distance for two embeddings to count as the same person.
///
/// Equal to `tolerance_for_cosine(ARCFACE_MIN_COSINE)`: embeddings are
/// L2-normalised, so `d = sqrt(2 - 2 cos)`.
pub const DEFAULT_TOLERANCE: f32 = 1.095_445_1;

/// Euclidean tolerance equivalent to a minimum cosine similarity between unit vectors.
pub fn tolerance_for_cosine(min_cosine: f32) -> f32 {
    (2.0 - 2.0 * min_cosine).max(0.0).sqrt()
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer pixel rectangle `(x, y, width, height)` clipped to a frame.
    ///
    /// A box lying entirely outside the frame yields a zero-sized rectangle.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let fw = frame_width as f32;
        let fh = frame_height as f32;

        let x0 = self.x.floor().clamp(0.0, fw);
        let y0 = self.y.floor().clamp(0.0, fh);
        let x1 = (self.x + self.width).ceil().clamp(0.0, fw);
        let y1 = (self.y + self.height).ceil().clamp(0.0, fh);

        (
            x0 as u32,
            y0 as u32,
            (x1 - x0).max(0.0) as u32,
            (y1 - y0).max(0.0) as u32,
        )
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;

        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different lengths come from different models and are
    /// infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in an image: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A named person and their single reference embedding.
#[derive(Debug, Clone, Serialize)]
pub struct KnownIdentity {
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Gallery position of the closest reference within tolerance.
    pub index: Option<usize>,
    /// Distance to the closest reference, matched or not. Infinite for an empty gallery.
    pub distance: f32,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for comparing a query embedding against an ordered gallery.
pub trait Matcher {
    fn compare<'a, I>(&self, query: &Embedding, gallery: I) -> MatchResult
    where
        I: IntoIterator<Item = &'a Embedding>;
}

/// Closest-match-wins Euclidean matcher.
///
/// Every gallery entry is visited. Exact distance ties go to the earliest entry,
/// so the outcome depends only on gallery order.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare<'a, I>(&self, query: &Embedding, gallery: I) -> MatchResult
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, reference) in gallery.into_iter().enumerate() {
            let dist = query.distance(reference);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        MatchResult {
            index: best_idx.filter(|_| best_dist <= self.tolerance),
            distance: best_dist,
        }
    }
}
