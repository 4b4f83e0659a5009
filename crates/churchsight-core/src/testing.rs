//! Deterministic encoder for tests.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::{BoundingBox, Embedding, FaceDetection};
use image::{Rgb, RgbImage};

/// Width of one "face" column.
pub const STRIPE: u32 = 10;

/// Treats every non-black 10px column of an image as a face whose embedding is
/// the column's top-left colour scaled to `[0, 1]`.
#[derive(Default)]
pub struct ColorEncoder {
    pub calls: usize,
}

impl FaceEncoder for ColorEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, EncoderError> {
        self.calls += 1;
        let mut faces = Vec::new();
        for x in (0..image.width()).step_by(STRIPE as usize) {
            let Rgb([r, g, b]) = *image.get_pixel(x, 0);
            if r < 16 && g < 16 && b < 16 {
                continue;
            }
            faces.push(FaceDetection {
                bbox: BoundingBox {
                    x: x as f32,
                    y: 0.0,
                    width: STRIPE.min(image.width() - x) as f32,
                    height: image.height() as f32,
                    confidence: 1.0,
                    landmarks: None,
                },
                embedding: color_embedding([r, g, b]),
            });
        }
        Ok(faces)
    }
}

pub fn color_embedding(rgb: [u8; 3]) -> Embedding {
    Embedding::new(rgb.iter().map(|&c| c as f32 / 255.0).collect())
}

/// A frame made of solid-colour face columns.
pub fn striped(colors: &[[u8; 3]], height: u32) -> RgbImage {
    RgbImage::from_fn(STRIPE * colors.len() as u32, height, |x, _| {
        Rgb(colors[(x / STRIPE) as usize])
    })
}
