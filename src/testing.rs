//! Deterministic stand-ins for the model-backed collaborators.

use crate::error::Result;
use crate::face::{BoundingBox, FaceRecord};
use crate::face_processor::face_align::ARCFACE_DST;
use crate::face_processor::face_analyser::{DetectionConfig, FaceAnalyser};
use crate::face_processor::face_parsing::FaceSegmenter;
use crate::face_swapper::inswapper::SwapEngine;
use crate::pipeline::safety::ContentFilter;
use crate::post_processor::enhance::FaceRestorer;
use crate::post_processor::post_processor::Inpainter;
use crate::post_processor::PostProcessingOptions;
use image::{GrayImage, Rgb, RgbImage};
use ndarray::{Array1, Array2, Array4, ArrayView2, ArrayView4};
use parking_lot::Mutex;

/// Square face at `(x0, y0)` with landmarks laid out like the ArcFace template.
pub fn face_at(x0: f32, y0: f32, side: f32, embedding: &[f32]) -> FaceRecord {
    let s = side / 112.0;
    let keypoints = ARCFACE_DST.map(|(x, y)| (x0 + x * s, y0 + y * s));
    FaceRecord::new(
        BoundingBox::new(x0, y0, x0 + side, y0 + side),
        keypoints,
        Array1::from(embedding.to_vec()),
    )
}

pub struct FnAnalyser<F>(F);

impl<F> FnAnalyser<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> FaceAnalyser for FnAnalyser<F>
where
    F: Fn(&RgbImage, &DetectionConfig) -> Vec<FaceRecord> + Send + Sync,
{
    fn analyse(&self, image: &RgbImage, config: &DetectionConfig) -> Result<Vec<FaceRecord>> {
        Ok((self.0)(image, config))
    }
}

/// Returns the same faces for every image.
pub fn fixed_analyser(faces: Vec<FaceRecord>) -> FnAnalyser<impl Fn(&RgbImage, &DetectionConfig) -> Vec<FaceRecord> + Send + Sync> {
    FnAnalyser::new(move |_: &RgbImage, _: &DetectionConfig| faces.clone())
}

/// Engine with an identity embedding map that either paints a flat patch or
/// echoes its input crop.
pub struct StubEngine {
    size: u32,
    emap: Array2<f32>,
    fill: Option<f32>,
}

impl StubEngine {
    pub fn solid(size: u32, dim: usize, value: u8) -> Self {
        Self {
            size,
            emap: Array2::eye(dim),
            // half a step up so decoding truncates to `value`
            fill: Some((value as f32 + 0.5) / 255.0),
        }
    }

    pub fn echo(size: u32, dim: usize) -> Self {
        Self {
            size,
            emap: Array2::eye(dim),
            fill: None,
        }
    }
}

impl SwapEngine for StubEngine {
    fn input_size(&self) -> u32 {
        self.size
    }

    fn embedding_map(&self) -> ArrayView2<'_, f32> {
        self.emap.view()
    }

    fn infer(&self, blob: ArrayView4<f32>, _latent: ArrayView2<f32>) -> Result<Array4<f32>> {
        Ok(match self.fill {
            Some(v) => Array4::from_elem(blob.raw_dim(), v),
            None => blob.mapv(|v| v + 0.5 / 255.0),
        })
    }
}

pub struct FnSegmenter<F>(F);

impl<F> FnSegmenter<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> FaceSegmenter for FnSegmenter<F>
where
    F: Fn(&RgbImage) -> GrayImage + Send + Sync,
{
    fn face_mask(&self, face: &RgbImage) -> Result<GrayImage> {
        Ok((self.0)(face))
    }
}

/// Restorer named `fill` that paints the whole image one grey level.
pub struct FillRestorer(pub u8);

impl FaceRestorer for FillRestorer {
    fn name(&self) -> &str {
        "fill"
    }

    fn restore(&self, image: &RgbImage, _weight: f32) -> Result<RgbImage> {
        Ok(RgbImage::from_pixel(image.width(), image.height(), Rgb([self.0; 3])))
    }
}

/// Records `(width, first red value)` of every image it is given.
#[derive(Default)]
pub struct RecordingInpainter {
    seen: Mutex<Vec<(u32, u8)>>,
}

impl RecordingInpainter {
    pub fn seen(&self) -> Vec<(u32, u8)> {
        self.seen.lock().clone()
    }
}

impl Inpainter for RecordingInpainter {
    fn inpaint(&self, image: &RgbImage, _options: &PostProcessingOptions) -> Result<RgbImage> {
        self.seen.lock().push((image.width(), image.get_pixel(0, 0)[0]));
        Ok(image.clone())
    }
}

pub struct FnFilter<F>(F);

impl<F> FnFilter<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ContentFilter for FnFilter<F>
where
    F: Fn(&RgbImage) -> Result<bool> + Send + Sync,
{
    fn is_safe(&self, image: &RgbImage) -> Result<bool> {
        (self.0)(image)
    }
}
