use crate::error::{Result, SwapError};
use crate::utils::process_img::{blob_from_image, load_session};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array3;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;

const PARSING_INPUT_SIZE: u32 = 512;
const IMAGENET_MEAN: [f32; 3] = [0.485 * 255.0, 0.456 * 255.0, 0.406 * 255.0];
const IMAGENET_STD: [f32; 3] = [0.229 * 255.0, 0.224 * 255.0, 0.225 * 255.0];

/// Binary face-region mask for a face crop: 255 inside the face, 0 elsewhere,
/// same size as the input.
pub trait FaceSegmenter: Send + Sync {
    fn face_mask(&self, face: &RgbImage) -> Result<GrayImage>;
}

/// BiSeNet class layout (CelebAMask-HQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum FaceClass {
    Background = 0,
    Skin = 1,
    Nose = 2,
    Glasses = 3,
    LeftEye = 4,
    RightEye = 5,
    LeftBrow = 6,
    RightBrow = 7,
    LeftEar = 8,
    RightEar = 9,
    Mouth = 10,
    UpperLip = 11,
    LowerLip = 12,
    Hair = 13,
    Hat = 14,
    Earring = 15,
    Necklace = 16,
    Neck = 17,
    Cloth = 18,
}

pub const FACE_CLASS_COUNT: usize = 19;

/// Per-region probability thresholds.
#[derive(Debug, Clone)]
pub struct FaceThresholds {
    pub skin: f32,
    pub nose: f32,
    pub eyes: f32,
    pub eyebrows: f32,
    pub mouth: f32,
    pub lips: f32,
}

impl Default for FaceThresholds {
    fn default() -> Self {
        Self {
            skin: 0.5,
            nose: 0.4,
            eyes: 0.3,
            eyebrows: 0.3,
            mouth: 0.4,
            lips: 0.4,
        }
    }
}

impl FaceThresholds {
    fn for_class(&self, class: FaceClass) -> Option<f32> {
        match class {
            FaceClass::Skin => Some(self.skin),
            FaceClass::Nose => Some(self.nose),
            FaceClass::LeftEye | FaceClass::RightEye => Some(self.eyes),
            FaceClass::LeftBrow | FaceClass::RightBrow => Some(self.eyebrows),
            FaceClass::Mouth => Some(self.mouth),
            FaceClass::UpperLip | FaceClass::LowerLip => Some(self.lips),
            _ => None,
        }
    }
}

const FACIAL_CLASSES: [FaceClass; 9] = [
    FaceClass::Skin,
    FaceClass::Nose,
    FaceClass::LeftEye,
    FaceClass::RightEye,
    FaceClass::LeftBrow,
    FaceClass::RightBrow,
    FaceClass::Mouth,
    FaceClass::UpperLip,
    FaceClass::LowerLip,
];

/// BiSeNet face parser (`face_parsing.onnx`).
pub struct FaceParser {
    model: Mutex<Session>,
    input_name: String,
    thresholds: FaceThresholds,
}

impl FaceParser {
    pub fn new(model_path: &Path) -> Result<Self> {
        let model = load_session(model_path, 4)?;
        let input_name = model
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());
        Ok(Self {
            model: Mutex::new(model),
            input_name,
            thresholds: FaceThresholds::default(),
        })
    }

    pub fn with_thresholds(mut self, thresholds: FaceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Per-class probabilities `(C, H, W)` at the model resolution.
    pub fn parse(&self, face: &RgbImage) -> Result<Array3<f32>> {
        let resized = imageops::resize(face, PARSING_INPUT_SIZE, PARSING_INPUT_SIZE, FilterType::Triangle);
        let input = blob_from_image(&resized, IMAGENET_MEAN, IMAGENET_STD);

        let mut model = self.model.lock();
        let outputs = model.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(input.view())?
        ])?;
        let (shape, logits) = outputs[0].try_extract_tensor::<f32>()?;
        if shape.len() != 4 || shape[0] != 1 || shape[1] as usize != FACE_CLASS_COUNT {
            return Err(SwapError::Inference(format!(
                "face parser returned shape {shape:?}, expected [1, {FACE_CLASS_COUNT}, H, W]"
            )));
        }
        let (h, w) = (shape[2] as usize, shape[3] as usize);
        let logits = Array3::from_shape_vec((FACE_CLASS_COUNT, h, w), logits.to_vec())?;
        Ok(softmax_channels(logits))
    }
}

impl FaceSegmenter for FaceParser {
    fn face_mask(&self, face: &RgbImage) -> Result<GrayImage> {
        let probs = self.parse(face)?;
        let mask = facial_mask(&probs, &self.thresholds);
        Ok(imageops::resize(&mask, face.width(), face.height(), FilterType::Nearest))
    }
}

fn softmax_channels(mut logits: Array3<f32>) -> Array3<f32> {
    let (_, h, w) = logits.dim();
    for y in 0..h {
        for x in 0..w {
            let mut lane = logits.slice_mut(ndarray::s![.., y, x]);
            let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            lane.mapv_inplace(|v| (v - max).exp());
            let sum = lane.sum();
            if sum > 0.0 {
                lane /= sum;
            }
        }
    }
    logits
}

/// Union of the facial regions that clear their threshold.
fn facial_mask(probs: &Array3<f32>, thresholds: &FaceThresholds) -> GrayImage {
    let (_, h, w) = probs.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let is_face = FACIAL_CLASSES.iter().any(|&class| {
            let threshold = thresholds.for_class(class).unwrap_or(0.5);
            probs[[class as usize, y, x]] > threshold
        });
        Luma([if is_face { 255 } else { 0 }])
    })
}
