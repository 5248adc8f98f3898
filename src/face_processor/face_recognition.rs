use crate::error::{Result, SwapError};
use crate::face::Keypoints;
use crate::face_processor::face_align::norm_crop;
use crate::utils::process_img::{blob_from_image, load_session};
use image::RgbImage;
use ndarray::Array1;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;

/// ArcFace identity embedding extractor.
pub struct FaceRecognition {
    model: Session,
    input_name: String,
}

impl FaceRecognition {
    pub fn new(model_path: &Path) -> Result<Self> {
        let model = load_session(model_path, 4)?;
        let input_name = model
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input.1".to_string());
        Ok(Self { model, input_name })
    }

    /// Raw (unnormalised) embedding of the face at `keypoints`.
    pub fn recognition(&mut self, img: &RgbImage, keypoints: &Keypoints) -> Result<Array1<f32>> {
        let (aligned, _) = norm_crop(img, keypoints, ARCFACE_INPUT_SIZE)?;
        let input = blob_from_image(&aligned, [ARCFACE_MEAN; 3], [ARCFACE_STD; 3]);

        let outputs = self.model.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(input.view())?
        ])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;
        if raw.is_empty() {
            return Err(SwapError::Inference("recognizer returned an empty embedding".into()));
        }

        Ok(Array1::from(raw.to_vec()))
    }
}
