use crate::error::{Result, SwapError};
use crate::face::{BoundingBox, Gender};
use crate::face_processor::face_align::{center_crop_transform, warp_image};
use crate::utils::process_img::{blob_from_image, load_session};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const GENDER_AGE_INPUT_SIZE: u32 = 96;
// crop side is 1.5x the longer bbox side
const GENDER_AGE_CONTEXT: f32 = 1.5;

/// Gender/age head: `[female, male, age / 100]`.
pub struct GenderAge {
    model: Session,
    input_name: String,
}

impl GenderAge {
    pub fn new(model_path: &Path) -> Result<Self> {
        let model = load_session(model_path, 2)?;
        let input_name = model
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "data".to_string());
        Ok(Self { model, input_name })
    }

    pub fn estimate(&mut self, img: &RgbImage, bbox: &BoundingBox) -> Result<(Gender, u32)> {
        let side = bbox.width().max(bbox.height()) * GENDER_AGE_CONTEXT;
        if side <= 0.0 {
            return Ok((Gender::Unknown, 0));
        }
        let scale = GENDER_AGE_INPUT_SIZE as f32 / side;
        let m = center_crop_transform(bbox.center(), GENDER_AGE_INPUT_SIZE, scale);
        let crop = warp_image(img, &m, GENDER_AGE_INPUT_SIZE, GENDER_AGE_INPUT_SIZE)?;
        let input = blob_from_image(&crop, [0.0; 3], [1.0; 3]);

        let outputs = self.model.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(input.view())?
        ])?;
        let (_, pred) = outputs[0].try_extract_tensor::<f32>()?;

        decode_prediction(pred)
    }
}

fn decode_prediction(pred: &[f32]) -> Result<(Gender, u32)> {
    if pred.len() < 3 {
        return Err(SwapError::Inference(format!(
            "gender/age head returned {} values, expected 3",
            pred.len()
        )));
    }
    let class = if pred[1] > pred[0] { 1 } else { 0 };
    let age = (pred[2] * 100.0).round().max(0.0) as u32;
    Ok((Gender::from_class(class), age))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_prediction() {
        assert_eq!(decode_prediction(&[0.2, 0.8, 0.314]).unwrap(), (Gender::Male, 31));
        assert_eq!(decode_prediction(&[0.9, 0.1, 0.05]).unwrap(), (Gender::Female, 5));
        assert!(decode_prediction(&[0.5]).is_err());
    }
}
