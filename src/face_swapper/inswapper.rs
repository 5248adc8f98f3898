use crate::error::{Result, SwapError};
use crate::face::FaceRecord;
use crate::utils::process_img::{blob_from_image, load_session, unit_tensor_to_image};
use image::RgbImage;
use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Ix4};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;

pub const INSWAPPER_INPUT_SIZE: u32 = 128;

/// A generator that paints an identity onto an aligned face crop.
pub trait SwapEngine: Send + Sync {
    /// Side of the square aligned crop the engine expects.
    fn input_size(&self) -> u32;

    fn input_mean(&self) -> f32 {
        0.0
    }

    fn input_std(&self) -> f32 {
        255.0
    }

    /// Square projection from a normalised embedding to the latent.
    fn embedding_map(&self) -> ArrayView2<'_, f32>;

    /// `blob` is `[1, 3, S, S]`, `latent` is `[1, D]`. Returns `[1, 3, S, S]` in `[0, 1]`.
    fn infer(&self, blob: ArrayView4<f32>, latent: ArrayView2<f32>) -> Result<Array4<f32>>;
}

/// Project a normalised embedding through the engine's map and renormalise.
pub fn identity_latent(engine: &dyn SwapEngine, normed_embedding: &ndarray::Array1<f32>) -> Result<Array2<f32>> {
    let emap = engine.embedding_map();
    if emap.nrows() != normed_embedding.len() {
        return Err(SwapError::config(format!(
            "embedding of length {} does not match the {}x{} embedding map",
            normed_embedding.len(),
            emap.nrows(),
            emap.ncols()
        )));
    }
    let latent = normed_embedding.dot(&emap);
    let norm = latent.dot(&latent).sqrt();
    if !(norm > 0.0 && norm.is_finite()) {
        return Err(SwapError::config("identity latent has zero or non-finite norm"));
    }
    Ok((latent / norm).insert_axis(ndarray::Axis(0)))
}

/// Run the engine on an aligned crop and decode the generated patch.
pub fn generate_patch(engine: &dyn SwapEngine, crop: &RgbImage, source: &FaceRecord) -> Result<RgbImage> {
    let size = engine.input_size();
    if crop.dimensions() != (size, size) {
        return Err(SwapError::composite(format!(
            "aligned crop is {:?}, engine expects {size}x{size}",
            crop.dimensions()
        )));
    }
    let blob = blob_from_image(crop, [engine.input_mean(); 3], [engine.input_std(); 3]);
    let latent = identity_latent(engine, &source.normed_embedding)?;
    let output = engine.infer(blob.view(), latent.view())?;
    unit_tensor_to_image(output.view())
}

/// InSwapper 128 (`inswapper_128.onnx`) with its embedding map loaded from a
/// raw little-endian f32 file.
pub struct InSwapper {
    model: Mutex<Session>,
    target_name: String,
    source_name: String,
    emap: Array2<f32>,
}

impl InSwapper {
    pub fn new(model_path: &Path, emap_path: &Path) -> Result<Self> {
        let model = load_session(model_path, 8)?;
        let names: Vec<String> = model.inputs.iter().map(|i| i.name.clone()).collect();
        let (target_name, source_name) = match names.as_slice() {
            [target, source, ..] => (target.clone(), source.clone()),
            _ => {
                return Err(SwapError::model_load(
                    model_path.display().to_string(),
                    format!("expected target and source inputs, got {names:?}"),
                ))
            }
        };
        let emap = load_embedding_map(emap_path)?;
        tracing::info!(dim = emap.nrows(), "loaded embedding map");

        Ok(Self {
            model: Mutex::new(model),
            target_name,
            source_name,
            emap,
        })
    }
}

impl SwapEngine for InSwapper {
    fn input_size(&self) -> u32 {
        INSWAPPER_INPUT_SIZE
    }

    fn embedding_map(&self) -> ArrayView2<'_, f32> {
        self.emap.view()
    }

    fn infer(&self, blob: ArrayView4<f32>, latent: ArrayView2<f32>) -> Result<Array4<f32>> {
        let mut model = self.model.lock();
        let outputs = model.run(ort::inputs![
            self.target_name.as_str() => TensorRef::from_array_view(blob)?,
            self.source_name.as_str() => TensorRef::from_array_view(latent)?,
        ])?;
        let output = outputs[0].try_extract_array::<f32>()?;
        Ok(output.into_dimensionality::<Ix4>()?.to_owned())
    }
}

/// Square `D`x`D` matrix stored row-major as little-endian f32.
pub fn load_embedding_map(path: &Path) -> Result<Array2<f32>> {
    let bytes = std::fs::read(path).map_err(|e| SwapError::model_load(path.display().to_string(), e))?;
    parse_embedding_map(&bytes).map_err(|reason| SwapError::model_load(path.display().to_string(), reason))
}

fn parse_embedding_map(bytes: &[u8]) -> std::result::Result<Array2<f32>, String> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(format!("{} bytes is not a whole number of f32 values", bytes.len()));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let dim = (values.len() as f64).sqrt().round() as usize;
    if dim * dim != values.len() {
        return Err(format!("{} values do not form a square matrix", values.len()));
    }
    Array2::from_shape_vec((dim, dim), values).map_err(|e| e.to_string())
}
