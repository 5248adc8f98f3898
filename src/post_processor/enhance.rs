use crate::error::{Result, SwapError};
use crate::face_processor::face_align::norm_crop;
use crate::face_processor::face_analyser::{DetectionConfig, FaceAnalyser};
use crate::face_swapper::mask::{paste_back, PasteParams};
use crate::utils::process_img::{blob_from_image, load_session, unit_tensor_to_image};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Ix4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

const GFPGAN_FACE_SIZE: u32 = 512;

/// Image super-resolution by a scale factor.
pub trait Upscaler: Send + Sync {
    fn name(&self) -> &str;
    fn upscale(&self, image: &RgbImage, scale: f32) -> Result<RgbImage>;
}

/// Face restoration at the input resolution. `weight` is the restorer's own
/// fidelity knob; restorers without one ignore it.
pub trait FaceRestorer: Send + Sync {
    fn name(&self) -> &str;
    fn restore(&self, image: &RgbImage, weight: f32) -> Result<RgbImage>;
}

/// Plain resampling upscaler.
pub struct ResizeUpscaler {
    name: &'static str,
    filter: FilterType,
}

impl ResizeUpscaler {
    pub fn lanczos() -> Self {
        Self { name: "Lanczos", filter: FilterType::Lanczos3 }
    }

    pub fn nearest() -> Self {
        Self { name: "Nearest", filter: FilterType::Nearest }
    }

    pub fn bilinear() -> Self {
        Self { name: "Bilinear", filter: FilterType::Triangle }
    }

    pub fn bicubic() -> Self {
        Self { name: "Bicubic", filter: FilterType::CatmullRom }
    }
}

pub fn scaled_size(image: &RgbImage, scale: f32) -> Result<(u32, u32)> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(SwapError::config(format!("invalid upscale factor {scale}")));
    }
    let w = ((image.width() as f32 * scale).round() as u32).max(1);
    let h = ((image.height() as f32 * scale).round() as u32).max(1);
    Ok((w, h))
}

impl Upscaler for ResizeUpscaler {
    fn name(&self) -> &str {
        self.name
    }

    fn upscale(&self, image: &RgbImage, scale: f32) -> Result<RgbImage> {
        let (w, h) = scaled_size(image, scale)?;
        Ok(imageops::resize(image, w, h, self.filter))
    }
}

/// GFPGAN v1.4 restorer.
///
/// With an analyser every detected face is aligned to 512x512, restored and
/// feathered back; without one the whole image is treated as a face crop.
pub struct GfpganRestorer {
    gfpgan: Mutex<Session>,
    input_name: String,
    analyser: Option<Arc<dyn FaceAnalyser>>,
}

impl GfpganRestorer {
    pub fn new(model_path: &Path) -> Result<Self> {
        let gfpgan = load_session(model_path, 4)?;
        let input_name = gfpgan
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());
        Ok(Self {
            gfpgan: Mutex::new(gfpgan),
            input_name,
            analyser: None,
        })
    }

    pub fn with_analyser(mut self, analyser: Arc<dyn FaceAnalyser>) -> Self {
        self.analyser = Some(analyser);
        self
    }

    /// Restore one 512x512 face crop.
    fn enhance_face(&self, face: &RgbImage) -> Result<RgbImage> {
        // [-1, 1] in, [-1, 1] out
        let input = blob_from_image(face, [127.5; 3], [127.5; 3]);
        let mut gfpgan = self.gfpgan.lock();
        let outputs = gfpgan.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(input.view())?
        ])?;
        let output = outputs[0].try_extract_array::<f32>()?.into_dimensionality::<Ix4>()?;
        let unit = output.mapv(|v| v.clamp(-1.0, 1.0) * 0.5 + 0.5);
        unit_tensor_to_image(unit.view())
    }
}

impl FaceRestorer for GfpganRestorer {
    fn name(&self) -> &str {
        "GFPGAN"
    }

    fn restore(&self, image: &RgbImage, _weight: f32) -> Result<RgbImage> {
        let Some(analyser) = &self.analyser else {
            let face = imageops::resize(image, GFPGAN_FACE_SIZE, GFPGAN_FACE_SIZE, FilterType::Lanczos3);
            let restored = self.enhance_face(&face)?;
            return Ok(imageops::resize(&restored, image.width(), image.height(), FilterType::Lanczos3));
        };

        let faces = analyser.analyse(image, &DetectionConfig::default())?;
        tracing::debug!(count = faces.len(), "restoring faces");
        let mut result = image.clone();
        for face in &faces {
            let (crop, m) = norm_crop(&result, &face.keypoints, GFPGAN_FACE_SIZE)?;
            let restored = self.enhance_face(&crop)?;
            result = paste_back(&result, &restored, None, &m, &PasteParams::default())?;
        }
        Ok(result)
    }
}

/// Named upscalers and restorers available to the swapper and post-processing.
#[derive(Clone, Default)]
pub struct Enhancers {
    upscalers: Vec<Arc<dyn Upscaler>>,
    restorers: Vec<Arc<dyn FaceRestorer>>,
}

impl Enhancers {
    /// The resampling upscalers, no restorers.
    pub fn with_builtin_upscalers() -> Self {
        let mut enhancers = Self::default();
        enhancers.register_upscaler(Arc::new(ResizeUpscaler::lanczos()));
        enhancers.register_upscaler(Arc::new(ResizeUpscaler::nearest()));
        enhancers.register_upscaler(Arc::new(ResizeUpscaler::bilinear()));
        enhancers.register_upscaler(Arc::new(ResizeUpscaler::bicubic()));
        enhancers
    }

    /// Replaces any upscaler with the same name.
    pub fn register_upscaler(&mut self, upscaler: Arc<dyn Upscaler>) {
        self.upscalers.retain(|u| !u.name().eq_ignore_ascii_case(upscaler.name()));
        self.upscalers.push(upscaler);
    }

    pub fn register_restorer(&mut self, restorer: Arc<dyn FaceRestorer>) {
        self.restorers.retain(|r| !r.name().eq_ignore_ascii_case(restorer.name()));
        self.restorers.push(restorer);
    }

    pub fn upscaler(&self, name: &str) -> Option<Arc<dyn Upscaler>> {
        self.upscalers.iter().find(|u| u.name().eq_ignore_ascii_case(name)).cloned()
    }

    pub fn restorer(&self, name: &str) -> Option<Arc<dyn FaceRestorer>> {
        self.restorers.iter().find(|r| r.name().eq_ignore_ascii_case(name)).cloned()
    }

    pub fn upscaler_names(&self) -> Vec<&str> {
        self.upscalers.iter().map(|u| u.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_resize_upscaler() {
        let img = RgbImage::from_pixel(10, 6, Rgb([40, 80, 120]));
        let up = ResizeUpscaler::lanczos().upscale(&img, 4.0).unwrap();
        assert_eq!(up.dimensions(), (40, 24));
        assert_eq!(up.get_pixel(20, 12), &Rgb([40, 80, 120]));
        assert!(ResizeUpscaler::nearest().upscale(&img, 0.0).is_err());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let enhancers = Enhancers::with_builtin_upscalers();
        assert_eq!(enhancers.upscaler("lanczos").map(|u| u.name().to_string()), Some("Lanczos".into()));
        assert!(enhancers.upscaler("LDSR").is_none());
        assert!(enhancers.restorer("GFPGAN").is_none());
        assert_eq!(enhancers.upscaler_names().len(), 4);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut enhancers = Enhancers::with_builtin_upscalers();
        enhancers.register_upscaler(Arc::new(ResizeUpscaler::nearest()));
        assert_eq!(enhancers.upscaler_names().len(), 4);
    }
}
