use crate::error::Result;
use crate::post_processor::enhance::Enhancers;
use crate::post_processor::options::{InpaintingWhen, PostProcessingOptions};
use crate::utils::process_img::blend_images;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;

/// Diffusion-style inpainting over the face regions of an image.
pub trait Inpainter: Send + Sync {
    fn inpaint(&self, image: &RgbImage, options: &PostProcessingOptions) -> Result<RgbImage>;
}

/// Upscale, restore and optionally inpaint a finished swap.
#[derive(Clone)]
pub struct PostProcessor {
    enhancers: Arc<Enhancers>,
    inpainter: Option<Arc<dyn Inpainter>>,
}

impl PostProcessor {
    pub fn new(enhancers: Arc<Enhancers>) -> Self {
        Self {
            enhancers,
            inpainter: None,
        }
    }

    pub fn with_inpainter(mut self, inpainter: Arc<dyn Inpainter>) -> Self {
        self.inpainter = Some(inpainter);
        self
    }

    pub fn enhance(&self, image: &RgbImage, options: &PostProcessingOptions) -> Result<RgbImage> {
        let mut result = upscale_image(&self.enhancers, image, options)?;
        if options.inpainting_when == InpaintingWhen::BeforeRestoreFace {
            result = self.inpaint(result, options)?;
        }
        result = restore_face(&self.enhancers, &result, options)?;
        if options.inpainting_when == InpaintingWhen::AfterRestoreFace {
            result = self.inpaint(result, options)?;
        }
        Ok(result)
    }

    fn inpaint(&self, image: RgbImage, options: &PostProcessingOptions) -> Result<RgbImage> {
        if !options.inpainting_active() {
            return Ok(image);
        }
        match &self.inpainter {
            Some(inpainter) => {
                tracing::info!(steps = options.inpainting_steps, "inpainting");
                inpainter.inpaint(&image, options)
            }
            None => {
                tracing::warn!("inpainting requested but no inpainter is configured, skipping");
                Ok(image)
            }
        }
    }
}

/// Upscale by `options.scale`, then mix with a plain resize by `upscale_visibility`.
pub fn upscale_image(enhancers: &Enhancers, image: &RgbImage, options: &PostProcessingOptions) -> Result<RgbImage> {
    let Some(name) = options.upscaler() else {
        return Ok(image.clone());
    };
    let Some(upscaler) = enhancers.upscaler(name) else {
        tracing::warn!(upscaler = name, "unknown upscaler, skipping upscale");
        return Ok(image.clone());
    };

    tracing::info!(upscaler = name, scale = options.scale, "upscaling");
    let upscaled = upscaler.upscale(image, options.scale)?;
    if options.upscale_visibility >= 1.0 {
        return Ok(upscaled);
    }
    let base = imageops::resize(image, upscaled.width(), upscaled.height(), FilterType::Lanczos3);
    blend_images(&base, &upscaled, options.upscale_visibility)
}

/// Restore faces, then mix with the input by `restorer_visibility`.
pub fn restore_face(enhancers: &Enhancers, image: &RgbImage, options: &PostProcessingOptions) -> Result<RgbImage> {
    let Some(name) = options.restorer() else {
        return Ok(image.clone());
    };
    let Some(restorer) = enhancers.restorer(name) else {
        tracing::warn!(restorer = name, "unknown face restorer, skipping restoration");
        return Ok(image.clone());
    };

    tracing::info!(restorer = name, "restoring faces");
    let restored = restorer.restore(image, options.restorer_weight)?;
    blend_images(image, &restored, options.restorer_visibility)
}
