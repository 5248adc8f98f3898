//! Per-face warp, generate, optional 4x refinement and feathered paste-back.

use crate::config::UpscaledSwapperOptions;
use crate::error::Result;
use crate::face::FaceRecord;
use crate::face_processor::face_align::norm_crop;
use crate::face_processor::face_parsing::FaceSegmenter;
use crate::face_swapper::inswapper::{generate_patch, SwapEngine};
use crate::face_swapper::mask::{
    diff_mask, gaussian_blur_image, kernel_for_sigma, paste_back, select_with_mask, union_masks,
};
use crate::post_processor::color::ColorProfile;
use crate::post_processor::enhance::Enhancers;
use crate::post_processor::post_processor::{restore_face, upscale_image};
use crate::utils::process_img::{array_to_image, image_to_array};
use image::imageops::{self, FilterType};
use image::RgbImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use std::sync::Arc;

const UPSCALE_FACTOR: u32 = 4;
const SHARPEN_SIGMA: f32 = 3.0;
// 5x5 square
const FACE_MASK_DILATION_RADIUS: u8 = 2;

pub struct FaceSwapper {
    engine: Arc<dyn SwapEngine>,
    enhancers: Arc<Enhancers>,
    segmenter: Option<Arc<dyn FaceSegmenter>>,
    options: UpscaledSwapperOptions,
}

impl FaceSwapper {
    pub fn new(engine: Arc<dyn SwapEngine>, enhancers: Arc<Enhancers>) -> Self {
        Self {
            engine,
            enhancers,
            segmenter: None,
            options: UpscaledSwapperOptions::default(),
        }
    }

    pub fn with_segmenter(mut self, segmenter: Arc<dyn FaceSegmenter>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    pub fn with_options(mut self, options: UpscaledSwapperOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &UpscaledSwapperOptions {
        &self.options
    }

    /// Replace `target_face` in `target` with the identity of `source`.
    ///
    /// The returned image has the dimensions of `target`. Any shape or numeric
    /// failure is returned as is; nothing is pasted in that case.
    pub fn swap_one_face(
        &self,
        target: &RgbImage,
        target_face: &FaceRecord,
        source: &FaceRecord,
        upscale: bool,
    ) -> Result<RgbImage> {
        let size = self.engine.input_size();
        let (aimg, m) = norm_crop(target, &target_face.keypoints, size)?;
        let fake = generate_patch(self.engine.as_ref(), &aimg, source)?;

        let (fake, diff, m) = if upscale {
            let size = size * UPSCALE_FACTOR;
            let (aimg, m) = norm_crop(target, &target_face.keypoints, size)?;
            let mut fake = self.super_resolve(&fake, size)?;

            if self.options.improved_mask {
                match &self.segmenter {
                    Some(segmenter) => fake = restrict_to_face(segmenter.as_ref(), &aimg, &fake)?,
                    None => tracing::debug!("improved mask requested but no face segmenter is loaded"),
                }
            }

            // measured before cosmetic filters so only the identity change counts
            let diff = diff_mask(&image_to_array(&fake), &image_to_array(&aimg))?;

            if self.options.sharpen {
                fake = sharpen(&fake)?;
            }
            if self.options.fixcolor {
                fake = ColorProfile::from_image(&aimg).apply(&fake);
            }
            (fake, diff, m)
        } else {
            let diff = diff_mask(&image_to_array(&fake), &image_to_array(&aimg))?;
            (fake, diff, m)
        };

        paste_back(target, &fake, Some(&diff), &m, &self.options.paste_params())
    }

    /// Upscale and restore a generated patch to `size`x`size`.
    fn super_resolve(&self, patch: &RgbImage, size: u32) -> Result<RgbImage> {
        let options = self.options.super_resolution_options(UPSCALE_FACTOR as f32);
        let upscaled = upscale_image(&self.enhancers, patch, &options)?;
        let restored = restore_face(&self.enhancers, &upscaled, &options)?;
        if restored.dimensions() == (size, size) {
            return Ok(restored);
        }
        tracing::warn!(
            got = ?restored.dimensions(),
            size,
            upscaler = ?options.upscaler_name,
            "super-resolution did not reach the crop size, resizing with Lanczos"
        );
        Ok(imageops::resize(&restored, size, size, FilterType::Lanczos3))
    }
}

/// Keep generated pixels only where either crop shows a face.
fn restrict_to_face(segmenter: &dyn FaceSegmenter, reference: &RgbImage, fake: &RgbImage) -> Result<RgbImage> {
    let mask = union_masks(&segmenter.face_mask(reference)?, &segmenter.face_mask(fake)?)?;
    let mask = morphology::dilate(&mask, Norm::LInf, FACE_MASK_DILATION_RADIUS);
    select_with_mask(reference, fake, &mask)
}

/// Unsharp mask: `1.5 * image - 0.5 * blur(image, sigma 3)`.
pub fn sharpen(image: &RgbImage) -> Result<RgbImage> {
    let original = image_to_array(image);
    let blurred = gaussian_blur_image(&original, kernel_for_sigma(SHARPEN_SIGMA), Some(SHARPEN_SIGMA));
    array_to_image(&(original * 1.5 - blurred * 0.5))
}
