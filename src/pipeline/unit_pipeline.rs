//! Applies swap units to images, fanning out over source identities.

use crate::error::Result;
use crate::face::{face_similarity, FaceRecord};
use crate::face_processor::face_locator::FaceLocator;
use crate::face_swapper::FaceSwapper;
use crate::pipeline::safety::{AllowAll, ContentFilter};
use crate::pipeline::unit::{ImageResult, SwapUnit};
use image::RgbImage;
use std::sync::Arc;

/// An image variant together with the accumulated similarity info.
pub type Variant = (RgbImage, Option<String>);

pub struct UnitPipeline {
    locator: FaceLocator,
    swapper: Arc<FaceSwapper>,
    filter: Arc<dyn ContentFilter>,
    upscale: bool,
    force_blend: bool,
}

impl UnitPipeline {
    pub fn new(locator: FaceLocator, swapper: Arc<FaceSwapper>) -> Self {
        let upscale = swapper.options().enabled;
        Self {
            locator,
            swapper,
            filter: Arc::new(AllowAll),
            upscale,
            force_blend: false,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_upscale(mut self, upscale: bool) -> Self {
        self.upscale = upscale;
        self
    }

    /// Always swap the blended identity, whatever each unit says.
    pub fn with_force_blend(mut self, force_blend: bool) -> Self {
        self.force_blend = force_blend;
        self
    }

    fn target_faces(&self, image: &RgbImage, source: &FaceRecord, unit: &SwapUnit) -> Result<Vec<FaceRecord>> {
        let mut faces = self.locator.locate(image, unit.sort_by_size)?;
        if unit.same_gender {
            faces.retain(|face| face.gender == source.gender);
        }
        Ok(faces)
    }

    /// Swap `source` into every selected face of `target`.
    ///
    /// Faces are swapped in order and each swap reads the pixels written by
    /// the previous one. Similarities are measured on the result when the unit
    /// asks for them.
    pub fn swap_face(
        &self,
        reference: &FaceRecord,
        source: &FaceRecord,
        target: &RgbImage,
        unit: &SwapUnit,
    ) -> Result<ImageResult> {
        let targets = self.target_faces(target, source, unit)?;
        tracing::info!(faces = targets.len(), indices = ?unit.faces_index, "swapping target faces");

        let mut image = target.clone();
        for (i, face) in targets.iter().enumerate() {
            if unit.faces_index.contains(&i) {
                tracing::debug!(index = i, bbox = ?face.bbox, "swapping face");
                image = self.swapper.swap_one_face(&image, face, source, self.upscale)?;
            }
        }

        let mut result = ImageResult::new(image);
        if unit.compute_similarity || unit.check_similarity {
            let swapped = self.target_faces(&result.image, source, unit)?;
            for (i, face) in swapped.iter().enumerate() {
                if unit.faces_index.contains(&i) && i < targets.len() {
                    result.similarity.insert(i, face_similarity(source, face)?);
                    result.ref_similarity.insert(i, face_similarity(reference, face)?);
                }
            }
        }
        Ok(result)
    }

    /// Apply one unit to one image, one variant per accepted identity.
    pub fn apply_unit(&self, unit: &SwapUnit, image: RgbImage, info: Option<String>) -> Result<Vec<Variant>> {
        if !unit.enabled {
            return Ok(vec![(image, info)]);
        }
        if !self.filter.is_safe(&image)? {
            tracing::warn!("image flagged by the content filter, left untouched");
            return Ok(vec![(image, info)]);
        }

        let identities = unit.identities(self.force_blend)?;
        let mut variants = Vec::with_capacity(identities.len());
        for (label, identity) in identities {
            let reference = unit.reference_face.as_ref().unwrap_or(identity);
            let result = self.swap_face(reference, identity, &image, unit)?;
            if unit.accepts(&result) {
                let description = result.describe(&label, info.as_deref());
                variants.push((result.image, Some(description)));
            } else {
                tracing::warn!(
                    identity = %label,
                    similarity = ?result.similarity,
                    ref_similarity = ?result.ref_similarity,
                    min_sim = unit.min_sim,
                    min_ref_sim = unit.min_ref_sim,
                    "result rejected by similarity check"
                );
            }
        }
        Ok(variants)
    }

    /// Apply every unit in order to every variant produced so far.
    pub fn apply_units(&self, units: &[SwapUnit], images: Vec<Variant>) -> Result<Vec<Variant>> {
        units.iter().enumerate().try_fold(images, |variants, (index, unit)| {
            let mut next = Vec::with_capacity(variants.len());
            for (image, info) in variants {
                next.extend(self.apply_unit(unit, image, info)?);
            }
            tracing::debug!(unit = index, variants = next.len(), "unit applied");
            Ok(next)
        })
    }
}
