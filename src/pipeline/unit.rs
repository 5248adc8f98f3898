use crate::config::UnitConfig;
use crate::error::{Result, SwapError};
use crate::face::{blend_faces, FaceRecord};
use crate::face_processor::face_locator::FaceLocator;
use image::RgbImage;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

/// One swap configuration with its source faces already extracted.
#[derive(Debug, Clone)]
pub struct SwapUnit {
    pub enabled: bool,
    pub faces: Vec<FaceRecord>,
    pub blended_face: Option<FaceRecord>,
    pub reference_face: Option<FaceRecord>,
    pub faces_index: BTreeSet<usize>,
    pub same_gender: bool,
    pub blend_faces: bool,
    pub sort_by_size: bool,
    pub check_similarity: bool,
    pub compute_similarity: bool,
    pub min_sim: f32,
    pub min_ref_sim: f32,
}

impl Default for SwapUnit {
    fn default() -> Self {
        Self {
            enabled: true,
            faces: Vec::new(),
            blended_face: None,
            reference_face: None,
            faces_index: BTreeSet::from([0]),
            same_gender: false,
            blend_faces: true,
            sort_by_size: false,
            check_similarity: false,
            compute_similarity: false,
            min_sim: 0.0,
            min_ref_sim: 0.0,
        }
    }
}

impl SwapUnit {
    /// Load the unit's images and extract one source face per image.
    pub fn build(config: &UnitConfig, locator: &FaceLocator) -> Result<Self> {
        let images = config
            .source_images
            .iter()
            .map(|path| load_rgb(path))
            .collect::<Result<Vec<_>>>()?;
        let faces = locator.faces_from_images(&images)?;
        tracing::info!(sources = images.len(), faces = faces.len(), "extracted source faces");

        let reference_face = match &config.reference_image {
            Some(path) => {
                let face = locator.first_face(&load_rgb(path)?)?;
                if face.is_none() {
                    tracing::warn!(path = %path.display(), "no face in reference image, using the identity instead");
                }
                face
            }
            None => None,
        };

        let unit = Self {
            enabled: config.enabled,
            reference_face,
            faces_index: config.faces_index.clone(),
            same_gender: config.same_gender,
            blend_faces: config.blend_faces,
            sort_by_size: config.sort_by_size,
            check_similarity: config.check_similarity,
            compute_similarity: config.compute_similarity,
            min_sim: config.min_sim,
            min_ref_sim: config.min_ref_sim,
            ..Default::default()
        };
        unit.with_faces(faces)
    }

    /// Replace the source faces and recompute the blended identity.
    pub fn with_faces(mut self, faces: Vec<FaceRecord>) -> Result<Self> {
        self.blended_face = blend_faces(&faces)?;
        self.faces = faces;
        Ok(self)
    }

    /// Identities to swap in, each with the label used in result info.
    pub fn identities(&self, force_blend: bool) -> Result<Vec<(String, &FaceRecord)>> {
        if self.blend_faces || force_blend {
            let blended = self
                .blended_face
                .as_ref()
                .ok_or_else(|| SwapError::config("unit has no source face to blend"))?;
            if self.faces.len() > 1 {
                if let Some(reference) = &self.reference_face {
                    if reference.embedding == blended.embedding {
                        return Err(SwapError::config(
                            "reference face is identical to the blended identity",
                        ));
                    }
                }
            }
            return Ok(vec![("blended".to_string(), blended)]);
        }

        if self.faces.is_empty() {
            return Err(SwapError::config("unit has no source faces"));
        }
        Ok(self
            .faces
            .iter()
            .enumerate()
            .map(|(i, face)| (format!("source {i}"), face))
            .collect())
    }

    /// Whether a result passes this unit's similarity thresholds.
    pub fn accepts(&self, result: &ImageResult) -> bool {
        if !self.check_similarity {
            return true;
        }
        !result.similarity.is_empty()
            && result.similarity.values().all(|&s| s >= self.min_sim)
            && result.ref_similarity.values().all(|&s| s >= self.min_ref_sim)
    }
}

/// A swapped image with the similarities measured on it, keyed by face index.
#[derive(Debug, Clone)]
pub struct ImageResult {
    pub image: RgbImage,
    pub similarity: BTreeMap<usize, f32>,
    pub ref_similarity: BTreeMap<usize, f32>,
}

impl ImageResult {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            similarity: BTreeMap::new(),
            ref_similarity: BTreeMap::new(),
        }
    }

    /// `"<label>: similarity = {..}, ref_similarity = {..}"` appended to `previous`.
    pub fn describe(&self, label: &str, previous: Option<&str>) -> String {
        let mut info = String::new();
        if let Some(previous) = previous {
            let _ = write!(info, "{previous}; ");
        }
        let _ = write!(
            info,
            "{label}: similarity = {:?}, ref_similarity = {:?}",
            self.similarity, self.ref_similarity
        );
        info
    }
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face_processor::DetectionConfig;
    use crate::testing::{face_at, fixed_analyser, FnAnalyser};
    use image::Rgb;
    use ndarray::array;
    use std::sync::Arc;

    fn unit_with(faces: Vec<FaceRecord>) -> SwapUnit {
        SwapUnit::default().with_faces(faces).unwrap()
    }

    #[test]
    fn test_identities_blended_or_enumerated() {
        let mut unit = unit_with(vec![
            face_at(0.0, 0.0, 10.0, &[1.0, 0.0]),
            face_at(0.0, 0.0, 10.0, &[0.0, 1.0]),
        ]);
        let blended = unit.identities(false).unwrap();
        assert_eq!(blended.len(), 1);
        assert_eq!(blended[0].0, "blended");
        assert_eq!(blended[0].1.embedding, array![0.5, 0.5]);

        unit.blend_faces = false;
        let labels: Vec<_> = unit.identities(false).unwrap().into_iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ["source 0", "source 1"]);
        assert_eq!(unit.identities(true).unwrap().len(), 1);
    }

    #[test]
    fn test_unit_without_faces_is_rejected() {
        let unit = SwapUnit::default();
        assert!(matches!(unit.identities(false), Err(SwapError::Configuration(_))));
        let unit = SwapUnit {
            blend_faces: false,
            ..Default::default()
        };
        assert!(matches!(unit.identities(false), Err(SwapError::Configuration(_))));
    }

    #[test]
    fn test_reference_equal_to_blend_is_rejected() {
        let mut unit = unit_with(vec![
            face_at(0.0, 0.0, 10.0, &[1.0, 0.0]),
            face_at(0.0, 0.0, 10.0, &[0.0, 1.0]),
        ]);
        unit.reference_face = Some(face_at(0.0, 0.0, 10.0, &[0.5, 0.5]));
        assert!(unit.identities(false).is_err());
    }

    #[test]
    fn test_accepts() {
        let unit = SwapUnit {
            check_similarity: true,
            min_sim: 0.5,
            min_ref_sim: 0.2,
            ..Default::default()
        };
        let mut result = ImageResult::new(RgbImage::new(1, 1));
        assert!(!unit.accepts(&result));
        result.similarity.insert(0, 0.5);
        result.ref_similarity.insert(0, 0.3);
        assert!(unit.accepts(&result));
        result.ref_similarity.insert(1, 0.1);
        assert!(!unit.accepts(&result));
        assert!(SwapUnit::default().accepts(&ImageResult::new(RgbImage::new(1, 1))));
    }

    #[test]
    fn test_describe_chains_previous_info() {
        let mut result = ImageResult::new(RgbImage::new(1, 1));
        result.similarity.insert(0, 1.0);
        assert_eq!(
            result.describe("source 1", Some("blended: similarity = {}, ref_similarity = {}")),
            "blended: similarity = {}, ref_similarity = {}; source 1: similarity = {0: 1.0}, ref_similarity = {}"
        );
    }

    #[test]
    fn test_build_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        RgbImage::from_pixel(8, 8, Rgb([10, 10, 10])).save(&a).unwrap();
        RgbImage::from_pixel(8, 8, Rgb([20, 20, 20])).save(&b).unwrap();

        // the embedding encodes the source image brightness
        let analyser = FnAnalyser::new(|img: &RgbImage, _: &DetectionConfig| {
            let v = img.get_pixel(0, 0)[0] as f32;
            vec![face_at(0.0, 0.0, 8.0, &[v, 1.0])]
        });
        let locator = FaceLocator::new(Arc::new(analyser), 0.5);
        let config = UnitConfig {
            source_images: vec![a, b.clone()],
            reference_image: Some(b),
            faces_index: BTreeSet::from([1]),
            ..Default::default()
        };

        let unit = SwapUnit::build(&config, &locator).unwrap();
        assert_eq!(unit.faces.len(), 2);
        assert_eq!(unit.blended_face.as_ref().unwrap().embedding, array![15.0, 1.0]);
        assert_eq!(unit.reference_face.as_ref().unwrap().embedding, array![20.0, 1.0]);
        assert_eq!(unit.faces_index, BTreeSet::from([1]));
    }

    #[test]
    fn test_build_missing_image_fails() {
        let locator = FaceLocator::new(Arc::new(fixed_analyser(Vec::new())), 0.5);
        let config = UnitConfig {
            source_images: vec!["/nonexistent/face.png".into()],
            ..Default::default()
        };
        assert!(SwapUnit::build(&config, &locator).is_err());
    }
}
