use crate::error::{Result, SwapError};
use crate::face_swapper::mask::{MergeMode, PasteParams};
use crate::post_processor::PostProcessingOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

pub const DETECTION_THRESHOLD_RANGE: RangeInclusive<f32> = 0.1..=0.99;
pub const FTHRESH_RANGE: RangeInclusive<u32> = 5..=250;
pub const EROSION_RANGE: RangeInclusive<f32> = 0.0..=10.0;

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapperConfig {
    pub model_dir: PathBuf,
    pub swap_model: String,
    pub embedding_map: String,
    /// Optional GFPGAN model, registered as the `GFPGAN` restorer when present.
    pub restorer_model: String,
    /// Optional BiSeNet model used by the improved mask.
    pub parsing_model: String,
    pub detection_threshold: f32,
    /// Keep the untouched input alongside the swapped results.
    pub keep_original: bool,
    pub output_dir: Option<PathBuf>,
    pub upscaled_swapper: UpscaledSwapperOptions,
    pub postprocessing: PostProcessingOptions,
    pub units: Vec<UnitConfig>,
}

impl Default for SwapperConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            swap_model: "inswapper_128.onnx".to_string(),
            embedding_map: "inswapper_128.emap".to_string(),
            restorer_model: "GFPGANv1.4.onnx".to_string(),
            parsing_model: "face_parsing.onnx".to_string(),
            detection_threshold: 0.5,
            keep_original: false,
            output_dir: None,
            upscaled_swapper: UpscaledSwapperOptions::default(),
            postprocessing: PostProcessingOptions::default(),
            units: Vec::new(),
        }
    }
}

/// Settings of the 4x swap branch and the paste-back masks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaledSwapperOptions {
    pub enabled: bool,
    pub upscaler: Option<String>,
    pub sharpen: bool,
    pub fixcolor: bool,
    pub improved_mask: bool,
    pub face_restorer: Option<String>,
    pub restorer_weight: f32,
    pub restorer_visibility: f32,
    pub fthresh: u32,
    pub erosion: f32,
    pub merge_mode: MergeMode,
}

impl Default for UpscaledSwapperOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            upscaler: Some("Lanczos".to_string()),
            sharpen: false,
            fixcolor: false,
            improved_mask: true,
            face_restorer: None,
            restorer_weight: 1.0,
            restorer_visibility: 1.0,
            fthresh: 10,
            erosion: 1.0,
            merge_mode: MergeMode::Presence,
        }
    }
}

impl UpscaledSwapperOptions {
    pub fn paste_params(&self) -> PasteParams {
        PasteParams {
            fthresh: self.fthresh as f32,
            erosion_factor: self.erosion,
            merge_mode: self.merge_mode,
        }
    }

    /// Post-processing used to super-resolve a generated patch by `scale`.
    pub fn super_resolution_options(&self, scale: f32) -> PostProcessingOptions {
        PostProcessingOptions {
            upscaler_name: self.upscaler.clone(),
            scale,
            upscale_visibility: 1.0,
            face_restorer_name: self.face_restorer.clone(),
            restorer_weight: self.restorer_weight,
            restorer_visibility: self.restorer_visibility,
            ..PostProcessingOptions::default()
        }
    }
}

/// One `[[units]]` table. Image paths are resolved against the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub enabled: bool,
    pub source_images: Vec<PathBuf>,
    pub reference_image: Option<PathBuf>,
    pub faces_index: BTreeSet<usize>,
    pub same_gender: bool,
    pub blend_faces: bool,
    pub sort_by_size: bool,
    pub check_similarity: bool,
    pub compute_similarity: bool,
    pub min_sim: f32,
    pub min_ref_sim: f32,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source_images: Vec::new(),
            reference_image: None,
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

impl SwapperConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        tracing::debug!(path = %path.display(), units = config.units.len(), "loaded configuration");
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.model_dir);
        if let Some(dir) = self.output_dir.as_mut() {
            resolve(dir);
        }
        for unit in &mut self.units {
            unit.source_images.iter_mut().for_each(resolve);
            if let Some(reference) = unit.reference_image.as_mut() {
                resolve(reference);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !DETECTION_THRESHOLD_RANGE.contains(&self.detection_threshold) {
            return Err(SwapError::config(format!(
                "detection_threshold {} outside {:?}",
                self.detection_threshold, DETECTION_THRESHOLD_RANGE
            )));
        }
        let upscaled = &self.upscaled_swapper;
        if !FTHRESH_RANGE.contains(&upscaled.fthresh) {
            return Err(SwapError::config(format!(
                "fthresh {} outside {:?}",
                upscaled.fthresh, FTHRESH_RANGE
            )));
        }
        if !EROSION_RANGE.contains(&upscaled.erosion) {
            return Err(SwapError::config(format!(
                "erosion {} outside {:?}",
                upscaled.erosion, EROSION_RANGE
            )));
        }
        check_unit_interval("upscaled_swapper.restorer_visibility", upscaled.restorer_visibility)?;
        check_unit_interval("postprocessing.restorer_visibility", self.postprocessing.restorer_visibility)?;
        check_unit_interval("postprocessing.upscale_visibility", self.postprocessing.upscale_visibility)?;
        if !(self.postprocessing.scale.is_finite() && self.postprocessing.scale > 0.0) {
            return Err(SwapError::config(format!(
                "postprocessing.scale must be positive, got {}",
                self.postprocessing.scale
            )));
        }

        for (i, unit) in self.units.iter().enumerate() {
            if !unit.enabled {
                continue;
            }
            if unit.source_images.is_empty() {
                return Err(SwapError::config(format!("unit {i} is enabled but has no source_images")));
            }
            check_unit_interval(&format!("units[{i}].min_sim"), unit.min_sim)?;
            check_unit_interval(&format!("units[{i}].min_ref_sim"), unit.min_ref_sim)?;
        }
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SwapError::config(format!("{name} must be within 0..=1, got {value}")))
    }
}
