use crate::error::{Result, SwapError};
use crate::pipeline::unit::SwapUnit;
use crate::pipeline::unit_pipeline::UnitPipeline;
use crate::post_processor::{PostProcessingOptions, PostProcessor};
use image::RgbImage;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Runs the unit pipeline and post-processing over a list of target images.
pub struct BatchDriver {
    pipeline: UnitPipeline,
    post_processor: PostProcessor,
    keep_original: bool,
}

impl BatchDriver {
    pub fn new(pipeline: UnitPipeline, post_processor: PostProcessor) -> Self {
        Self {
            pipeline,
            post_processor,
            keep_original: false,
        }
    }

    /// Prepend each untouched input to its results.
    pub fn with_keep_original(mut self, keep_original: bool) -> Self {
        self.keep_original = keep_original;
        self
    }

    /// Swap every image with the enabled `units`, post-process and optionally save.
    ///
    /// The first failure aborts the batch as [`SwapError::Batch`]. Files of
    /// images completed before the failing one stay on disk; nothing of the
    /// failing image is written.
    pub fn run(
        &self,
        images: &[RgbImage],
        output_dir: Option<&Path>,
        units: &[SwapUnit],
        options: &PostProcessingOptions,
    ) -> Result<Vec<RgbImage>> {
        let units: Vec<SwapUnit> = units.iter().filter(|u| u.enabled).cloned().collect();
        if units.is_empty() || images.is_empty() {
            tracing::info!(units = units.len(), images = images.len(), "nothing to process");
            return Ok(Vec::new());
        }
        if let Some(dir) = output_dir {
            std::fs::create_dir_all(dir)?;
        }

        let mut results = Vec::new();
        for (index, image) in images.iter().enumerate() {
            let produced = self
                .process_image(image, output_dir, &units, options)
                .map_err(|err| {
                    tracing::error!(index, error = %err, "batch aborted");
                    SwapError::Batch {
                        index,
                        source: Box::new(err),
                    }
                })?;
            tracing::info!(index, results = produced.len(), "image processed");
            results.extend(produced);
        }
        Ok(results)
    }

    fn process_image(
        &self,
        image: &RgbImage,
        output_dir: Option<&Path>,
        units: &[SwapUnit],
        options: &PostProcessingOptions,
    ) -> Result<Vec<RgbImage>> {
        let variants = self.pipeline.apply_units(units, vec![(image.clone(), None)])?;

        let mut swapped = Vec::with_capacity(variants.len());
        for (variant, info) in variants {
            if let Some(info) = &info {
                tracing::info!(info = %info, "swap result");
            }
            swapped.push(self.post_processor.enhance(&variant, options)?);
        }

        if let Some(dir) = output_dir {
            for result in &swapped {
                let path = save_unique(dir, result)?;
                tracing::debug!(path = %path.display(), "saved result");
            }
        }

        if self.keep_original {
            swapped.insert(0, image.clone());
        }
        Ok(swapped)
    }
}

fn save_unique(dir: &Path, image: &RgbImage) -> Result<PathBuf> {
    let path = dir.join(format!("{}.png", Uuid::new_v4()));
    image.save(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face_processor::face_locator::FaceLocator;
    use crate::face_swapper::FaceSwapper;
    use crate::post_processor::enhance::Enhancers;
    use crate::testing::{face_at, fixed_analyser, FnFilter, StubEngine};
    use image::Rgb;
    use std::sync::Arc;

    fn driver() -> BatchDriver {
        let locator = FaceLocator::new(
            Arc::new(fixed_analyser(vec![face_at(8.0, 8.0, 48.0, &[1.0, 0.0])])),
            0.5,
        );
        let enhancers = Arc::new(Enhancers::with_builtin_upscalers());
        let swapper = FaceSwapper::new(Arc::new(StubEngine::solid(128, 2, 255)), enhancers.clone());
        // images 33 pixels wide are refused with an error
        let filter = FnFilter::new(|img: &RgbImage| -> Result<bool> {
            if img.width() == 33 {
                Err(SwapError::Inference("filter failed".into()))
            } else {
                Ok(true)
            }
        });
        let pipeline = UnitPipeline::new(locator, Arc::new(swapper)).with_filter(Arc::new(filter));
        BatchDriver::new(pipeline, PostProcessor::new(enhancers))
    }

    fn unit(count: usize) -> SwapUnit {
        let faces = (0..count)
            .map(|i| face_at(0.0, 0.0, 20.0, &[i as f32, 1.0]))
            .collect();
        SwapUnit {
            blend_faces: false,
            ..Default::default()
        }
        .with_faces(faces)
        .unwrap()
    }

    fn png_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "png"))
            .count()
    }

    #[test]
    fn test_run_saves_every_variant() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        let images = vec![RgbImage::from_pixel(64, 64, Rgb([100, 100, 100])); 2];
        let options = PostProcessingOptions {
            upscaler_name: Some("Nearest".into()),
            scale: 2.0,
            ..Default::default()
        };

        let results = driver()
            .run(&images, Some(&out_dir), &[unit(2)], &options)
            .unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.dimensions() == (128, 128)));
        assert_eq!(png_count(&out_dir), 4);
    }

    #[test]
    fn test_disabled_units_and_empty_inputs() {
        let images = vec![RgbImage::new(64, 64)];
        let mut disabled = unit(1);
        disabled.enabled = false;
        let options = PostProcessingOptions::default();

        assert!(driver().run(&images, None, &[disabled], &options).unwrap().is_empty());
        assert!(driver().run(&[], None, &[unit(1)], &options).unwrap().is_empty());
    }

    #[test]
    fn test_keep_original_is_prepended() {
        let image = RgbImage::from_pixel(64, 64, Rgb([100, 100, 100]));
        let results = driver()
            .with_keep_original(true)
            .run(&[image.clone()], None, &[unit(1)], &PostProcessingOptions::default())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], image);
        assert_ne!(results[1], image);
    }

    #[test]
    fn test_failure_aborts_with_index() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![
            RgbImage::from_pixel(64, 64, Rgb([100, 100, 100])),
            RgbImage::from_pixel(33, 33, Rgb([100, 100, 100])),
            RgbImage::from_pixel(64, 64, Rgb([100, 100, 100])),
        ];

        let err = driver()
            .run(&images, Some(dir.path()), &[unit(2)], &PostProcessingOptions::default())
            .unwrap_err();
        match err {
            SwapError::Batch { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, SwapError::Inference(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        // only the first image's two results were written
        assert_eq!(png_count(dir.path()), 2);
    }
}
