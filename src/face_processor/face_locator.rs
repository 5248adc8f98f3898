use crate::error::Result;
use crate::face::{face_similarity, FaceRecord};
use crate::face_processor::face_analyser::{DetectionConfig, FaceAnalyser, DEFAULT_DETECTION_SIZE};
use image::RgbImage;
use std::sync::Arc;

/// Detection sizes at or above this are halved when nothing is found.
const MIN_BACKOFF_SIZE: u32 = 320;

/// Ordered face lookup on top of a [`FaceAnalyser`], with adaptive size backoff.
#[derive(Clone)]
pub struct FaceLocator {
    analyser: Arc<dyn FaceAnalyser>,
    threshold: f32,
}

impl FaceLocator {
    pub fn new(analyser: Arc<dyn FaceAnalyser>, threshold: f32) -> Self {
        Self { analyser, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Faces in reading order (left to right), or largest first with `sort_by_size`.
    pub fn locate(&self, image: &RgbImage, sort_by_size: bool) -> Result<Vec<FaceRecord>> {
        let config = DetectionConfig {
            size: DEFAULT_DETECTION_SIZE,
            threshold: self.threshold,
        };
        self.locate_with(image, config, sort_by_size)
    }

    pub fn locate_with(
        &self,
        image: &RgbImage,
        mut config: DetectionConfig,
        sort_by_size: bool,
    ) -> Result<Vec<FaceRecord>> {
        loop {
            let faces = self.analyser.analyse(image, &config)?;
            if !faces.is_empty() {
                return Ok(order_faces(faces, sort_by_size));
            }
            if config.size.0 < MIN_BACKOFF_SIZE || config.size.1 < MIN_BACKOFF_SIZE {
                tracing::debug!(size = ?config.size, "no face found");
                return Ok(Vec::new());
            }
            config = config.halved();
            tracing::debug!(size = ?config.size, "no face found, retrying at a smaller detection size");
        }
    }

    pub fn first_face(&self, image: &RgbImage) -> Result<Option<FaceRecord>> {
        Ok(self.locate(image, false)?.into_iter().next())
    }

    /// First face of every image; images without a face are skipped.
    pub fn faces_from_images(&self, images: &[RgbImage]) -> Result<Vec<FaceRecord>> {
        let mut faces = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            match self.first_face(image)? {
                Some(face) => faces.push(face),
                None => tracing::warn!(index, "no face found in source image, skipping"),
            }
        }
        Ok(faces)
    }

    /// Similarity of the first face in each image, `None` when either has none.
    pub fn compare_faces(&self, a: &RgbImage, b: &RgbImage) -> Result<Option<f32>> {
        let (Some(fa), Some(fb)) = (self.first_face(a)?, self.first_face(b)?) else {
            return Ok(None);
        };
        face_similarity(&fa, &fb).map(Some)
    }
}

/// Largest area first, or ascending left edge. Ties keep detector order.
///
/// A non-finite box cannot be ordered; the whole set is discarded.
pub fn order_faces(mut faces: Vec<FaceRecord>, sort_by_size: bool) -> Vec<FaceRecord> {
    if faces.iter().any(|f| !f.bbox.is_finite()) {
        tracing::warn!("face with a non-finite bounding box, dropping detections");
        return Vec::new();
    }
    if sort_by_size {
        faces.sort_by(|a, b| b.bbox.area().total_cmp(&a.bbox.area()));
    } else {
        faces.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
    }
    faces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_at, FnAnalyser};
    use parking_lot::Mutex;

    #[test]
    fn test_backoff_reaches_160() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = sizes.clone();
        let analyser = FnAnalyser::new(move |_: &RgbImage, config: &DetectionConfig| {
            seen.lock().push(config.size);
            if config.size.0 <= 160 && config.size.1 <= 160 {
                vec![face_at(10.0, 10.0, 50.0, &[1.0, 0.0])]
            } else {
                Vec::new()
            }
        });
        let locator = FaceLocator::new(Arc::new(analyser), 0.5);

        let faces = locator.locate(&RgbImage::new(64, 64), false).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(*sizes.lock(), vec![(640, 640), (320, 320), (160, 160)]);
    }

    #[test]
    fn test_backoff_stops_below_320() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let analyser = FnAnalyser::new(move |_: &RgbImage, _: &DetectionConfig| {
            *counter.lock() += 1;
            Vec::new()
        });
        let locator = FaceLocator::new(Arc::new(analyser), 0.5);
        assert!(locator.locate(&RgbImage::new(8, 8), false).unwrap().is_empty());
        assert_eq!(*calls.lock(), 3);
    }

    #[test]
    fn test_order_by_size() {
        // areas 100, 400, 50
        let faces = vec![
            face_at(0.0, 0.0, 10.0, &[1.0]),
            face_at(20.0, 0.0, 20.0, &[2.0]),
            face_at(50.0, 0.0, 50f32.sqrt(), &[3.0]),
        ];
        let areas: Vec<i32> = order_faces(faces, true)
            .iter()
            .map(|f| f.bbox.area().round() as i32)
            .collect();
        assert_eq!(areas, vec![400, 100, 50]);
    }

    #[test]
    fn test_order_by_position() {
        let faces = vec![
            face_at(30.0, 0.0, 5.0, &[1.0]),
            face_at(10.0, 0.0, 5.0, &[2.0]),
            face_at(20.0, 0.0, 5.0, &[3.0]),
        ];
        let xs: Vec<f32> = order_faces(faces, false).iter().map(|f| f.bbox.x0).collect();
        assert_eq!(xs, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_non_finite_box_yields_empty() {
        let faces = vec![face_at(f32::NAN, 0.0, 5.0, &[1.0]), face_at(1.0, 0.0, 5.0, &[1.0])];
        assert!(order_faces(faces, false).is_empty());
    }

    #[test]
    fn test_compare_faces() {
        let analyser = FnAnalyser::new(|image: &RgbImage, _: &DetectionConfig| {
            if image.width() == 1 {
                return Vec::new();
            }
            let e = if image.width() == 10 { [1.0, 0.0] } else { [1.0, 1.0] };
            vec![face_at(0.0, 0.0, 4.0, &e)]
        });
        let locator = FaceLocator::new(Arc::new(analyser), 0.5);
        let a = RgbImage::new(10, 10);
        let b = RgbImage::new(20, 10);

        let same = locator.compare_faces(&a, &a).unwrap().unwrap();
        assert!((same - 1.0).abs() < 1e-6);
        let diag = locator.compare_faces(&a, &b).unwrap().unwrap();
        assert!((diag - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert_eq!(locator.compare_faces(&a, &RgbImage::new(1, 1)).unwrap(), None);
    }

    #[test]
    fn test_faces_from_images_skips_empty() {
        let analyser = FnAnalyser::new(|image: &RgbImage, _: &DetectionConfig| {
            if image.width() == 1 {
                Vec::new()
            } else {
                vec![face_at(0.0, 0.0, 4.0, &[image.width() as f32])]
            }
        });
        let locator = FaceLocator::new(Arc::new(analyser), 0.5);
        let images = vec![RgbImage::new(5, 5), RgbImage::new(1, 1), RgbImage::new(7, 7)];
        let faces = locator.faces_from_images(&images).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1].embedding[0], 7.0);
    }
}
