use crate::error::Result;
use crate::face::FaceRecord;
use crate::face_processor::face_recognition::FaceRecognition;
use crate::face_processor::gender_age::GenderAge;
use crate::face_processor::scrfd_detector::ScrfdDetector;
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;

pub const DEFAULT_DETECTION_SIZE: (u32, u32) = (640, 640);
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const RECOGNITION_MODEL: &str = "w600k_r50.onnx";
pub const GENDER_AGE_MODEL: &str = "genderage.onnx";

/// Per-call detector settings. Passed by value into every detection so
/// callers never mutate a shared engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionConfig {
    /// Detector input (width, height).
    pub size: (u32, u32),
    pub threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_DETECTION_SIZE,
            threshold: DEFAULT_DETECTION_THRESHOLD,
        }
    }
}

impl DetectionConfig {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn halved(&self) -> Self {
        Self {
            size: (self.size.0 / 2, self.size.1 / 2),
            threshold: self.threshold,
        }
    }
}

/// Detection + embedding + demographics for every face in an image.
pub trait FaceAnalyser: Send + Sync {
    fn analyse(&self, image: &RgbImage, config: &DetectionConfig) -> Result<Vec<FaceRecord>>;
}

/// SCRFD + ArcFace + gender/age, the `buffalo_l` model pack.
pub struct OnnxFaceAnalyser {
    detector: Mutex<ScrfdDetector>,
    recognizer: Mutex<FaceRecognition>,
    gender_age: Mutex<GenderAge>,
}

impl OnnxFaceAnalyser {
    pub fn load(model_dir: &Path) -> Result<Self> {
        tracing::info!(dir = %model_dir.display(), "loading analysis models, this takes a while");
        Ok(Self {
            detector: Mutex::new(ScrfdDetector::new(&model_dir.join(DETECTOR_MODEL))?),
            recognizer: Mutex::new(FaceRecognition::new(&model_dir.join(RECOGNITION_MODEL))?),
            gender_age: Mutex::new(GenderAge::new(&model_dir.join(GENDER_AGE_MODEL))?),
        })
    }
}

impl FaceAnalyser for OnnxFaceAnalyser {
    fn analyse(&self, image: &RgbImage, config: &DetectionConfig) -> Result<Vec<FaceRecord>> {
        let detections = self.detector.lock().detect(image, config)?;
        tracing::debug!(count = detections.len(), size = ?config.size, "detected faces");

        let mut recognizer = self.recognizer.lock();
        let mut gender_age = self.gender_age.lock();
        detections
            .into_iter()
            .map(|det| {
                let embedding = recognizer.recognition(image, &det.keypoints)?;
                let (gender, age) = gender_age.estimate(image, &det.bbox)?;
                Ok(FaceRecord::new(det.bbox, det.keypoints, embedding)
                    .with_demographics(gender, age)
                    .with_score(det.score))
            })
            .collect()
    }
}
