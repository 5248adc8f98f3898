pub mod face_align;
pub mod face_analyser;
pub mod face_locator;
pub mod face_parsing;
pub mod face_recognition;
pub mod gender_age;
pub mod scrfd_detector;

pub use face_analyser::{DetectionConfig, FaceAnalyser, OnnxFaceAnalyser};
pub use face_locator::FaceLocator;
pub use face_parsing::{FaceParser, FaceSegmenter};
