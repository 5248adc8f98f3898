pub mod blend;
pub mod face_record;
pub mod similarity;

pub use blend::blend_faces;
pub use face_record::{BoundingBox, FaceRecord, Gender, Keypoints};
pub use similarity::{cosine_similarity, face_similarity};
