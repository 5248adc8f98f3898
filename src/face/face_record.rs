use crate::utils::process_img::l2_normalize;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Keypoints = [(f32, f32); 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    Unknown,
}

impl Gender {
    /// Class index of the gender/age head: 0 = female, 1 = male.
    pub fn from_class(index: usize) -> Self {
        match index {
            0 => Gender::Female,
            1 => Gender::Male,
            _ => Gender::Unknown,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Corner-form bounding box `(x0, y0)`-`(x1, y1)` in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1].iter().all(|v| v.is_finite())
    }
}

/// A detected face. Immutable once returned by the analyser.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub bbox: BoundingBox,
    pub keypoints: Keypoints,
    pub embedding: Array1<f32>,
    pub normed_embedding: Array1<f32>,
    pub gender: Gender,
    pub age: u32,
    /// Detector confidence.
    pub score: f32,
}

impl FaceRecord {
    pub fn new(bbox: BoundingBox, keypoints: Keypoints, embedding: Array1<f32>) -> Self {
        let normed_embedding = l2_normalize(&embedding);
        Self {
            bbox,
            keypoints,
            embedding,
            normed_embedding,
            gender: Gender::Unknown,
            age: 0,
            score: 1.0,
        }
    }

    pub fn with_demographics(mut self, gender: Gender, age: u32) -> Self {
        self.gender = gender;
        self.age = age;
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Same face with a different identity embedding; the normalised copy is recomputed.
    pub fn with_embedding(mut self, embedding: Array1<f32>) -> Self {
        self.normed_embedding = l2_normalize(&embedding);
        self.embedding = embedding;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_bbox_metrics() {
        let b = BoundingBox::new(10.0, 20.0, 30.0, 60.0);
        assert_eq!(b.width(), 20.0);
        assert_eq!(b.height(), 40.0);
        assert_eq!(b.area(), 800.0);
        assert_eq!(b.center(), (20.0, 40.0));
        assert!(!BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0).is_finite());
    }

    #[test]
    fn test_new_record_normalizes_embedding() {
        let face = FaceRecord::new(
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            [(0.0, 0.0); 5],
            array![0.0, 2.0],
        );
        assert_eq!(face.embedding, array![0.0, 2.0]);
        assert_eq!(face.normed_embedding, array![0.0, 1.0]);
        assert_eq!(face.gender, Gender::Unknown);
    }

    #[test]
    fn test_gender_from_class() {
        assert_eq!(Gender::from_class(0), Gender::Female);
        assert_eq!(Gender::from_class(1), Gender::Male);
        assert_eq!(Gender::from_class(7), Gender::Unknown);
        assert_eq!(Gender::Male.to_string(), "male");
    }
}
