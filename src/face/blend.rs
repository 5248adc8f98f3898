use crate::error::{Result, SwapError};
use crate::face::face_record::FaceRecord;
use ndarray::Array1;

/// Average several source faces into one identity.
///
/// The embedding is the arithmetic mean; gender, age and geometry come from the
/// first face. An empty input yields `None`.
pub fn blend_faces(faces: &[FaceRecord]) -> Result<Option<FaceRecord>> {
    let Some(first) = faces.first() else {
        return Ok(None);
    };

    let dim = first.embedding.len();
    if let Some(bad) = faces.iter().find(|f| f.embedding.len() != dim) {
        return Err(SwapError::config(format!(
            "embedding shape mismatch: {} vs {}",
            bad.embedding.len(),
            dim
        )));
    }

    let mut sum = Array1::<f32>::zeros(dim);
    for face in faces {
        sum += &face.embedding;
    }
    let mean = sum / faces.len() as f32;

    if faces.len() > 1 && mean == first.embedding {
        return Err(SwapError::config(
            "blended identity is identical to the first source face",
        ));
    }

    tracing::debug!(count = faces.len(), "blended source faces");
    Ok(Some(first.clone().with_embedding(mean)))
}
