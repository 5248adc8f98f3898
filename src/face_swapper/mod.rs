pub mod face_swapper;
pub mod inswapper;
pub mod mask;

pub use face_swapper::FaceSwapper;
pub use inswapper::{InSwapper, SwapEngine};
pub use mask::{MergeMode, PasteParams};
