pub mod color;
pub mod enhance;
pub mod options;
pub mod post_processor;

pub use color::ColorProfile;
pub use enhance::{Enhancers, FaceRestorer, GfpganRestorer, ResizeUpscaler, Upscaler};
pub use options::{InpaintingWhen, PostProcessingOptions};
pub use post_processor::{Inpainter, PostProcessor};
