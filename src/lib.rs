pub mod config;
pub mod error;
pub mod face;
pub mod face_processor;
pub mod face_swapper;
pub mod pipeline;
pub mod post_processor;
pub mod registry;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SwapError};
