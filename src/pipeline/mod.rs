pub mod batch;
pub mod safety;
pub mod unit;
pub mod unit_pipeline;

pub use batch::BatchDriver;
pub use safety::{AllowAll, ContentFilter};
pub use unit::{ImageResult, SwapUnit};
pub use unit_pipeline::{UnitPipeline, Variant};
