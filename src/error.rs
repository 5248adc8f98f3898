use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwapError {
    /// Embedding shape mismatch, invalid unit or option values.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to load {model}: {reason}")]
    ModelLoad { model: String, reason: String },
    /// Numeric or shape failure inside the warp/merge sequence.
    #[error("composite failed: {0}")]
    Composite(String),
    #[error("inference failed: {0}")]
    Inference(String),
    /// First failing image of a batch; earlier images are already on disk.
    #[error("batch aborted at image {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<SwapError>,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SwapError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn composite(msg: impl Into<String>) -> Self {
        Self::Composite(msg.into())
    }

    pub fn model_load(model: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SwapError>;
