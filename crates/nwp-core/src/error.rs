use thiserror::Error;

#[derive(Error, Debug)]
pub enum NwpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("Dictionary is empty")]
    EmptyDictionary,

    #[error("Token {token:?} uses index 0, which is reserved for padding")]
    ReservedIndex { token: String },

    #[error("Token {token:?} has index {index}, outside an embedding table of {rows} rows")]
    IndexOutOfRange { token: String, index: i64, rows: i64 },

    #[error("Invalid model config: {0}")]
    InvalidConfig(String),

    #[error("Unsupported dtype in checkpoint: {0}")]
    UnsupportedDtype(String),

    #[error("Checkpoint tensor {name} has shape {found:?}, model expects {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
}

pub type Result<T> = std::result::Result<T, NwpError>;
