pub mod batcher;
pub mod config;
pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod init;
pub mod safetensors_util;

pub use batcher::TokenBatcher;
pub use config::ModelConfig;
pub use dictionary::Dictionary;
pub use encoder::NwpRnnEncoder;
pub use error::{NwpError, Result};
