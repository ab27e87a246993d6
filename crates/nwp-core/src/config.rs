use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{NwpError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Rows of the embedding table: dictionary size plus the padding row.
    pub num_embeddings: i64,
    /// Width of each token vector.
    pub embedding_dim: i64,
    /// Whether the embedding produces sparse gradients.
    pub sparse: bool,
    /// Index whose embedding receives no gradient.
    pub padding_idx: i64,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            num_embeddings: 1,
            embedding_dim: 400,
            sparse: false,
            padding_idx: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RnnConfig {
    pub input_size: i64,
    pub hidden_size: i64,
    pub num_layers: i64,
    pub batch_first: bool,
    /// Must stay false: a bidirectional encoder sees the word it has to predict.
    pub bidirectional: bool,
    /// Dropout between stacked layers (ignored by libtorch when `num_layers == 1`).
    pub dropout: f64,
}

impl Default for RnnConfig {
    fn default() -> Self {
        Self {
            input_size: 400,
            hidden_size: 500,
            num_layers: 1,
            batch_first: true,
            bidirectional: false,
            dropout: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lin1Config {
    pub input_size: i64,
    pub output_size: i64,
}

impl Default for Lin1Config {
    fn default() -> Self {
        Self {
            input_size: 500,
            output_size: 400,
        }
    }
}

/// The output layer always projects onto the embedding table rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lin2Config {
    pub input_size: i64,
}

impl Default for Lin2Config {
    fn default() -> Self {
        Self { input_size: 400 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub embed: EmbedConfig,
    /// Maximum number of tokens per sentence, boundary tokens included.
    pub max_len: usize,
    pub rnn: RnnConfig,
    pub lin1: Lin1Config,
    pub lin2: Lin2Config,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed: EmbedConfig::default(),
            max_len: 41,
            rnn: RnnConfig::default(),
            lin1: Lin1Config::default(),
            lin2: Lin2Config::default(),
        }
    }
}

impl ModelConfig {
    /// Default hyperparameters sized for a dictionary of `dict_len` tokens.
    pub fn for_dictionary(dict_len: usize) -> Self {
        let mut config = Self::default();
        config.set_dictionary_size(dict_len);
        config
    }

    /// Reserves one extra row for the padding index.
    pub fn set_dictionary_size(&mut self, dict_len: usize) {
        self.embed.num_embeddings = dict_len as i64 + 1;
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Width of the encoder output fed to `lin1`.
    pub fn encoder_output_size(&self) -> i64 {
        if self.rnn.bidirectional {
            2 * self.rnn.hidden_size
        } else {
            self.rnn.hidden_size
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(NwpError::InvalidConfig(msg));

        if self.rnn.bidirectional {
            return invalid("the recurrent encoder must be unidirectional for next word prediction".into());
        }
        if !self.rnn.batch_first {
            return invalid("the encoder expects batch-first input".into());
        }
        if self.embed.num_embeddings < 2 {
            return invalid(format!(
                "embed.num_embeddings is {}, need at least one token besides padding",
                self.embed.num_embeddings
            ));
        }
        if self.embed.padding_idx < 0 || self.embed.padding_idx >= self.embed.num_embeddings {
            return invalid(format!("embed.padding_idx {} out of range", self.embed.padding_idx));
        }
        if self.rnn.num_layers < 1 {
            return invalid("rnn.num_layers must be at least 1".into());
        }
        if self.max_len < 2 {
            return invalid(format!("max_len is {}, need an input and a target token", self.max_len));
        }
        if self.embed.embedding_dim != self.rnn.input_size {
            return invalid(format!(
                "embed.embedding_dim ({}) != rnn.input_size ({})",
                self.embed.embedding_dim, self.rnn.input_size
            ));
        }
        if self.encoder_output_size() != self.lin1.input_size {
            return invalid(format!(
                "encoder output ({}) != lin1.input_size ({})",
                self.encoder_output_size(),
                self.lin1.input_size
            ));
        }
        if self.lin1.output_size != self.lin2.input_size {
            return invalid(format!(
                "lin1.output_size ({}) != lin2.input_size ({})",
                self.lin1.output_size, self.lin2.input_size
            ));
        }
        Ok(())
    }
}
