use tch::nn::{self, RNN};
use tch::Tensor;

use crate::config::ModelConfig;
use crate::error::Result;

/// Embedding -> unidirectional GRU -> lin1 -> lin2.
/// Produces next-word logits for every position of the input.
#[derive(Debug)]
pub struct NwpRnnEncoder {
    embed: nn::Embedding,
    rnn: nn::GRU,
    lin1: nn::Linear,
    lin2: nn::Linear,
    pub config: ModelConfig,
}

impl NwpRnnEncoder {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Result<Self> {
        config.validate()?;

        let embed = nn::embedding(
            vs / "embed",
            config.embed.num_embeddings,
            config.embed.embedding_dim,
            nn::EmbeddingConfig {
                sparse: config.embed.sparse,
                padding_idx: config.embed.padding_idx,
                ..Default::default()
            },
        );
        let rnn = nn::gru(
            vs / "rnn",
            config.rnn.input_size,
            config.rnn.hidden_size,
            nn::RNNConfig {
                num_layers: config.rnn.num_layers,
                dropout: config.rnn.dropout,
                bidirectional: config.rnn.bidirectional,
                batch_first: config.rnn.batch_first,
                ..Default::default()
            },
        );
        let lin1 = nn::linear(
            vs / "lin1",
            config.lin1.input_size,
            config.lin1.output_size,
            Default::default(),
        );
        let lin2 = nn::linear(
            vs / "lin2",
            config.lin2.input_size,
            config.embed.num_embeddings,
            Default::default(),
        );

        Ok(Self {
            embed,
            rnn,
            lin1,
            lin2,
            config: config.clone(),
        })
    }

    /// idx: [batch, seq_len] token indices
    /// Returns: logits [batch, seq_len, num_embeddings]
    pub fn forward(&self, idx: &Tensor) -> Tensor {
        let x = idx.apply(&self.embed);
        let (x, _) = self.rnn.seq(&x);
        x.apply(&self.lin1).apply(&self.lin2)
    }
}
