use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tch::{nn, nn::OptimizerConfig, Device, Kind, Reduction, Tensor};

use nwp_core::dictionary::PAD_INDEX;
use nwp_core::{init, safetensors_util, Dictionary, ModelConfig, NwpRnnEncoder, TokenBatcher};

use crate::dataset::Corpus;
use crate::scheduler::LrScheduler;
use crate::TrainerConfig;

pub const GRADIENTS_FILE: &str = "gradients.json";

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub batches: usize,
    pub samples: usize,
    pub mean_loss: f64,
    /// Checkpoint files written during the epoch.
    pub checkpoints: Vec<PathBuf>,
}

#[derive(Serialize)]
struct GradientRecord<'a> {
    clip_value: Option<f64>,
    epochs: &'a [Vec<f64>],
}

pub struct NwpTrainer {
    /// Starts at 1 and is bumped once per completed epoch.
    pub epoch: usize,
    config: TrainerConfig,
    model: NwpRnnEncoder,
    dictionary: Dictionary,
    optimizer: nn::Optimizer,
    scheduler: Box<dyn LrScheduler>,
    clip: Option<f64>,
    /// Gradient norms per closed epoch.
    grad_history: Vec<Vec<f64>>,
    grad_norms: Vec<f64>,
    train_lines: usize,
    rng: StdRng,
    device: Device,
    vs: nn::VarStore,
}

impl NwpTrainer {
    /// `train_lines` sizes the learning-rate schedule; `shuffle_seed` drives batch order.
    pub fn new(
        model_config: ModelConfig,
        dictionary: Dictionary,
        trainer_config: TrainerConfig,
        train_lines: usize,
        shuffle_seed: u64,
        device: Device,
    ) -> Result<Self> {
        let vs = nn::VarStore::new(device);
        let model = NwpRnnEncoder::new(&vs.root(), &model_config)?;
        init::reset_parameters(&vs);

        let optimizer = Self::build_optimizer(&vs, &trainer_config)?;
        let scheduler = trainer_config.scheduler.build(
            trainer_config.learning_rate,
            train_lines,
            trainer_config.batch_size,
        );
        let clip = trainer_config
            .gradient_clipping
            .then_some(trainer_config.clip_value);

        Ok(Self {
            epoch: 1,
            config: trainer_config,
            model,
            dictionary,
            optimizer,
            scheduler,
            clip,
            grad_history: Vec::new(),
            grad_norms: Vec::new(),
            train_lines,
            rng: StdRng::seed_from_u64(shuffle_seed),
            device,
            vs,
        })
    }

    fn build_optimizer(vs: &nn::VarStore, config: &TrainerConfig) -> Result<nn::Optimizer> {
        let sgd = nn::Sgd {
            momentum: config.momentum,
            ..Default::default()
        };
        Ok(sgd.build(vs, config.learning_rate)?)
    }

    pub fn model(&self) -> &NwpRnnEncoder {
        &self.model
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn parameter_count(&self) -> i64 {
        init::parameter_count(&self.vs)
    }

    pub fn learning_rate(&self) -> f64 {
        self.scheduler.lr()
    }

    pub fn clip_value(&self) -> Option<f64> {
        self.clip
    }

    pub fn set_gradient_clipping(&mut self, clip: Option<f64>) {
        self.clip = clip;
    }

    /// Gradient norms of every closed epoch.
    pub fn gradient_history(&self) -> &[Vec<f64>] {
        &self.grad_history
    }

    fn loss(&self, input: &Tensor, target: &Tensor) -> Tensor {
        let logits = self.model.forward(input);
        let vocab = logits.size()[2];
        logits.reshape([-1, vocab]).cross_entropy_loss::<Tensor>(
            &target.reshape([-1]),
            None,
            Reduction::Mean,
            PAD_INDEX,
            0.0,
        )
    }

    fn has_targets(target: &Tensor) -> bool {
        target.ne(PAD_INDEX).any().int64_value(&[]) != 0
    }

    /// L2 norm over the gradients of all trainable variables.
    fn grad_norm(&self) -> f64 {
        let sum: f64 = self
            .vs
            .trainable_variables()
            .iter()
            .map(|v| v.grad())
            .filter(|g| g.defined())
            .map(|g| g.pow_tensor_scalar(2.0).sum(Kind::Float).double_value(&[]))
            .sum();
        sum.sqrt()
    }

    pub fn train_epoch(&mut self, corpus: &Corpus) -> Result<EpochSummary> {
        let batch_size = self.config.batch_size;
        let batches = corpus.shuffled_batches(batch_size, &mut self.rng);
        let num_batches = batches.len();

        log::info!(
            "Epoch {} | {} samples in {} batches | lr {:.6}",
            self.epoch,
            corpus.len(),
            num_batches,
            self.scheduler.lr()
        );

        let mut epoch_loss = 0.0;
        let mut trained = 0;
        let mut samples = 0;
        let mut checkpoints = Vec::new();

        for (batch_idx, lines) in batches.iter().enumerate() {
            let (input, target) = {
                let batcher = TokenBatcher::new(&self.dictionary, self.model.config.max_len);
                batcher.batch(lines, self.device)
            };

            if Self::has_targets(&target) {
                let loss = self.loss(&input, &target);

                self.optimizer.zero_grad();
                loss.backward();
                if let Some(clip) = self.clip {
                    let norm = self.grad_norm();
                    self.grad_norms.push(norm);
                    self.optimizer.clip_grad_norm(clip);
                }
                self.optimizer.step();

                let lr = self.scheduler.step();
                self.optimizer.set_lr(lr);

                let loss_val = loss.double_value(&[]);
                epoch_loss += loss_val;
                trained += 1;

                if batch_idx % self.config.log_every.max(1) == 0 {
                    log::info!(
                        "Epoch {} | Batch {}/{} | Loss: {:.4}",
                        self.epoch,
                        batch_idx,
                        num_batches,
                        loss_val
                    );
                }
                log::debug!("lr after batch {}: {:.6}", batch_idx, lr);
            } else {
                log::warn!("Batch {} has no prediction targets, skipped", batch_idx);
            }

            let previous = samples;
            samples += lines.len();
            for state in self.save_states_between(previous, samples) {
                checkpoints.push(self.save_checkpoint(state)?);
            }
        }

        let mean_loss = if trained > 0 {
            epoch_loss / trained as f64
        } else {
            f64::NAN
        };
        log::info!("Epoch {} Average Loss: {:.4}", self.epoch, mean_loss);

        Ok(EpochSummary {
            epoch: self.epoch,
            batches: trained,
            samples,
            mean_loss,
            checkpoints,
        })
    }

    /// Save states reached when the sample count moves from `previous` to `current`.
    fn save_states_between(&self, previous: usize, current: usize) -> Vec<usize> {
        let mut states: Vec<usize> = self
            .config
            .save_states
            .iter()
            .copied()
            .filter(|&s| previous < s && s <= current)
            .collect();
        states.sort_unstable();
        states.dedup();
        states
    }

    /// Mean per-batch loss over `lines` without updating the model.
    pub fn test_epoch<S: AsRef<str>>(&self, lines: &[S]) -> Result<f64> {
        let batcher = TokenBatcher::new(&self.dictionary, self.model.config.max_len);
        let mut total = 0.0;
        let mut batches = 0;

        tch::no_grad(|| {
            for chunk in lines.chunks(self.config.batch_size.max(1)) {
                let (input, target) = batcher.batch(chunk, self.device);
                if Self::has_targets(&target) {
                    total += self.loss(&input, &target).double_value(&[]);
                    batches += 1;
                }
            }
        });

        if batches == 0 {
            anyhow::bail!("No evaluable sentences in {} lines", lines.len());
        }
        Ok(total / batches as f64)
    }

    pub fn checkpoint_path(&self, samples: usize) -> PathBuf {
        Path::new(&self.config.results_loc)
            .join(format!("nwp_model.{}.{}.safetensors", self.epoch, samples))
    }

    fn save_checkpoint(&self, samples: usize) -> Result<PathBuf> {
        let dir = PathBuf::from(&self.config.results_loc);
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create results dir {:?}", dir))?;
        }

        let path = self.checkpoint_path(samples);
        let metadata = HashMap::from([
            ("epoch".to_string(), self.epoch.to_string()),
            ("samples".to_string(), samples.to_string()),
        ]);
        safetensors_util::save_safetensors(&self.vs, &path, Some(metadata))?;
        self.model.config.save_json(dir.join("config.json"))?;

        log::info!("Saved checkpoint {:?}", path);
        Ok(path)
    }

    pub fn load_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let loaded = safetensors_util::load_safetensors(&mut self.vs, path)
            .with_context(|| format!("Failed to load checkpoint {:?}", path))?;
        log::info!("Loaded {} tensors from {:?}", loaded.len(), path);
        Ok(())
    }

    /// Closes the current epoch's gradient-norm record.
    pub fn reset_grads(&mut self) {
        self.grad_history.push(std::mem::take(&mut self.grad_norms));
    }

    /// Sets the clip value to the mean gradient norm of the last closed epoch.
    pub fn update_clip(&mut self) {
        if let Some(last) = self.grad_history.last().filter(|n| !n.is_empty()) {
            let mean = last.iter().sum::<f64>() / last.len() as f64;
            log::info!("Clip value updated to {:.4}", mean);
            self.clip = Some(mean);
        }
    }

    pub fn save_gradients<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(GRADIENTS_FILE);
        let record = GradientRecord {
            clip_value: self.clip,
            epochs: &self.grad_history,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)
            .with_context(|| format!("Failed to write {:?}", path))?;
        Ok(path)
    }

    pub fn update_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Re-draws all weights and starts a fresh optimizer and schedule.
    pub fn reset_model(&mut self) -> Result<()> {
        init::reset_parameters(&self.vs);
        self.optimizer = Self::build_optimizer(&self.vs, &self.config)?;
        self.scheduler = self.config.scheduler.build(
            self.config.learning_rate,
            self.train_lines,
            self.config.batch_size,
        );
        Ok(())
    }

    /// Trains epochs `self.epoch..=n_epochs`, each from freshly initialised weights.
    pub fn run(&mut self, corpus: &Corpus, n_epochs: usize) -> Result<Vec<EpochSummary>> {
        let mut summaries = Vec::new();
        while self.epoch <= n_epochs {
            summaries.push(self.train_epoch(corpus)?);

            if self.clip.is_some() {
                self.reset_grads();
            }
            self.update_epoch();
            self.reset_model()?;
        }

        if self.clip.is_some() {
            let path = self.save_gradients(&self.config.results_loc)?;
            log::info!("Saved gradient norms to {:?}", path);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> Dictionary {
        Dictionary::from_ordered(["<s>", "</s>", "<oov>", "the", "cat", "dog", "sat", "ran"]).unwrap()
    }

    fn model_config(dict: &Dictionary) -> ModelConfig {
        let mut config = ModelConfig::for_dictionary(dict.len());
        config.embed.embedding_dim = 8;
        config.rnn.input_size = 8;
        config.rnn.hidden_size = 16;
        config.lin1.input_size = 16;
        config.lin1.output_size = 8;
        config.lin2.input_size = 8;
        config
    }

    fn corpus() -> Corpus {
        Corpus::from_lines(["the cat sat", "the dog ran", "the cat ran", "the dog sat", "cat sat"])
    }

    fn trainer(results: &Path, save_states: Vec<usize>, clipping: bool) -> NwpTrainer {
        let dict = dictionary();
        let config = TrainerConfig {
            results_loc: results.to_string_lossy().into_owned(),
            batch_size: 2,
            learning_rate: 0.1,
            save_states,
            gradient_clipping: clipping,
            ..Default::default()
        };
        NwpTrainer::new(model_config(&dict), dict, config, 5, 7, Device::Cpu).unwrap()
    }

    /// Trains a single two-sentence batch with plain SGD and returns the L2
    /// norm of the parameter update.
    fn single_step_update(clip: Option<f64>) -> f64 {
        let dir = tempfile::tempdir().unwrap();
        let dict = dictionary();
        let config = TrainerConfig {
            results_loc: dir.path().to_string_lossy().into_owned(),
            batch_size: 2,
            learning_rate: 0.1,
            momentum: 0.0,
            save_states: vec![],
            gradient_clipping: clip.is_some(),
            clip_value: clip.unwrap_or_default(),
            ..Default::default()
        };
        let mut t = NwpTrainer::new(model_config(&dict), dict, config, 2, 7, Device::Cpu).unwrap();
        let before: Vec<Tensor> = t.var_store().trainable_variables().iter().map(Tensor::copy).collect();

        let summary = t.train_epoch(&Corpus::from_lines(["the cat sat", "the dog ran"])).unwrap();
        assert_eq!(summary.batches, 1);

        let after = t.var_store().trainable_variables();
        before
            .iter()
            .zip(after.iter())
            .map(|(b, a)| (a - b).pow_tensor_scalar(2.0).sum(Kind::Float).double_value(&[]))
            .sum::<f64>()
            .sqrt()
    }

    #[test]
    fn clipping_bounds_the_update() {
        let lr = 0.1;
        let clip = 1e-3;

        let clipped = single_step_update(Some(clip));
        assert!(clipped > 0.0);
        assert!(clipped <= lr * clip * 1.01, "update {clipped} exceeds lr * clip");

        let unclipped = single_step_update(None);
        assert!(unclipped > 10.0 * lr * clip, "unclipped update {unclipped} too small");
    }

    #[test]
    fn gradient_norms_recorded_only_when_clipping() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path(), vec![], false);
        t.train_epoch(&corpus()).unwrap();
        t.reset_grads();
        assert!(t.gradient_history()[0].is_empty());

        t.set_gradient_clipping(Some(0.25));
        t.train_epoch(&corpus()).unwrap();
        t.reset_grads();
        assert_eq!(t.gradient_history()[1].len(), 3);
    }

    #[test]
    fn checkpoints_are_written_at_save_states() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path(), vec![2, 4, 100], false);

        let summary = t.train_epoch(&corpus()).unwrap();
        assert_eq!(summary.samples, 5);
        assert_eq!(summary.batches, 3);
        assert!(summary.mean_loss.is_finite());
        assert_eq!(
            summary.checkpoints,
            vec![
                dir.path().join("nwp_model.1.2.safetensors"),
                dir.path().join("nwp_model.1.4.safetensors"),
            ]
        );
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn epoch_counter_moves_once_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path(), vec![], true);

        let summaries = t.run(&corpus(), 3).unwrap();
        assert_eq!(summaries.iter().map(|s| s.epoch).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(t.epoch, 4);
        assert_eq!(t.gradient_history().len(), 3);
        assert!(t.gradient_history().iter().all(|e| e.len() == 3));
        assert!(dir.path().join(GRADIENTS_FILE).exists());
    }

    #[test]
    fn reset_model_restarts_weights_and_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path(), vec![], false);
        t.train_epoch(&corpus()).unwrap();

        let before = t.var_store().variables()["lin1.weight"].copy();
        t.reset_model().unwrap();
        let vars = t.var_store().variables();
        assert!(!before.allclose(&vars["lin1.weight"], 1e-8, 1e-8, false));
        assert!((t.learning_rate() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn no_gradient_file_without_clipping() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path(), vec![], false);
        t.run(&corpus(), 1).unwrap();
        assert!(!dir.path().join(GRADIENTS_FILE).exists());
        assert!(t.gradient_history().is_empty());
    }

    #[test]
    fn update_clip_uses_mean_norm() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path(), vec![], true);
        t.train_epoch(&corpus()).unwrap();
        t.reset_grads();
        t.update_clip();

        let norms = &t.gradient_history()[0];
        let mean = norms.iter().sum::<f64>() / norms.len() as f64;
        assert_eq!(t.clip_value(), Some(mean));
    }

    #[test]
    fn test_epoch_leaves_weights_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let t = trainer(dir.path(), vec![], false);
        let before = t.var_store().variables()["embed.weight"].copy();

        let loss = t.test_epoch(&["the cat sat", "the dog"]).unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        assert!(before.equal(&t.var_store().variables()["embed.weight"]));
    }

    #[test]
    fn checkpoint_restores_saved_weights() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path(), vec![5], false);
        let summary = t.train_epoch(&corpus()).unwrap();
        let saved = t.var_store().variables()["lin2.weight"].copy();

        t.reset_model().unwrap();
        t.load_checkpoint(&summary.checkpoints[0]).unwrap();
        assert!(saved.allclose(&t.var_store().variables()["lin2.weight"], 1e-6, 1e-6, false));
    }

    #[test]
    fn embedding_has_padding_row() {
        let dir = tempfile::tempdir().unwrap();
        let t = trainer(dir.path(), vec![], false);
        assert_eq!(t.model().config.embed.num_embeddings, dictionary().len() as i64 + 1);
        assert!(t.parameter_count() > 0);
    }
}
