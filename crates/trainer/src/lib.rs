pub mod dataset;
pub mod scheduler;
pub mod train;

pub use dataset::Corpus;
pub use scheduler::{CyclicLr, LrScheduler, SchedulerKind, StepLr};
pub use train::{EpochSummary, NwpTrainer};

use serde::{Deserialize, Serialize};

/// Sample counts within an epoch at which the model parameters are saved.
pub const DEFAULT_SAVE_STATES: [usize; 9] = [
    1000, 3000, 10000, 30000, 100000, 300000, 1000000, 3000000, 6470000,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub data_loc: String,
    pub results_loc: String,
    pub dict_loc: String,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub n_epochs: usize,
    pub cuda: bool,
    pub save_states: Vec<usize>,
    pub gradient_clipping: bool,
    pub clip_value: f64,
    pub momentum: f64,
    pub scheduler: SchedulerKind,
    pub max_lines: Option<usize>,
    pub log_every: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            data_loc: "data/".to_string(),
            results_loc: "gru_results/".to_string(),
            dict_loc: "data/nwp_indices".to_string(),
            batch_size: 100,
            learning_rate: 0.5,
            n_epochs: 8,
            cuda: true,
            save_states: DEFAULT_SAVE_STATES.to_vec(),
            gradient_clipping: true,
            clip_value: 0.25,
            momentum: 0.9,
            scheduler: SchedulerKind::Step,
            max_lines: None,
            log_every: 10,
        }
    }
}
