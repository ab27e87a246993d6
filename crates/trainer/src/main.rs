use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tch::Device;

use nwp_core::{Dictionary, ModelConfig};
use trainer::dataset::TRAIN_FILE;
use trainer::{Corpus, NwpTrainer, SchedulerKind, TrainerConfig, DEFAULT_SAVE_STATES};

/// Train a next word predictor with a unidirectional GRU encoder.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing train_nwp.txt
    #[arg(long = "data_loc", default_value = "data/")]
    data_loc: String,

    /// Directory where checkpoints and gradient norms are written
    #[arg(long = "results_loc", default_value = "gru_results/")]
    results_loc: String,

    /// Dictionary mapping words to embedding indices (.json appended if no extension)
    #[arg(long = "dict_loc", default_value = "data/nwp_indices")]
    dict_loc: String,

    #[arg(long = "batch_size", default_value_t = 100)]
    batch_size: usize,

    #[arg(long, default_value_t = 0.5)]
    lr: f64,

    #[arg(long = "n_epochs", default_value_t = 8)]
    n_epochs: usize,

    /// Use a CUDA device when one is available
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    cuda: bool,

    /// Sample counts within an epoch at which the model parameters are saved
    #[arg(long = "save_states", value_delimiter = ',', default_values_t = DEFAULT_SAVE_STATES)]
    save_states: Vec<usize>,

    #[arg(long = "gradient_clipping", default_value_t = true, action = ArgAction::Set)]
    gradient_clipping: bool,

    /// Max gradient norm when clipping is on
    #[arg(long = "clip_value", default_value_t = 0.25)]
    clip_value: f64,

    /// Seed pair: batch shuffling, then torch. Drawn at random and logged when absent.
    #[arg(long, num_args = 2, value_names = ["SHUFFLE", "TORCH"])]
    seed: Option<Vec<u64>>,

    /// YAML model config; embed.num_embeddings always follows the dictionary
    #[arg(long)]
    config: Option<String>,

    /// Only train on the first N corpus lines
    #[arg(long = "max_lines")]
    max_lines: Option<usize>,

    #[arg(long, value_enum, default_value_t = SchedulerKind::Step)]
    scheduler: SchedulerKind,
}

impl From<Cli> for TrainerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            data_loc: cli.data_loc,
            results_loc: cli.results_loc,
            dict_loc: cli.dict_loc,
            batch_size: cli.batch_size,
            learning_rate: cli.lr,
            n_epochs: cli.n_epochs,
            cuda: cli.cuda,
            save_states: cli.save_states,
            gradient_clipping: cli.gradient_clipping,
            clip_value: cli.clip_value,
            scheduler: cli.scheduler,
            max_lines: cli.max_lines,
            ..Default::default()
        }
    }
}

fn select_device(cuda: bool) -> Device {
    if cuda && tch::Cuda::is_available() {
        log::info!("using gpu");
        tch::Cuda::cudnn_set_benchmark(false);
        Device::Cuda(0)
    } else {
        if cuda {
            log::warn!("CUDA requested but not available");
        }
        log::info!("using cpu");
        Device::Cpu
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let (shuffle_seed, torch_seed) = match cli.seed.as_deref() {
        Some(&[shuffle, torch]) => (shuffle, torch),
        _ => {
            let seeds: (u32, u32) = rand::random();
            log::info!("random seeds (shuffle, torch): {} {}", seeds.0, seeds.1);
            (seeds.0 as u64, seeds.1 as u64)
        }
    };
    tch::manual_seed(torch_seed as i64);

    let model_config_path = cli.config.clone();
    let trainer_config = TrainerConfig::from(cli);
    let device = select_device(trainer_config.cuda);

    let dictionary = Dictionary::load(&trainer_config.dict_loc)
        .with_context(|| format!("Failed to load dictionary {}", trainer_config.dict_loc))?;

    let mut model_config = match model_config_path {
        Some(path) => ModelConfig::from_yaml_file(&path)
            .with_context(|| format!("Failed to load model config {}", path))?,
        None => ModelConfig::default(),
    };
    model_config.set_dictionary_size(dictionary.len());

    let mut corpus = Corpus::load(&trainer_config.data_loc, TRAIN_FILE)?;
    log::info!("#training samples: {}", corpus.len());
    if let Some(max_lines) = trainer_config.max_lines {
        corpus.truncate(max_lines);
        log::info!("using the first {} samples", corpus.len());
    }

    let n_epochs = trainer_config.n_epochs;
    let mut trainer = NwpTrainer::new(
        model_config,
        dictionary,
        trainer_config,
        corpus.len(),
        shuffle_seed,
        device,
    )?;
    log::info!("#model parameters: {}", trainer.parameter_count());

    trainer.run(&corpus, n_epochs)?;

    log::info!("Training complete!");
    Ok(())
}
