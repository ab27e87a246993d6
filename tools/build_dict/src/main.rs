use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;

use nwp_core::dictionary::{END_TOKEN, OOV_TOKEN, START_TOKEN};
use nwp_core::Dictionary;

/// Build the word -> embedding index dictionary for the next word predictor.
#[derive(Parser)]
struct Cli {
    /// Corpus with one sentence per line
    #[arg(short, long)]
    input: PathBuf,
    /// Output dictionary path (.json appended if no extension)
    #[arg(short, long, default_value = "data/nwp_indices")]
    output: PathBuf,
    /// Words seen fewer times than this map to <oov>
    #[arg(short, long, default_value_t = 1)]
    min_count: usize,
}

fn count_words(lines: &[&str]) -> HashMap<String, usize> {
    lines
        .par_iter()
        .fold(HashMap::new, |mut counts, line| {
            for word in line.split_whitespace() {
                *counts.entry(word.to_string()).or_insert(0) += 1;
            }
            counts
        })
        .reduce(HashMap::new, |mut a, b| {
            for (word, n) in b {
                *a.entry(word).or_insert(0) += n;
            }
            a
        })
}

/// Boundary and oov tokens first, then words by descending count, ties alphabetical.
fn ordered_vocabulary(counts: HashMap<String, usize>, min_count: usize) -> Vec<String> {
    let mut words: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(w, n)| *n >= min_count && ![START_TOKEN, END_TOKEN, OOV_TOKEN].contains(&w.as_str()))
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    [START_TOKEN, END_TOKEN, OOV_TOKEN]
        .iter()
        .map(|t| t.to_string())
        .chain(words.into_iter().map(|(w, _)| w))
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read corpus {:?}", cli.input))?;
    let lines: Vec<&str> = text.lines().collect();

    let counts = count_words(&lines);
    log::info!("{} distinct words in {} lines", counts.len(), lines.len());

    let dictionary = Dictionary::from_ordered(ordered_vocabulary(counts, cli.min_count))?;
    if let Some(parent) = cli.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    dictionary.save(&cli.output).context("Failed to save dictionary")?;

    println!(
        "Saved {} entries to {:?}",
        dictionary.len(),
        Dictionary::resolve_path(&cli.output)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequent_words_get_low_indices() {
        let counts = count_words(&["the cat sat", "the dog", "a cat the"]);
        let vocab = ordered_vocabulary(counts, 1);
        assert_eq!(vocab[..3], ["<s>", "</s>", "<oov>"]);
        assert_eq!(vocab[3..], ["the", "cat", "a", "dog", "sat"]);
    }

    #[test]
    fn rare_words_are_left_out() {
        let counts = count_words(&["x y y", "y z z"]);
        let vocab = ordered_vocabulary(counts, 2);
        assert_eq!(vocab[3..], ["y", "z"]);

        let dict = Dictionary::from_ordered(vocab).unwrap();
        assert_eq!(dict.get_id("y"), Some(4));
        assert_eq!(dict.get_id("x"), None);
    }
}
