use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::Path;

pub const TRAIN_FILE: &str = "train_nwp.txt";

/// One sentence per line, in file order.
pub struct Corpus {
    lines: Vec<String>,
}

impl Corpus {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines
            .into_iter()
            .map(Into::into)
            .filter(|l: &String| !l.trim().is_empty())
            .collect();
        Self { lines }
    }

    /// Reads `file_name` from `folder`. Blank lines carry no training signal and are skipped.
    pub fn load<P: AsRef<Path>>(folder: P, file_name: &str) -> Result<Self> {
        let path = folder.as_ref().join(file_name);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read corpus {:?}", path))?;

        let total = text.lines().count();
        let corpus = Self::from_lines(text.lines());
        if corpus.len() < total {
            log::warn!("Skipped {} blank lines in {:?}", total - corpus.len(), path);
        }
        Ok(corpus)
    }

    /// Keeps only the first `max_lines` sentences.
    pub fn truncate(&mut self, max_lines: usize) {
        self.lines.truncate(max_lines);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Shuffled mini-batches covering every line exactly once. The last batch may be short.
    pub fn shuffled_batches<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Vec<Vec<&str>> {
        let mut order: Vec<usize> = (0..self.lines.len()).collect();
        order.shuffle(rng);

        order
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.iter().map(|&i| self.lines[i].as_str()).collect())
            .collect()
    }
}
