use tch::{Device, Tensor};

use crate::dictionary::{Dictionary, END_TOKEN, OOV_TOKEN, PAD_INDEX, START_TOKEN};

/// Turns raw sentences into padded index tensors for next word prediction.
pub struct TokenBatcher<'a> {
    dictionary: &'a Dictionary,
    max_len: usize,
    start: Option<i64>,
    end: Option<i64>,
    oov: Option<i64>,
}

impl<'a> TokenBatcher<'a> {
    pub fn new(dictionary: &'a Dictionary, max_len: usize) -> Self {
        Self {
            dictionary,
            max_len,
            start: dictionary.get_id(START_TOKEN),
            end: dictionary.get_id(END_TOKEN),
            oov: dictionary.get_id(OOV_TOKEN),
        }
    }

    /// Index sequence for one sentence, boundary tokens included and cut to `max_len`.
    /// Unknown words map to `<oov>` if the dictionary has it and are dropped otherwise.
    pub fn encode_line(&self, line: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = self.start.into_iter().collect();
        ids.extend(
            line.split_whitespace()
                .filter_map(|word| self.dictionary.get_id(word).or(self.oov)),
        );
        ids.extend(self.end);
        ids.truncate(self.max_len);
        ids
    }

    /// Right-padded `[batch, width]` rows. Width is the longest sentence in the batch.
    pub fn pad_batch<S: AsRef<str>>(&self, lines: &[S]) -> (Vec<i64>, i64) {
        let encoded: Vec<Vec<i64>> = lines.iter().map(|l| self.encode_line(l.as_ref())).collect();
        let width = encoded.iter().map(Vec::len).max().unwrap_or(0).max(2);

        let mut flat = Vec::with_capacity(encoded.len() * width);
        for ids in &encoded {
            flat.extend_from_slice(ids);
            flat.extend(std::iter::repeat(PAD_INDEX).take(width - ids.len()));
        }
        (flat, width as i64)
    }

    /// Returns (input, target) where:
    /// input: [batch, width - 1]
    /// target: [batch, width - 1] (shifted by 1)
    pub fn batch<S: AsRef<str>>(&self, lines: &[S], device: Device) -> (Tensor, Tensor) {
        let (flat, width) = self.pad_batch(lines);
        let rows = lines.len() as i64;
        let padded = Tensor::from_slice(&flat).view([rows, width]).to(device);

        let input = padded.narrow(1, 0, width - 1);
        let target = padded.narrow(1, 1, width - 1);
        (input, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> Dictionary {
        Dictionary::from_ordered(["<s>", "</s>", "<oov>", "the", "cat", "sat"]).unwrap()
    }

    #[test]
    fn sentence_is_wrapped_in_boundary_tokens() {
        let dict = dictionary();
        let batcher = TokenBatcher::new(&dict, 41);
        assert_eq!(batcher.encode_line("the cat sat\n"), vec![1, 4, 5, 6, 2]);
    }

    #[test]
    fn unknown_words_become_oov() {
        let dict = dictionary();
        let batcher = TokenBatcher::new(&dict, 41);
        assert_eq!(batcher.encode_line("the dog"), vec![1, 4, 3, 2]);
    }

    #[test]
    fn unknown_words_are_dropped_without_oov_entry() {
        let dict = Dictionary::from_ordered(["the", "cat"]).unwrap();
        let batcher = TokenBatcher::new(&dict, 41);
        assert_eq!(batcher.encode_line("the dog cat"), vec![1, 2]);
    }

    #[test]
    fn long_sentences_are_truncated() {
        let dict = dictionary();
        let batcher = TokenBatcher::new(&dict, 3);
        assert_eq!(batcher.encode_line("the cat sat the cat"), vec![1, 4, 5]);
    }

    #[test]
    fn batch_is_padded_and_shifted() {
        let dict = dictionary();
        let batcher = TokenBatcher::new(&dict, 41);
        let (input, target) = batcher.batch(&["the cat sat", "cat"], Device::Cpu);

        assert_eq!(input.size(), vec![2, 4]);
        assert_eq!(target.size(), vec![2, 4]);

        let input: Vec<i64> = Vec::try_from(input.flatten(0, -1)).unwrap();
        let target: Vec<i64> = Vec::try_from(target.flatten(0, -1)).unwrap();
        assert_eq!(input, vec![1, 4, 5, 6, 1, 5, 2, 0]);
        assert_eq!(target, vec![4, 5, 6, 2, 5, 2, 0, 0]);
    }
}
