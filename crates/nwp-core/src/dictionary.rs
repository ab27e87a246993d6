use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::{NwpError, Result};

pub const PAD_INDEX: i64 = 0;
pub const START_TOKEN: &str = "<s>";
pub const END_TOKEN: &str = "</s>";
pub const OOV_TOKEN: &str = "<oov>";

/// Mapping from words to embedding indices. Index 0 is never assigned to a
/// word, it is the padding row of the embedding table.
#[derive(Debug, Clone)]
pub struct Dictionary {
    token_to_id: HashMap<String, i64>,
}

impl Dictionary {
    pub fn new(token_to_id: HashMap<String, i64>) -> Result<Self> {
        if token_to_id.is_empty() {
            return Err(NwpError::EmptyDictionary);
        }
        let rows = token_to_id.len() as i64 + 1;
        for (token, &index) in &token_to_id {
            if index == PAD_INDEX {
                return Err(NwpError::ReservedIndex { token: token.clone() });
            }
            if index < 0 || index >= rows {
                return Err(NwpError::IndexOutOfRange {
                    token: token.clone(),
                    index,
                    rows,
                });
            }
        }
        Ok(Self { token_to_id })
    }

    /// Builds a dictionary from words in index order, starting at 1.
    pub fn from_ordered<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut token_to_id = HashMap::new();
        for word in words {
            let next = token_to_id.len() as i64 + 1;
            token_to_id.entry(word.into()).or_insert(next);
        }
        Self::new(token_to_id)
    }

    /// Paths without an extension get `.json` appended.
    pub fn resolve_path<P: AsRef<Path>>(path: P) -> PathBuf {
        let path = path.as_ref();
        if path.extension().is_some() {
            path.to_path_buf()
        } else {
            path.with_extension("json")
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(Self::resolve_path(path))?;
        let reader = BufReader::new(file);
        let token_to_id: HashMap<String, i64> = serde_json::from_reader(reader)?;
        Self::new(token_to_id)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(Self::resolve_path(path))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.token_to_id)?;
        Ok(())
    }

    pub fn get_id(&self, token: &str) -> Option<i64> {
        self.token_to_id.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// Rows needed in the embedding table, padding included.
    pub fn embedding_rows(&self) -> i64 {
        self.len() as i64 + 1
    }
}
