//! Parallel-text corpus
//!
//! Two aligned token streams per sequence id ("source" and "target"),
//! read from line-aligned text files through JSON vocabularies. Line i
//! of both files forms sequence i; lengths are precomputed from
//! whitespace token counts so the bucketer never materializes arrays.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sequence::{ArraySpec, DType, NdArray, Sequence};
use super::SequenceCorpus;
use crate::error::{FeedError, Result};

/// Configuration for a parallel-text corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelTextSpec {
    /// Source-side text file, one sequence per line
    pub source_file: PathBuf,
    /// Target-side text file, line-aligned with the source file
    pub target_file: PathBuf,
    /// JSON vocabulary for the source side (token -> id)
    pub source_vocab: PathBuf,
    /// JSON vocabulary for the target side (token -> id)
    pub target_vocab: PathBuf,
}

impl ParallelTextSpec {
    /// Shallow validation of the locator.
    pub fn validate(&self) -> Result<()> {
        for path in [
            &self.source_file,
            &self.target_file,
            &self.source_vocab,
            &self.target_vocab,
        ] {
            if path.as_os_str().is_empty() {
                return Err(FeedError::Config {
                    message: "parallel text paths must not be empty".into(),
                });
            }
        }
        Ok(())
    }
}

struct Side {
    name: &'static str,
    lines: Vec<String>,
    lengths: Vec<usize>,
    vocab: HashMap<String, i32>,
}

impl Side {
    fn load(name: &'static str, text_path: &PathBuf, vocab_path: &PathBuf) -> Result<Self> {
        let text = fs::read_to_string(text_path).map_err(|e| FeedError::Config {
            message: format!("cannot read {} file {}: {}", name, text_path.display(), e),
        })?;
        let vocab_json = fs::read_to_string(vocab_path).map_err(|e| FeedError::Config {
            message: format!("cannot read {} vocab {}: {}", name, vocab_path.display(), e),
        })?;
        let vocab: HashMap<String, i32> =
            serde_json::from_str(&vocab_json).map_err(|e| FeedError::Config {
                message: format!("{} vocab {} is not a JSON map: {}", name, vocab_path.display(), e),
            })?;

        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let lengths = lines
            .iter()
            .map(|l| l.split_whitespace().count())
            .collect();
        Ok(Self {
            name,
            lines,
            lengths,
            vocab,
        })
    }

    fn tokenize(&self, id: u64) -> Result<Vec<i32>> {
        let line = &self.lines[id as usize];
        line.split_whitespace()
            .map(|tok| {
                self.vocab
                    .get(tok)
                    .copied()
                    .ok_or_else(|| FeedError::DataUnavailable {
                        seq_id: id,
                        reason: format!("token '{}' not in {} vocabulary", tok, self.name),
                    })
            })
            .collect()
    }
}

/// Translation corpus exposing two aligned streams per id
pub struct ParallelTextCorpus {
    source: Side,
    target: Side,
    array_specs: Vec<ArraySpec>,
}

impl ParallelTextCorpus {
    /// Open and align both sides.
    pub fn open(spec: ParallelTextSpec) -> Result<Self> {
        spec.validate()?;
        let source = Side::load("source", &spec.source_file, &spec.source_vocab)?;
        let target = Side::load("target", &spec.target_file, &spec.target_vocab)?;

        if source.lines.len() != target.lines.len() {
            return Err(FeedError::Config {
                message: format!(
                    "source has {} lines, target has {}",
                    source.lines.len(),
                    target.lines.len()
                ),
            });
        }

        debug!("Parallel corpus opened: {} aligned pairs", source.lines.len());
        Ok(Self {
            source,
            target,
            array_specs: vec![
                ArraySpec::new("source", DType::I32, vec![]),
                ArraySpec::new("target", DType::I32, vec![]),
            ],
        })
    }

    fn check_id(&self, id: u64) -> Result<()> {
        if id as usize >= self.source.lines.len() {
            return Err(FeedError::DataUnavailable {
                seq_id: id,
                reason: format!("corpus has {} pairs", self.source.lines.len()),
            });
        }
        Ok(())
    }
}

impl SequenceCorpus for ParallelTextCorpus {
    fn array_specs(&self) -> &[ArraySpec] {
        &self.array_specs
    }

    fn init_epoch(&mut self, _epoch: u64, _shuffle_seed: u64) -> Result<()> {
        Ok(())
    }

    fn num_sequences(&self) -> Option<u64> {
        Some(self.source.lines.len() as u64)
    }

    fn sequence_length(&self, id: u64) -> Result<usize> {
        self.check_id(id)?;
        // The source side defines the bucketing length.
        Ok(self.source.lengths[id as usize])
    }

    fn load_sequence(&self, id: u64) -> Result<Sequence> {
        self.check_id(id)?;
        let src = self.source.tokenize(id)?;
        let tgt = self.target.tokenize(id)?;

        let mut arrays = HashMap::new();
        arrays.insert("source".to_string(), NdArray::from_i32(vec![src.len()], &src)?);
        arrays.insert("target".to_string(), NdArray::from_i32(vec![tgt.len()], &tgt)?);
        Ok(Sequence::new(id, Some(format!("line-{}", id)), arrays))
    }

    fn close(&mut self) -> Result<()> {
        self.source.lines.clear();
        self.target.lines.clear();
        Ok(())
    }
}
