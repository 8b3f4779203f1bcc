use crate::persist::{load_json, save_json, IndexPaths};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lexicon,
    Forward,
    Inverted,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Lexicon => "lexicon",
            Stage::Forward => "forward",
            Stage::Inverted => "inverted",
        }
    }

    /// The stage a document must have passed before this one may process it.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Lexicon => None,
            Stage::Forward => Some(Stage::Lexicon),
            Stage::Inverted => Some(Stage::Forward),
        }
    }
}

/// Set of document ids a stage has finished. Persisted as a JSON array.
#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
    done: BTreeSet<String>,
}

impl ProgressLog {
    pub fn open(paths: &IndexPaths, stage: Stage) -> Result<Self> {
        let path = paths.logs_dir().join(format!("{}_log.json", stage.name()));
        let done = if path.exists() { load_json(&path)? } else { BTreeSet::new() };
        Ok(Self { path, done })
    }

    /// Opens the log of the stage `stage` depends on. A document missing
    /// from it must not be processed by `stage` yet.
    pub fn open_prerequisite(paths: &IndexPaths, stage: Stage) -> Result<Self> {
        let previous = stage.previous().with_context(|| format!("{} stage has no prerequisite", stage.name()))?;
        Self::open(paths, previous)
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.done.contains(doc_id)
    }

    /// Returns false when the id was already recorded.
    pub fn insert(&mut self, doc_id: &str) -> bool {
        self.done.insert(doc_id.to_string())
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.done.extend(ids);
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        save_json(&self.path, &self.done)
    }
}
