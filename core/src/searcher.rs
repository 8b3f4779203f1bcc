//! Read-only query snapshot: finalized lexicon, closed barrels and trie.
//! Safe to share across threads; nothing here mutates after `open`.

use crate::barrel::BarrelReader;
use crate::error::RankError;
use crate::lexicon::Lexicon;
use crate::persist::IndexPaths;
use crate::ranker::{hybrid_rank, lexical_scores, ScoreMap};
use crate::trie::Trie;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
}

pub struct Searcher {
    lexicon: Lexicon,
    barrels: BarrelReader,
    trie: Trie,
}

impl Searcher {
    pub fn open(paths: &IndexPaths) -> Result<Self> {
        let lexicon = Lexicon::open_required(paths)?;
        let trie = if paths.trie().exists() {
            Trie::load(paths)?
        } else {
            tracing::warn!("no trie snapshot; building one in memory");
            Trie::from_lexicon(&lexicon)
        };
        tracing::info!(terms = lexicon.len(), completions = trie.len(), "opened index snapshot");
        Ok(Self::from_parts(lexicon, BarrelReader::new(paths.barrels_dir()), trie))
    }

    pub fn from_parts(lexicon: Lexicon, barrels: BarrelReader, trie: Trie) -> Self {
        Self { lexicon, barrels, trie }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn lexical_scores(&self, tokens: &[String]) -> ScoreMap {
        lexical_scores(&self.lexicon, &self.barrels, tokens)
    }

    /// Hybrid search over already-normalized tokens. `semantic` holds raw
    /// similarity scores from the vector side and may be empty.
    pub fn search(&self, tokens: &[String], alpha: f32, semantic: ScoreMap) -> Result<Vec<SearchHit>, RankError> {
        let ranked = hybrid_rank(self.lexical_scores(tokens), semantic, alpha)?;
        Ok(ranked.into_iter().map(|(doc_id, score)| SearchHit { doc_id, score }).collect())
    }

    pub fn autocomplete(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.trie.autocomplete(prefix, limit)
    }
}
