//! Query-time scoring: exact-match scores from barrels, similarity scores from
//! an external vector index, and their weighted combination.

use crate::barrel::BarrelReader;
use crate::error::RankError;
use crate::lexicon::Lexicon;
use crate::TierWeights;
use std::collections::{BTreeSet, HashMap};

pub type ScoreMap = HashMap<String, f32>;

/// Upper bound on neighbours asked of the vector index per query.
pub const MAX_SEMANTIC_K: usize = 100;

/// Neighbours to fetch for a page of `limit` results: three per result, capped.
pub fn semantic_k(limit: usize) -> usize {
    limit.saturating_mul(3).min(MAX_SEMANTIC_K)
}

/// Nearest-neighbour search over document vectors.
pub trait VectorIndex: Send + Sync {
    /// Up to `k` `(document_id, distance)` pairs; distances are non-negative.
    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)>;
}

/// Maps query tokens to a query vector, e.g. by averaging word embeddings.
pub trait QueryEncoder: Send + Sync {
    /// `None` when no token has a vector.
    fn encode(&self, tokens: &[String]) -> Option<Vec<f32>>;
}

/// Sum over tiers of tier x frequency.
pub fn weighted_term_frequency(tiers: &TierWeights) -> f32 {
    tiers.iter().map(|(tier, freq)| *tier as f32 * freq).sum()
}

/// Exact-match scores. Each token adds weighted_tf / df to every document in
/// its posting list, where df is the posting list length. Unknown tokens,
/// terms without postings and unreadable barrels contribute nothing.
pub fn lexical_scores<S: AsRef<str>>(lexicon: &Lexicon, barrels: &BarrelReader, tokens: &[S]) -> ScoreMap {
    let mut scores = ScoreMap::new();
    for token in tokens {
        let token = token.as_ref();
        let Some(location) = lexicon.lookup(token).and_then(|e| e.location) else {
            tracing::debug!(token, "no postings for token");
            continue;
        };
        let postings = barrels.read_postings_or_empty(&location);
        if postings.is_empty() {
            continue;
        }
        let df = postings.len() as f32;
        for (doc, tiers) in postings {
            *scores.entry(doc).or_insert(0.0) += weighted_term_frequency(&tiers) / df;
        }
    }
    scores
}

/// Converts a vector-index distance into a similarity in (0, 1].
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

pub fn semantic_scores(index: &dyn VectorIndex, query: &[f32], k: usize) -> ScoreMap {
    if k == 0 || query.iter().all(|x| *x == 0.0) {
        return ScoreMap::new();
    }
    let mut scores = ScoreMap::new();
    for (doc, distance) in index.search(query, k) {
        let sim = similarity_from_distance(distance);
        let slot = scores.entry(doc).or_insert(sim);
        *slot = slot.max(sim);
    }
    scores
}

/// Query encoder plus vector index, the whole semantic side of a query.
pub struct SemanticScorer {
    encoder: Box<dyn QueryEncoder>,
    index: Box<dyn VectorIndex>,
}

impl SemanticScorer {
    pub fn new(encoder: Box<dyn QueryEncoder>, index: Box<dyn VectorIndex>) -> Self {
        Self { encoder, index }
    }

    /// Similarities of the `k` documents nearest the encoded query.
    pub fn scores(&self, tokens: &[String], k: usize) -> ScoreMap {
        match self.encoder.encode(tokens) {
            Some(vector) => semantic_scores(self.index.as_ref(), &vector, k),
            None => ScoreMap::new(),
        }
    }
}

/// Divides every score by the map's maximum. Maps that are empty or whose
/// maximum is not positive come back unchanged.
pub fn normalize_scores(mut scores: ScoreMap) -> ScoreMap {
    let max = scores.values().copied().fold(f32::NEG_INFINITY, f32::max);
    if !(max > 0.0 && max.is_finite()) {
        return scores;
    }
    for score in scores.values_mut() {
        *score /= max;
    }
    scores
}

pub fn check_alpha(alpha: f32) -> Result<f32, RankError> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(alpha)
    } else {
        Err(RankError::InvalidAlpha(alpha))
    }
}

/// Normalizes both maps and ranks the union of their documents by
/// `alpha * lexical + (1 - alpha) * semantic`. A document missing from one
/// map scores 0 there. Equal scores are ordered by ascending document id.
pub fn hybrid_rank(lexical: ScoreMap, semantic: ScoreMap, alpha: f32) -> Result<Vec<(String, f32)>, RankError> {
    let alpha = check_alpha(alpha)?;
    let lexical = normalize_scores(lexical);
    let semantic = normalize_scores(semantic);
    let docs: BTreeSet<&String> = lexical.keys().chain(semantic.keys()).collect();

    let mut ranked: Vec<(String, f32)> = docs
        .into_iter()
        .map(|doc| {
            let lex = lexical.get(doc).copied().unwrap_or(0.0);
            let sem = semantic.get(doc).copied().unwrap_or(0.0);
            (doc.clone(), alpha * lex + (1.0 - alpha) * sem)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(ranked)
}
