use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type TermId = u32;
/// Field importance; larger means more important (title=5 ... body=1).
pub type WeightTier = u32;

/// weight tier -> integer frequency, as produced by the forward index.
pub type TierFrequencies = BTreeMap<WeightTier, u32>;

/// term id -> tier frequencies for one document.
pub type DocTerms = BTreeMap<TermId, TierFrequencies>;

/// weight tier -> frequency, as stored in a barrel.
pub type TierWeights = BTreeMap<WeightTier, f32>;

/// Decoded posting list: document id -> tier weights.
pub type PostingList = BTreeMap<String, TierWeights>;

/// Counters reported by every pipeline stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub processed: usize,
    pub skipped: usize,
    pub malformed: usize,
}

pub fn to_tier_weights(freqs: &TierFrequencies) -> TierWeights {
    freqs.iter().map(|(tier, freq)| (*tier, *freq as f32)).collect()
}
