pub mod barrel;
pub mod config;
pub mod document;
pub mod error;
pub mod forward;
pub mod index;
pub mod inverted;
pub mod lexicon;
pub mod persist;
pub mod progress;
pub mod ranker;
pub mod searcher;
pub mod tokenizer;
pub mod trie;

pub use index::{DocTerms, PostingList, StageStats, TermId, TierFrequencies, TierWeights, WeightTier};
