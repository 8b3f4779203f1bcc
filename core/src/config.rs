use crate::error::ConfigError;
use crate::WeightTier;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Tunables for the offline build. Every field has a default so a partial
/// JSON file is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub weight_tiers: BTreeMap<String, WeightTier>,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub merge_buffer_size: usize,
    pub terms_per_barrel: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            weight_tiers: default_weight_tiers(),
            batch_size: 1000,
            chunk_size: 100_000,
            merge_buffer_size: 5_000,
            terms_per_barrel: 10_000,
        }
    }
}

pub fn default_weight_tiers() -> BTreeMap<String, WeightTier> {
    [("title", 5), ("abstract", 4), ("sections", 3), ("authors", 2), ("journal", 2), ("text", 1)]
        .into_iter()
        .map(|(field, tier)| (field.to_string(), tier))
        .collect()
}

impl IndexConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: IndexConfig = serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.weight_tiers.is_empty() {
            return Err(ConfigError::NoFields);
        }
        if let Some((field, _)) = self.weight_tiers.iter().find(|(_, tier)| **tier == 0) {
            return Err(ConfigError::ZeroTier(field.clone()));
        }
        let sizes = [
            ("batch_size", self.batch_size),
            ("chunk_size", self.chunk_size),
            ("merge_buffer_size", self.merge_buffer_size),
            ("terms_per_barrel", self.terms_per_barrel),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ConfigError::ZeroSize(name));
            }
        }
        Ok(())
    }
}
