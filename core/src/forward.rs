//! Forward index: per document, term id -> weight tier -> frequency.
//! Records are buffered and written in bounded batches; the progress log is
//! only updated once a batch is safely on disk.

use crate::config::IndexConfig;
use crate::document::CleanedDocument;
use crate::error::DocumentError;
use crate::lexicon::Lexicon;
use crate::persist::{load_json, save_json, IndexPaths};
use crate::progress::ProgressLog;
use crate::{DocTerms, StageStats};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

/// Contents of one forward batch file: document id -> record.
pub type ForwardBatch = BTreeMap<String, DocTerms>;

/// Builds the record for one document. Tokens missing from the lexicon are
/// dropped; occurrences in fields sharing a tier are summed.
pub fn forward_record(doc: &CleanedDocument, lexicon: &Lexicon, config: &IndexConfig) -> DocTerms {
    let mut record = DocTerms::new();
    for (field, tier) in &config.weight_tiers {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for token in doc.field_tokens(field) {
            *counts.entry(token).or_insert(0) += 1;
        }
        for (token, freq) in counts {
            let Some(entry) = lexicon.lookup(token) else { continue };
            *record.entry(entry.id).or_default().entry(*tier).or_insert(0) += freq;
        }
    }
    record
}

/// Batch files in write order.
pub fn batch_files(paths: &IndexPaths) -> Result<Vec<PathBuf>> {
    let dir = paths.forward_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| batch_index(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

fn batch_index(path: &std::path::Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("forward_batch_")?.strip_suffix(".json")?.parse().ok()
}

pub fn load_batch(path: &std::path::Path) -> Result<ForwardBatch> {
    load_json(path)
}

pub struct ForwardIndexBuilder<'a> {
    paths: &'a IndexPaths,
    config: &'a IndexConfig,
    lexicon: &'a Lexicon,
    batch: ForwardBatch,
    next_batch: usize,
    stats: StageStats,
}

impl<'a> ForwardIndexBuilder<'a> {
    pub fn new(paths: &'a IndexPaths, config: &'a IndexConfig, lexicon: &'a Lexicon) -> Result<Self> {
        let next_batch = batch_files(paths)?
            .iter()
            .filter_map(|p| batch_index(p))
            .max()
            .map_or(0, |i| i + 1);
        Ok(Self { paths, config, lexicon, batch: ForwardBatch::new(), next_batch, stats: StageStats::default() })
    }

    /// Indexes `doc` unless it is already done or has not been through the
    /// lexicon stage yet.
    pub fn add(&mut self, doc: &CleanedDocument, lexicon_log: &ProgressLog, log: &mut ProgressLog) -> Result<()> {
        if log.contains(&doc.id) || self.batch.contains_key(&doc.id) {
            self.stats.skipped += 1;
            return Ok(());
        }
        if !lexicon_log.contains(&doc.id) {
            tracing::warn!(doc = %doc.id, "document not in lexicon log; skipping");
            self.stats.skipped += 1;
            return Ok(());
        }
        let record = forward_record(doc, self.lexicon, self.config);
        self.batch.insert(doc.id.clone(), record);
        self.stats.processed += 1;
        if self.batch.len() >= self.config.batch_size {
            self.flush(log)?;
        }
        Ok(())
    }

    /// Writes the buffered batch, then records its documents in `log`.
    pub fn flush(&mut self, log: &mut ProgressLog) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let path = self.paths.forward_batch(self.next_batch);
        save_json(&path, &self.batch)?;
        tracing::debug!(batch = self.next_batch, docs = self.batch.len(), "wrote forward batch");
        log.extend(std::mem::take(&mut self.batch).into_keys());
        log.flush()?;
        self.next_batch += 1;
        Ok(())
    }

    pub fn finish(mut self, log: &mut ProgressLog) -> Result<StageStats> {
        self.flush(log)?;
        Ok(self.stats)
    }

    fn record_malformed(&mut self) {
        self.stats.malformed += 1;
    }
}

/// Forward-index stage over a stream of cleaned documents.
pub fn build_forward_index<I>(
    paths: &IndexPaths,
    config: &IndexConfig,
    lexicon: &Lexicon,
    lexicon_log: &ProgressLog,
    log: &mut ProgressLog,
    docs: I,
) -> Result<StageStats>
where
    I: IntoIterator<Item = Result<CleanedDocument, DocumentError>>,
{
    let mut builder = ForwardIndexBuilder::new(paths, config, lexicon)?;
    for doc in docs {
        match doc {
            Ok(doc) => builder.add(&doc, lexicon_log, log)?,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed document");
                builder.record_malformed();
            }
        }
    }
    let stats = builder.finish(log)?;
    tracing::info!(
        processed = stats.processed,
        skipped = stats.skipped,
        malformed = stats.malformed,
        "forward stage complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Stage;

    fn lexicon_of(terms: &[&str]) -> Lexicon {
        let mut lex = Lexicon::new();
        for t in terms {
            lex.upsert(t);
        }
        lex
    }

    fn logged(paths: &IndexPaths, stage: Stage, ids: &[&str]) -> ProgressLog {
        let mut log = ProgressLog::open(paths, stage).unwrap();
        for id in ids {
            log.insert(id);
        }
        log
    }

    #[test]
    fn sums_fields_sharing_a_tier_and_keeps_tiers_apart() {
        let lex = lexicon_of(&["virus", "cell"]);
        let doc = CleanedDocument::new(
            "d",
            [("title", "virus"), ("authors", "virus cell"), ("journal", "virus"), ("text", "virus unknown")],
        );
        let record = forward_record(&doc, &lex, &IndexConfig::default());

        let virus = &record[&0];
        assert_eq!(virus.get(&5), Some(&1));
        assert_eq!(virus.get(&2), Some(&2));
        assert_eq!(virus.get(&1), Some(&1));
        assert_eq!(record[&1].get(&2), Some(&1));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn unconfigured_fields_are_ignored() {
        let lex = lexicon_of(&["virus"]);
        let doc = CleanedDocument::new("d", [("footnote", "virus")]);
        assert!(forward_record(&doc, &lex, &IndexConfig::default()).is_empty());
    }

    #[test]
    fn batches_are_bounded_and_logged_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let config = IndexConfig { batch_size: 2, ..IndexConfig::default() };
        let lex = lexicon_of(&["virus"]);
        let lexicon_log = logged(&paths, Stage::Lexicon, &["a", "b", "c"]);
        let mut log = ProgressLog::open(&paths, Stage::Forward).unwrap();

        let docs = ["a", "b", "c", "unknown"]
            .into_iter()
            .map(|id| Ok(CleanedDocument::new(id, [("text", "virus")])));
        let stats = build_forward_index(&paths, &config, &lex, &lexicon_log, &mut log, docs).unwrap();
        assert_eq!(stats, StageStats { processed: 3, skipped: 1, malformed: 0 });

        let files = batch_files(&paths).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(load_batch(&files[0]).unwrap().len(), 2);
        assert_eq!(load_batch(&files[1]).unwrap().len(), 1);
        assert!(!log.contains("unknown"));
        assert_eq!(ProgressLog::open(&paths, Stage::Forward).unwrap().len(), 3);
    }

    #[test]
    fn rerun_is_a_no_op_and_output_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let config = IndexConfig::default();
        let lex = lexicon_of(&["virus", "cell"]);
        let lexicon_log = logged(&paths, Stage::Lexicon, &["a", "b"]);
        let docs = || {
            vec![
                Ok(CleanedDocument::new("a", [("title", "virus cell"), ("text", "virus")])),
                Ok(CleanedDocument::new("b", [("abstract", "cell cell")])),
            ]
        };

        let mut log = ProgressLog::open(&paths, Stage::Forward).unwrap();
        build_forward_index(&paths, &config, &lex, &lexicon_log, &mut log, docs()).unwrap();
        let first = load_batch(&batch_files(&paths).unwrap()[0]).unwrap();

        let stats = build_forward_index(&paths, &config, &lex, &lexicon_log, &mut log, docs()).unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.skipped, 2);
        assert_eq!(batch_files(&paths).unwrap().len(), 1);

        let other = tempfile::tempdir().unwrap();
        let other_paths = IndexPaths::new(other.path());
        let other_lexicon_log = logged(&other_paths, Stage::Lexicon, &["a", "b"]);
        let mut other_log = ProgressLog::open(&other_paths, Stage::Forward).unwrap();
        build_forward_index(&other_paths, &config, &lex, &other_lexicon_log, &mut other_log, docs()).unwrap();
        let second = load_batch(&batch_files(&other_paths).unwrap()[0]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn batch_file_uses_string_keys() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let lex = lexicon_of(&["virus"]);
        let lexicon_log = logged(&paths, Stage::Lexicon, &["a"]);
        let mut log = ProgressLog::open(&paths, Stage::Forward).unwrap();
        let docs = vec![Ok(CleanedDocument::new("a", [("title", "virus virus")]))];
        build_forward_index(&paths, &IndexConfig::default(), &lex, &lexicon_log, &mut log, docs).unwrap();

        let raw = fs::read_to_string(paths.forward_batch(0)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["a"]["0"]["5"], 2);
    }
}
