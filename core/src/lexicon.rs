//! Global term dictionary: term -> id, document frequency and, once the
//! inverted index has been built, the barrel location of its postings.

use crate::barrel::StorageLocation;
use crate::config::IndexConfig;
use crate::document::CleanedDocument;
use crate::error::DocumentError;
use crate::persist::{load_json, save_json, IndexPaths};
use crate::progress::{ProgressLog, Stage};
use crate::{StageStats, TermId};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Id written by older tooling for terms that never received one.
pub const UNASSIGNED_ID: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct TermEntry {
    pub id: TermId,
    pub document_frequency: u32,
    pub location: Option<StorageLocation>,
}

/// On-disk shape of one lexicon entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    id: i64,
    df: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    barrel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u32>,
}

/// Journal of a lexicon batch in flight: the documents it covers and the
/// total document frequency of the lexicon file before it. Lives on disk only
/// between the lexicon save and the log flush.
#[derive(Debug, Serialize, Deserialize)]
struct PendingBatch {
    df_total_before: u64,
    documents: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct Lexicon {
    terms: HashMap<String, TermEntry>,
    next_id: TermId,
}

impl Lexicon {
    pub fn new() -> Self { Self::default() }

    pub fn lookup(&self, term: &str) -> Option<&TermEntry> {
        self.terms.get(term)
    }

    /// Returns the id of `term`, assigning the next free one if unseen.
    pub fn upsert(&mut self, term: &str) -> TermId {
        if let Some(entry) = self.terms.get(term) {
            return entry.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.terms.insert(term.to_string(), TermEntry { id, document_frequency: 0, location: None });
        id
    }

    /// Counts one more document containing `term`. Callers dedupe per document.
    pub fn record_occurrence(&mut self, term: &str) -> TermId {
        let id = self.upsert(term);
        if let Some(entry) = self.terms.get_mut(term) {
            entry.document_frequency += 1;
        }
        id
    }

    /// Returns false for a term the lexicon has never seen.
    pub fn set_storage_location(&mut self, term: &str, location: StorageLocation) -> bool {
        match self.terms.get_mut(term) {
            Some(entry) => {
                entry.location = Some(location);
                true
            }
            None => false,
        }
    }

    pub fn set_document_frequency(&mut self, term: &str, df: u32) -> bool {
        match self.terms.get_mut(term) {
            Some(entry) => {
                entry.document_frequency = df;
                true
            }
            None => false,
        }
    }

    /// Forgets every storage location ahead of a full barrel rebuild.
    pub fn clear_storage_locations(&mut self) {
        for entry in self.terms.values_mut() {
            entry.location = None;
        }
    }

    pub fn id_to_term(&self) -> HashMap<TermId, String> {
        self.terms.iter().map(|(term, entry)| (entry.id, term.clone())).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TermEntry)> {
        self.terms.iter().map(|(term, entry)| (term.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let persisted: BTreeMap<String, PersistedEntry> = load_json(path)?;
        let mut lexicon = Lexicon::new();
        let mut unassigned = Vec::new();
        for (term, p) in persisted {
            let Ok(id) = TermId::try_from(p.id) else {
                if p.id != UNASSIGNED_ID {
                    tracing::warn!(term = %term, id = p.id, "out-of-range term id; reassigning");
                }
                unassigned.push((term, p.df));
                continue;
            };
            let location = match (p.barrel, p.offset, p.length) {
                (Some(barrel), Some(offset), Some(length)) => Some(StorageLocation { barrel, offset, length }),
                _ => None,
            };
            lexicon.next_id = lexicon.next_id.max(id + 1);
            lexicon.terms.insert(term, TermEntry { id, document_frequency: p.df, location });
        }
        if !unassigned.is_empty() {
            tracing::warn!(terms = unassigned.len(), "assigning ids to lexicon entries without one");
        }
        for (term, df) in unassigned {
            lexicon.upsert(&term);
            lexicon.set_document_frequency(&term, df);
        }
        Ok(lexicon)
    }

    /// Loads the lexicon a later stage depends on; its absence is fatal.
    pub fn open_required(paths: &IndexPaths) -> Result<Self> {
        let path = paths.lexicon();
        if !path.exists() {
            bail!("no lexicon at {}; run the lexicon stage first", path.display());
        }
        let lexicon = Self::load(&path)?;
        settle_pending_batch(paths, &lexicon)?;
        Ok(lexicon)
    }

    pub fn open_or_new(paths: &IndexPaths) -> Result<Self> {
        let path = paths.lexicon();
        let lexicon = if path.exists() { Self::load(&path)? } else { Self::new() };
        settle_pending_batch(paths, &lexicon)?;
        Ok(lexicon)
    }

    fn df_total(&self) -> u64 {
        self.terms.values().map(|e| u64::from(e.document_frequency)).sum()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let persisted: BTreeMap<&str, PersistedEntry> = self
            .terms
            .iter()
            .map(|(term, e)| {
                let p = PersistedEntry {
                    id: e.id as i64,
                    df: e.document_frequency,
                    barrel: e.location.map(|l| l.barrel),
                    offset: e.location.map(|l| l.offset),
                    length: e.location.map(|l| l.length),
                };
                (term.as_str(), p)
            })
            .collect();
        save_json(path, &persisted)
    }
}

/// Finishes a batch interrupted between the lexicon save and the log flush.
/// Every counted document raises the total document frequency, so a total
/// above the journal's means the save landed and its documents are done;
/// otherwise they were never counted and will be redone.
fn settle_pending_batch(paths: &IndexPaths, lexicon: &Lexicon) -> Result<()> {
    let path = paths.lexicon_pending();
    if !path.exists() {
        return Ok(());
    }
    let pending: PendingBatch = load_json(&path)?;
    if lexicon.df_total() > pending.df_total_before {
        tracing::warn!(docs = pending.documents.len(), "recording lexicon batch saved before an interrupted run");
        let mut log = ProgressLog::open(paths, Stage::Lexicon)?;
        log.extend(pending.documents);
        log.flush()?;
    } else {
        tracing::warn!(docs = pending.documents.len(), "discarding lexicon batch that never reached disk");
    }
    fs::remove_file(&path)?;
    Ok(())
}

/// Journals `batch`, saves the lexicon, then flushes the log.
fn commit_batch(paths: &IndexPaths, lexicon: &Lexicon, log: &ProgressLog, batch: &mut Vec<String>, df_total_before: &mut u64) -> Result<()> {
    let journal = paths.lexicon_pending();
    if !batch.is_empty() {
        save_json(&journal, &PendingBatch { df_total_before: *df_total_before, documents: std::mem::take(batch) })?;
    }
    lexicon.save(&paths.lexicon())?;
    log.flush()?;
    if journal.exists() {
        fs::remove_file(&journal)?;
    }
    *df_total_before = lexicon.df_total();
    Ok(())
}

/// Lexicon-build stage: assigns ids and document frequencies for every
/// document not yet in `log`. Each batch is journaled before the lexicon is
/// saved so an interrupted run never counts a document twice.
pub fn build_lexicon<I>(
    paths: &IndexPaths,
    config: &IndexConfig,
    lexicon: &mut Lexicon,
    log: &mut ProgressLog,
    docs: I,
) -> Result<StageStats>
where
    I: IntoIterator<Item = Result<CleanedDocument, DocumentError>>,
{
    let mut stats = StageStats::default();
    let mut batch: Vec<String> = Vec::new();
    let mut df_total_before = lexicon.df_total();
    for doc in docs {
        let doc = match doc {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed document");
                stats.malformed += 1;
                continue;
            }
        };
        if log.contains(&doc.id) {
            stats.skipped += 1;
            continue;
        }
        let unique: BTreeSet<&str> = config
            .weight_tiers
            .keys()
            .flat_map(|field| doc.field_tokens(field))
            .collect();
        for term in unique {
            lexicon.record_occurrence(term);
        }
        log.insert(&doc.id);
        batch.push(doc.id);
        stats.processed += 1;
        if batch.len() >= config.batch_size {
            commit_batch(paths, lexicon, log, &mut batch, &mut df_total_before)?;
        }
    }
    commit_batch(paths, lexicon, log, &mut batch, &mut df_total_before)?;
    tracing::info!(
        processed = stats.processed,
        skipped = stats.skipped,
        malformed = stats.malformed,
        terms = lexicon.len(),
        "lexicon stage complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, text: &str) -> Result<CleanedDocument, DocumentError> {
        Ok(CleanedDocument::new(id, [("title", title), ("text", text)]))
    }

    #[test]
    fn upsert_assigns_sequential_stable_ids() {
        let mut lex = Lexicon::new();
        assert_eq!(lex.upsert("virus"), 0);
        assert_eq!(lex.upsert("cell"), 1);
        assert_eq!(lex.upsert("virus"), 0);
        assert_eq!(lex.lookup("cell").unwrap().document_frequency, 0);
        assert!(lex.lookup("protein").is_none());
    }

    #[test]
    fn storage_location_only_for_known_terms() {
        let mut lex = Lexicon::new();
        lex.upsert("virus");
        let loc = StorageLocation { barrel: 1, offset: 40, length: 22 };
        assert!(lex.set_storage_location("virus", loc));
        assert!(!lex.set_storage_location("unknown", loc));
        assert_eq!(lex.lookup("virus").unwrap().location, Some(loc));
        lex.clear_storage_locations();
        assert_eq!(lex.lookup("virus").unwrap().location, None);
    }

    #[test]
    fn persisted_form_round_trips_and_keeps_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.json");
        let mut lex = Lexicon::new();
        lex.record_occurrence("virus");
        lex.record_occurrence("virus");
        lex.upsert("cell");
        lex.set_storage_location("virus", StorageLocation { barrel: 0, offset: 0, length: 30 });
        lex.save(&path).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["virus"]["df"], 2);
        assert_eq!(raw["virus"]["length"], 30);
        assert!(raw["cell"].get("barrel").is_none());

        let mut back = Lexicon::load(&path).unwrap();
        assert_eq!(back.lookup("virus"), lex.lookup("virus"));
        assert_eq!(back.upsert("new"), 2);
    }

    #[test]
    fn sentinel_ids_are_reassigned_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.json");
        let raw = format!(r#"{{"a": {{"id": 3, "df": 1}}, "b": {{"id": {UNASSIGNED_ID}, "df": 4}}}}"#);
        std::fs::write(&path, raw).unwrap();
        let lex = Lexicon::load(&path).unwrap();
        assert_eq!(lex.lookup("b").unwrap().id, 4);
        assert_eq!(lex.lookup("b").unwrap().document_frequency, 4);
    }

    #[test]
    fn build_counts_documents_not_occurrences_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let config = IndexConfig { batch_size: 1, ..IndexConfig::default() };
        let mut lex = Lexicon::new();
        let mut log = ProgressLog::open(&paths, Stage::Lexicon).unwrap();

        let docs = vec![
            doc("a", "virus virus", "virus cell"),
            doc("b", "cell", ""),
            Err(DocumentError::MissingId("broken.json".into())),
        ];
        let stats = build_lexicon(&paths, &config, &mut lex, &mut log, docs).unwrap();
        assert_eq!(stats, StageStats { processed: 2, skipped: 0, malformed: 1 });
        assert_eq!(lex.lookup("virus").unwrap().document_frequency, 1);
        assert_eq!(lex.lookup("cell").unwrap().document_frequency, 2);

        let stats = build_lexicon(&paths, &config, &mut lex, &mut log, vec![doc("a", "virus", "")]).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(lex.lookup("virus").unwrap().document_frequency, 1);

        let reloaded = Lexicon::open_required(&paths).unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    fn interrupted_batch(paths: &IndexPaths, lex: &mut Lexicon, id: &str, terms: &[&str], lexicon_saved: bool) {
        let before = lex.df_total();
        for t in terms {
            lex.record_occurrence(t);
        }
        let pending = PendingBatch { df_total_before: before, documents: vec![id.to_string()] };
        save_json(&paths.lexicon_pending(), &pending).unwrap();
        if lexicon_saved {
            lex.save(&paths.lexicon()).unwrap();
        }
    }

    #[test]
    fn batch_saved_before_a_crash_is_not_counted_twice() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let config = IndexConfig::default();
        let mut lex = Lexicon::new();
        let mut log = ProgressLog::open(&paths, Stage::Lexicon).unwrap();
        build_lexicon(&paths, &config, &mut lex, &mut log, vec![doc("a", "virus", "")]).unwrap();
        interrupted_batch(&paths, &mut lex, "b", &["virus"], true);

        let mut lex = Lexicon::open_or_new(&paths).unwrap();
        let mut log = ProgressLog::open(&paths, Stage::Lexicon).unwrap();
        assert!(log.contains("b"));
        assert!(!paths.lexicon_pending().exists());

        let stats = build_lexicon(&paths, &config, &mut lex, &mut log, vec![doc("b", "virus", "")]).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(lex.lookup("virus").unwrap().document_frequency, 2);
    }

    #[test]
    fn batch_lost_before_the_save_is_redone() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let config = IndexConfig::default();
        let mut lex = Lexicon::new();
        let mut log = ProgressLog::open(&paths, Stage::Lexicon).unwrap();
        build_lexicon(&paths, &config, &mut lex, &mut log, vec![doc("a", "virus", "")]).unwrap();
        interrupted_batch(&paths, &mut lex, "b", &["virus"], false);

        let mut lex = Lexicon::open_required(&paths).unwrap();
        let mut log = ProgressLog::open(&paths, Stage::Lexicon).unwrap();
        assert!(!log.contains("b"));
        assert!(!paths.lexicon_pending().exists());

        let stats = build_lexicon(&paths, &config, &mut lex, &mut log, vec![doc("b", "virus", "")]).unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(lex.lookup("virus").unwrap().document_frequency, 2);
    }

    #[test]
    fn missing_lexicon_is_fatal_for_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Lexicon::open_required(&IndexPaths::new(dir.path())).is_err());
    }
}
