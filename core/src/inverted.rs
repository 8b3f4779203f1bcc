//! Transposes forward batches into term-major posting lists with an external
//! merge sort, then writes them to barrels in term id order.
//!
//! 1. Fan-out: every (term, document) pair becomes a flat record.
//! 2. Records are cut into `chunk_size` runs, each sorted by term id and
//!    spilled to its own file.
//! 3. A k-way merge keyed by (term id, chunk index) streams the runs back,
//!    grouping consecutive records of one term into a posting list.
//!
//! Memory stays at one run while spilling and `chunks x merge_buffer_size`
//! records while merging, whatever the corpus size.

use crate::barrel::BarrelWriter;
use crate::config::IndexConfig;
use crate::forward::{batch_files, load_batch};
use crate::index::to_tier_weights;
use crate::lexicon::Lexicon;
use crate::persist::{save_meta, staging_path, IndexPaths};
use crate::progress::{ProgressLog, Stage};
use crate::{PostingList, TermId, TierFrequencies};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

/// One (term, document) pair of the intermediate stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub term_id: TermId,
    pub document_id: String,
    pub weight_frequencies: TierFrequencies,
}

/// Posting list before barrel encoding: document id -> tier frequencies.
pub type TermPostings = BTreeMap<String, TierFrequencies>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvertedStats {
    /// Documents transposed for the first time in this run.
    pub new_documents: usize,
    /// Documents skipped because they were done already or not yet forward-indexed.
    pub skipped: usize,
    /// Records carried over from the previous final stream.
    pub carried_records: usize,
    pub chunks: usize,
    pub terms_written: usize,
    pub unknown_terms: usize,
    pub barrels: u32,
}

/// Buffers records and spills them as term-sorted runs.
pub struct ChunkWriter<'a> {
    paths: &'a IndexPaths,
    chunk_size: usize,
    buffer: Vec<FlatRecord>,
    chunks: Vec<PathBuf>,
}

impl<'a> ChunkWriter<'a> {
    pub fn new(paths: &'a IndexPaths, chunk_size: usize) -> Result<Self> {
        let dir = paths.inverted_tmp_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("clearing {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let chunk_size = chunk_size.max(1);
        Ok(Self { paths, chunk_size, buffer: Vec::with_capacity(chunk_size), chunks: Vec::new() })
    }

    pub fn push(&mut self, record: FlatRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.chunk_size {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_by_key(|r| r.term_id);
        let path = self.paths.chunk(self.chunks.len());
        let mut out = BufWriter::new(File::create(&path).with_context(|| format!("creating {}", path.display()))?);
        for record in self.buffer.drain(..) {
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        tracing::debug!(chunk = self.chunks.len(), "spilled sorted chunk");
        self.chunks.push(path);
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        self.spill()?;
        Ok(self.chunks)
    }
}

/// Buffered reader over one sorted run.
struct ChunkCursor {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    buffer: VecDeque<FlatRecord>,
    buffer_size: usize,
}

impl ChunkCursor {
    fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening chunk {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            buffer: VecDeque::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
        })
    }

    fn next_record(&mut self) -> Result<Option<FlatRecord>> {
        if self.buffer.is_empty() {
            self.refill()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn refill(&mut self) -> Result<()> {
        while self.buffer.len() < self.buffer_size {
            let Some(line) = self.lines.next() else { break };
            let line = line?;
            let record: FlatRecord = serde_json::from_str(&line)
                .with_context(|| format!("corrupt record in {}", self.path.display()))?;
            self.buffer.push_back(record);
        }
        Ok(())
    }
}

/// Merges sorted runs and calls `emit` once per term, in ascending term id
/// order, with every posting of that term. Equal term ids are taken in chunk
/// order so the output does not depend on heap internals. Returns the
/// number of terms emitted.
pub fn merge_chunks<F>(chunks: &[PathBuf], buffer_size: usize, mut emit: F) -> Result<usize>
where
    F: FnMut(TermId, TermPostings) -> Result<()>,
{
    let mut cursors = chunks
        .iter()
        .map(|p| ChunkCursor::open(p, buffer_size))
        .collect::<Result<Vec<_>>>()?;
    let mut fronts: Vec<Option<FlatRecord>> = Vec::with_capacity(cursors.len());
    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (idx, cursor) in cursors.iter_mut().enumerate() {
        let front = cursor.next_record()?;
        if let Some(record) = &front {
            heap.push(Reverse((record.term_id, idx)));
        }
        fronts.push(front);
    }

    let mut emitted = 0;
    let mut current: Option<TermId> = None;
    let mut postings = TermPostings::new();
    while let Some(Reverse((term_id, idx))) = heap.pop() {
        let Some(record) = fronts[idx].take() else { continue };
        if current != Some(term_id) {
            if let Some(done) = current {
                emit(done, std::mem::take(&mut postings))?;
                emitted += 1;
            }
            current = Some(term_id);
        }
        postings.insert(record.document_id, record.weight_frequencies);

        let next = cursors[idx].next_record()?;
        if let Some(record) = &next {
            heap.push(Reverse((record.term_id, idx)));
        }
        fronts[idx] = next;
    }
    if let Some(done) = current {
        if !postings.is_empty() {
            emit(done, postings)?;
            emitted += 1;
        }
    }
    Ok(emitted)
}

/// Reads one line of the final stream: `{term_id: {document_id: {tier: freq}}}`.
pub fn parse_stream_line(line: &str) -> Result<BTreeMap<TermId, TermPostings>> {
    Ok(serde_json::from_str(line)?)
}

fn write_stream_line<W: Write>(out: &mut W, term_id: TermId, postings: &TermPostings) -> Result<()> {
    let line: BTreeMap<TermId, &TermPostings> = std::iter::once((term_id, postings)).collect();
    serde_json::to_writer(&mut *out, &line)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Re-emits the previous build's postings so a rebuild keeps them.
fn carry_previous_stream(path: &Path, writer: &mut ChunkWriter) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut carried = 0;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let terms = match parse_stream_line(&line) {
            Ok(terms) => terms,
            Err(err) => {
                tracing::warn!(line = line_no + 1, error = %err, "skipping unreadable inverted index line");
                continue;
            }
        };
        for (term_id, postings) in terms {
            for (document_id, weight_frequencies) in postings {
                writer.push(FlatRecord { term_id, document_id, weight_frequencies })?;
                carried += 1;
            }
        }
    }
    Ok(carried)
}

/// Fan-out pass over every forward batch. Documents are marked in
/// `inverted_log` as they are consumed; the caller persists the log once the
/// build has landed.
fn fan_out(
    paths: &IndexPaths,
    forward_log: &ProgressLog,
    inverted_log: &mut ProgressLog,
    writer: &mut ChunkWriter,
    stats: &mut InvertedStats,
) -> Result<()> {
    for batch_path in batch_files(paths)? {
        let batch = load_batch(&batch_path)?;
        for (doc_id, terms) in batch {
            if inverted_log.contains(&doc_id) {
                stats.skipped += 1;
                continue;
            }
            if !forward_log.contains(&doc_id) {
                tracing::warn!(doc = %doc_id, "document not in forward log; skipping");
                stats.skipped += 1;
                continue;
            }
            for (term_id, weight_frequencies) in terms {
                writer.push(FlatRecord { term_id, document_id: doc_id.clone(), weight_frequencies })?;
            }
            inverted_log.insert(&doc_id);
            stats.new_documents += 1;
        }
    }
    Ok(())
}

/// Inverted-index stage: rebuilds every barrel and the final stream, and
/// points each lexicon entry at its new posting list.
pub fn build_inverted_index(paths: &IndexPaths, config: &IndexConfig, lexicon: &mut Lexicon) -> Result<InvertedStats> {
    let forward_log = ProgressLog::open_prerequisite(paths, Stage::Inverted)?;
    let mut inverted_log = ProgressLog::open(paths, Stage::Inverted)?;
    let mut stats = InvertedStats::default();

    let mut chunk_writer = ChunkWriter::new(paths, config.chunk_size)?;
    stats.carried_records = carry_previous_stream(&paths.inverted_stream(), &mut chunk_writer)?;
    fan_out(paths, &forward_log, &mut inverted_log, &mut chunk_writer, &mut stats)?;
    let chunks = chunk_writer.finish()?;
    stats.chunks = chunks.len();
    tracing::info!(chunks = stats.chunks, new_documents = stats.new_documents, "sorted chunks written");

    lexicon.clear_storage_locations();
    let id_to_term = lexicon.id_to_term();
    let mut barrels = BarrelWriter::create(&paths.barrels_dir(), config.terms_per_barrel)?;
    let stream_path = paths.inverted_stream();
    let staged_stream = staging_path(&stream_path);
    let mut stream = BufWriter::new(
        File::create(&staged_stream).with_context(|| format!("creating {}", staged_stream.display()))?,
    );

    let mut unknown = 0;
    stats.terms_written = merge_chunks(&chunks, config.merge_buffer_size, |term_id, postings| {
        let Some(term) = id_to_term.get(&term_id) else {
            tracing::warn!(term_id, "term missing from lexicon; dropping its postings");
            unknown += 1;
            return Ok(());
        };
        write_stream_line(&mut stream, term_id, &postings)?;
        let encoded: PostingList = postings.iter().map(|(doc, freqs)| (doc.clone(), to_tier_weights(freqs))).collect();
        let location = barrels.append(&encoded)?;
        lexicon.set_storage_location(term, location);
        lexicon.set_document_frequency(term, postings.len() as u32);
        Ok(())
    })?;
    stats.terms_written -= unknown;
    stats.unknown_terms = unknown;
    stats.barrels = barrels.finish()?;

    stream.flush()?;
    stream.get_ref().sync_all()?;
    drop(stream);
    fs::rename(&staged_stream, &stream_path).with_context(|| format!("renaming {}", stream_path.display()))?;
    lexicon.save(&paths.lexicon())?;
    inverted_log.flush()?;
    fs::remove_dir_all(paths.inverted_tmp_dir())?;
    save_meta(paths, lexicon.len(), stats.barrels, inverted_log.len())?;

    tracing::info!(
        terms = stats.terms_written,
        barrels = stats.barrels,
        unknown_terms = stats.unknown_terms,
        "inverted stage complete"
    );
    Ok(stats)
}
