//! Binary postings container. A barrel is an append-only file holding the
//! encoded posting lists of at most `terms_per_barrel` terms. All integers
//! are big-endian:
//!
//! ```text
//! u32 doc_count
//! doc_count x {
//!     u16 docid_len, docid_len bytes of UTF-8,
//!     u32 tier_count,
//!     tier_count x { u32 weight_tier, f32 frequency }
//! }
//! ```

use crate::error::{BarrelError, CodecError};
use crate::persist::barrel_path;
use crate::{PostingList, TierWeights};
use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Where a term's encoded posting list lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub barrel: u32,
    pub offset: u64,
    pub length: u32,
}

// Smallest possible encodings, used to reject counts the buffer cannot hold
// before allocating for them.
const MIN_DOC_BYTES: usize = 2 + 4;
const TIER_BYTES: usize = 4 + 4;

/// Appends the encoding of `postings` to `out` and returns the byte count.
pub fn encode_postings<W: Write>(postings: &PostingList, out: &mut W) -> Result<u32, CodecError> {
    let doc_count = u32::try_from(postings.len()).map_err(|_| CodecError::TooManyEntries(postings.len()))?;
    out.write_u32::<BigEndian>(doc_count)?;
    let mut written = 4usize;
    for (doc_id, tiers) in postings {
        let id = doc_id.as_bytes();
        let id_len = u16::try_from(id.len()).map_err(|_| CodecError::DocIdTooLong(id.len()))?;
        let tier_count = u32::try_from(tiers.len()).map_err(|_| CodecError::TooManyEntries(tiers.len()))?;
        out.write_u16::<BigEndian>(id_len)?;
        out.write_all(id)?;
        out.write_u32::<BigEndian>(tier_count)?;
        for (tier, freq) in tiers {
            out.write_u32::<BigEndian>(*tier)?;
            out.write_f32::<BigEndian>(*freq)?;
        }
        written += 2 + id.len() + 4 + tiers.len() * TIER_BYTES;
    }
    u32::try_from(written).map_err(|_| CodecError::TooManyEntries(written))
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(CodecError::Truncated { at: self.pos, needed: n, available });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.take(2)?.read_u16::<BigEndian>()?)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.take(4)?.read_u32::<BigEndian>()?)
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(self.take(4)?.read_f32::<BigEndian>()?)
    }

    fn check_room(&self, count: usize, each: usize) -> Result<(), CodecError> {
        let needed = count.saturating_mul(each);
        if needed > self.remaining() {
            return Err(CodecError::Truncated { at: self.pos, needed, available: self.remaining() });
        }
        Ok(())
    }
}

/// Decodes exactly one posting list; `buf` must hold nothing else.
pub fn decode_postings(buf: &[u8]) -> Result<PostingList, CodecError> {
    let mut d = Decoder { buf, pos: 0 };
    let doc_count = d.u32()? as usize;
    d.check_room(doc_count, MIN_DOC_BYTES)?;
    let mut postings = PostingList::new();
    for _ in 0..doc_count {
        let id_len = d.u16()? as usize;
        let doc_id = String::from_utf8(d.take(id_len)?.to_vec())?;
        let tier_count = d.u32()? as usize;
        d.check_room(tier_count, TIER_BYTES)?;
        let mut tiers = TierWeights::new();
        for _ in 0..tier_count {
            let tier = d.u32()?;
            let freq = d.f32()?;
            tiers.insert(tier, freq);
        }
        postings.insert(doc_id, tiers);
    }
    if d.remaining() != 0 {
        return Err(CodecError::TrailingBytes(d.remaining()));
    }
    Ok(postings)
}

/// Writes posting lists into sequential barrels, rolling over to a new file
/// once the active one holds `terms_per_barrel` terms. Creating a writer
/// wipes the directory: barrels are only ever rebuilt in full.
pub struct BarrelWriter {
    dir: PathBuf,
    terms_per_barrel: usize,
    active: Option<BufWriter<File>>,
    barrel: u32,
    terms_in_barrel: usize,
    cursor: u64,
    barrels_written: u32,
}

impl BarrelWriter {
    pub fn create(dir: &Path, terms_per_barrel: usize) -> Result<Self> {
        if dir.exists() {
            fs::remove_dir_all(dir).with_context(|| format!("removing old barrels in {}", dir.display()))?;
        }
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            terms_per_barrel: terms_per_barrel.max(1),
            active: None,
            barrel: 0,
            terms_in_barrel: 0,
            cursor: 0,
            barrels_written: 0,
        })
    }

    pub fn append(&mut self, postings: &PostingList) -> Result<StorageLocation> {
        if self.active.is_none() {
            let path = barrel_path(&self.dir, self.barrel);
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            self.active = Some(BufWriter::new(file));
            self.cursor = 0;
            self.terms_in_barrel = 0;
            self.barrels_written += 1;
        }
        let out = self.active.as_mut().context("no active barrel")?;
        let length = encode_postings(postings, out)?;
        let location = StorageLocation { barrel: self.barrel, offset: self.cursor, length };
        self.cursor += u64::from(length);
        self.terms_in_barrel += 1;
        if self.terms_in_barrel >= self.terms_per_barrel {
            self.close_active()?;
            self.barrel += 1;
        }
        Ok(location)
    }

    fn close_active(&mut self) -> Result<()> {
        if let Some(mut out) = self.active.take() {
            out.flush()?;
            out.get_ref().sync_all()?;
            tracing::debug!(barrel = self.barrel, terms = self.terms_in_barrel, bytes = self.cursor, "closed barrel");
        }
        Ok(())
    }

    /// Closes the active barrel and returns how many barrels were written.
    pub fn finish(mut self) -> Result<u32> {
        self.close_active()?;
        Ok(self.barrels_written)
    }
}

/// Random-access reader. Every read opens its own handle, so concurrent
/// lookups share no mutable state.
#[derive(Debug, Clone)]
pub struct BarrelReader {
    dir: PathBuf,
}

impl BarrelReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn read_postings(&self, location: &StorageLocation) -> Result<PostingList, BarrelError> {
        let path = barrel_path(&self.dir, location.barrel);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(BarrelError::Missing(location.barrel)),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        let end = location.offset.checked_add(u64::from(location.length));
        if end.map_or(true, |end| end > size) {
            return Err(BarrelError::ShortRead { barrel: location.barrel, offset: location.offset });
        }
        file.seek(SeekFrom::Start(location.offset))?;
        let mut buf = vec![0u8; location.length as usize];
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => BarrelError::ShortRead { barrel: location.barrel, offset: location.offset },
            _ => BarrelError::Io(e),
        })?;
        Ok(decode_postings(&buf)?)
    }

    /// Like `read_postings`, but a failed lookup is logged and yields no postings.
    pub fn read_postings_or_empty(&self, location: &StorageLocation) -> PostingList {
        match self.read_postings(location) {
            Ok(postings) => postings,
            Err(err) => {
                tracing::warn!(barrel = location.barrel, offset = location.offset, error = %err, "unreadable postings");
                PostingList::new()
            }
        }
    }
}
