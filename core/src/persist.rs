use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub created_at: String,
    pub version: u32,
    pub num_terms: usize,
    pub num_barrels: u32,
    pub num_documents: usize,
}

/// Layout of a data directory. One build process owns it at a time.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn lexicon(&self) -> PathBuf { self.root.join("lexicon.json") }
    pub fn logs_dir(&self) -> PathBuf { self.root.join("logs") }
    pub fn forward_dir(&self) -> PathBuf { self.root.join("forward_index") }
    pub fn inverted_tmp_dir(&self) -> PathBuf { self.root.join("inverted_tmp") }
    pub fn inverted_stream(&self) -> PathBuf { self.root.join("inverted_index.jsonl") }
    pub fn barrels_dir(&self) -> PathBuf { self.root.join("barrels") }
    pub fn trie(&self) -> PathBuf { self.root.join("trie.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn lexicon_pending(&self) -> PathBuf { self.logs_dir().join("lexicon_pending.json") }

    pub fn forward_batch(&self, index: usize) -> PathBuf {
        self.forward_dir().join(format!("forward_batch_{index:06}.json"))
    }

    pub fn chunk(&self, index: usize) -> PathBuf {
        self.inverted_tmp_dir().join(format!("chunk_{index:06}.jsonl"))
    }
}

pub fn barrel_path(dir: &Path, barrel: u32) -> PathBuf {
    dir.join(format!("barrel_{barrel}.bin"))
}

/// Path of the scratch file `write_atomic` renames over `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `bytes` next to `path` and renames it into place, so readers see
/// either the old or the new contents.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = staging_path(path);
    {
        let mut f = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("renaming {} into place", path.display()))?;
    Ok(())
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let value = serde_json::from_reader(BufReader::new(f)).with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

pub fn save_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    write_atomic(path, &bytes)
}

pub fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let buf = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value = bincode::deserialize(&buf).with_context(|| format!("decoding {}", path.display()))?;
    Ok(value)
}

pub fn save_meta(paths: &IndexPaths, num_terms: usize, num_barrels: u32, num_documents: usize) -> Result<()> {
    let meta = MetaFile {
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        version: FORMAT_VERSION,
        num_terms,
        num_barrels,
        num_documents,
    };
    save_json(&paths.meta(), &meta)
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    load_json(&paths.meta())
}
