use thiserror::Error;

/// Failures decoding or encoding a single posting list.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("posting list truncated: needed {needed} bytes at position {at}, {available} available")]
    Truncated { at: usize, needed: usize, available: usize },
    #[error("posting list has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("document id is {0} bytes, longer than u16::MAX")]
    DocIdTooLong(usize),
    #[error("posting list holds {0} entries, more than u32::MAX")]
    TooManyEntries(usize),
    #[error("document id is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BarrelError {
    #[error("barrel {0} does not exist")]
    Missing(u32),
    #[error("short read in barrel {barrel} at offset {offset}")]
    ShortRead { barrel: u32, offset: u64 },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid document JSON in {source_name}: {message}")]
    InvalidJson { source_name: String, message: String },
    #[error("document in {0} has no paper_id")]
    MissingId(String),
    #[error("could not read {path}: {message}")]
    Unreadable { path: String, message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("weight tier for field `{0}` must be positive")]
    ZeroTier(String),
    #[error("`{0}` must be greater than zero")]
    ZeroSize(&'static str),
    #[error("no weighted fields configured")]
    NoFields,
}

#[derive(Debug, Error, PartialEq)]
pub enum RankError {
    #[error("alpha must lie in [0, 1], got {0}")]
    InvalidAlpha(f32),
}
