//! Cleaned input documents. Text arrives already tokenized, lowercased and
//! lemmatized; fields hold whitespace-separated tokens.

use crate::error::DocumentError;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedDocument {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

impl CleanedDocument {
    pub fn new<I, K, V>(id: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn field_tokens<'a>(&'a self, field: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields.get(field).into_iter().flat_map(|text| text.split_whitespace())
    }
}

/// Builds a document from a JSON object: `paper_id` plus every top-level and
/// `metadata` string field. Non-string values are ignored.
pub fn parse_document(value: Value, source_name: &str) -> Result<CleanedDocument, DocumentError> {
    let Value::Object(mut obj) = value else {
        return Err(DocumentError::InvalidJson {
            source_name: source_name.to_string(),
            message: "expected a JSON object".into(),
        });
    };
    let id = match obj.remove("paper_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        _ => return Err(DocumentError::MissingId(source_name.to_string())),
    };
    let mut fields = BTreeMap::new();
    if let Some(Value::Object(meta)) = obj.remove("metadata") {
        for (k, v) in meta {
            if let Value::String(s) = v {
                fields.insert(k, s);
            }
        }
    }
    for (k, v) in obj {
        if let Value::String(s) = v {
            fields.insert(k, s);
        }
    }
    Ok(CleanedDocument { id, fields })
}

pub fn parse_document_str(raw: &str, source_name: &str) -> Result<CleanedDocument, DocumentError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DocumentError::InvalidJson {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })?;
    parse_document(value, source_name)
}

enum Current {
    Buffered(VecDeque<Result<CleanedDocument, DocumentError>>),
    Lines { lines: Lines<BufReader<File>>, name: String, line_no: usize },
}

/// Streams documents out of `.json` files (one object or an array) and
/// `.jsonl` files (one object per line). Bad records come back as errors so
/// the caller can count and skip them.
pub struct DocumentReader {
    files: VecDeque<PathBuf>,
    current: Option<Current>,
}

impl DocumentReader {
    pub fn new<I: IntoIterator<Item = PathBuf>>(files: I) -> Self {
        Self { files: files.into_iter().collect(), current: None }
    }

    fn open(path: &Path) -> Current {
        let name = path.display().to_string();
        let unreadable = |e: std::io::Error| DocumentError::Unreadable { path: name.clone(), message: e.to_string() };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => return Current::Buffered(VecDeque::from([Err(unreadable(e))])),
        };
        if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            return Current::Lines { lines: BufReader::new(file).lines(), name, line_no: 0 };
        }
        let docs = match serde_json::from_reader::<_, Value>(BufReader::new(file)) {
            Ok(Value::Array(items)) => items.into_iter().map(|v| parse_document(v, &name)).collect(),
            Ok(v) => VecDeque::from([parse_document(v, &name)]),
            Err(e) => VecDeque::from([Err(DocumentError::InvalidJson { source_name: name.clone(), message: e.to_string() })]),
        };
        Current::Buffered(docs)
    }
}

impl Iterator for DocumentReader {
    type Item = Result<CleanedDocument, DocumentError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.current {
                Some(Current::Buffered(docs)) => {
                    if let Some(doc) = docs.pop_front() {
                        return Some(doc);
                    }
                }
                Some(Current::Lines { lines, name, line_no }) => match lines.next() {
                    Some(Ok(line)) => {
                        *line_no += 1;
                        if line.trim().is_empty() {
                            continue;
                        }
                        return Some(parse_document_str(&line, &format!("{name}:{line_no}")));
                    }
                    Some(Err(e)) => {
                        let err = DocumentError::Unreadable { path: name.clone(), message: e.to_string() };
                        self.current = None;
                        return Some(Err(err));
                    }
                    None => {}
                },
                None => {}
            }
            let path = self.files.pop_front()?;
            self.current = Some(Self::open(&path));
        }
    }
}
