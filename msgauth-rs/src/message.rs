//! Message representation handed over by the mail pipeline
//!
//! The header block keeps every field exactly as received (folding included)
//! because signatures are computed over those bytes. The body is a source
//! that can be opened on demand instead of a buffer held by the check.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// One header field, raw bytes including the name and trailing line break
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: String,
    raw: Vec<u8>,
}

impl HeaderField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Field body after the colon, still folded
    pub fn value(&self) -> String {
        let raw = String::from_utf8_lossy(&self.raw);
        let value = match raw.find(':') {
            Some(colon) => &raw[colon + 1..],
            None => "",
        };
        value.trim_end_matches(['\r', '\n']).to_string()
    }
}

/// Ordered header block; duplicates allowed, names compared case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<HeaderField>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the header block at the start of `raw`.
    ///
    /// Returns the header and the offset of the first body byte. Lines without
    /// a colon before the blank separator end the header block.
    pub fn parse(raw: &[u8]) -> (Self, usize) {
        let mut header = Header::new();
        let mut pos = 0;

        while pos < raw.len() {
            let line_end = next_line_end(raw, pos);
            let line = &raw[pos..line_end];

            if line == b"\r\n" || line == b"\n" {
                return (header, line_end);
            }

            let colon = match line.iter().position(|&b| b == b':') {
                Some(colon) => colon,
                None => return (header, pos),
            };

            // Pull in continuation lines (leading SP / HTAB).
            let mut end = line_end;
            while end < raw.len() && matches!(raw[end], b' ' | b'\t') {
                end = next_line_end(raw, end);
            }

            let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
            header.fields.push(HeaderField {
                name,
                raw: raw[pos..end].to_vec(),
            });
            pos = end;
        }

        (header, raw.len())
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// All fields called `name`, top to bottom
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderField> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize the block followed by the empty separator line
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for field in &self.fields {
            out.extend_from_slice(&field.raw);
        }
        out.extend_from_slice(b"\r\n");
    }
}

fn next_line_end(raw: &[u8], from: usize) -> usize {
    match raw[from..].iter().position(|&b| b == b'\n') {
        Some(i) => from + i + 1,
        None => raw.len(),
    }
}

/// Split a full message into its header and body
pub fn split_message(raw: &[u8]) -> (Header, MemoryBody) {
    let (header, offset) = Header::parse(raw);
    let body = MemoryBody::new(Bytes::copy_from_slice(&raw[offset..]));
    (header, body)
}

pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Body source that can be opened for reading any number of times
#[async_trait]
pub trait Body: Send + Sync {
    async fn open(&self) -> io::Result<BodyReader>;
}

/// Body held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBody {
    data: Bytes,
}

impl MemoryBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl Body for MemoryBody {
    async fn open(&self) -> io::Result<BodyReader> {
        Ok(Box::pin(io::Cursor::new(self.data.clone())))
    }
}

/// Body spooled to a file
#[derive(Debug, Clone)]
pub struct FileBody {
    path: PathBuf,
}

impl FileBody {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Body for FileBody {
    async fn open(&self) -> io::Result<BodyReader> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::pin(file))
    }
}

/// Per-message data the pipeline passes to checks; used for diagnostics only
#[derive(Debug, Clone, Default)]
pub struct MsgMetadata {
    pub id: String,
    pub smtp_from: Option<String>,
}

impl MsgMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            smtp_from: None,
        }
    }
}
