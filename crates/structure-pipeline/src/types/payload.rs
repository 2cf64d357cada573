//! Caller-supplied payloads holding many molecules

use bytes::Bytes;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where the payload bytes live
#[derive(Debug, Clone)]
pub enum PayloadContent {
    /// Bytes held in memory
    Bytes(Bytes),
    /// A file read lazily when the payload is opened
    File(PathBuf),
}

/// A stored blob referenced by id
#[derive(Debug, Clone)]
pub struct Payload {
    pub id: Uuid,
    /// Original file name
    pub name: String,
    pub mime_type: String,
    pub content: PayloadContent,
}

impl Payload {
    /// Create an in-memory payload with a fresh id
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            mime_type: mime_type.into(),
            content: PayloadContent::Bytes(data.into()),
        }
    }

    /// Create a file-backed payload with a fresh id
    pub fn from_path<P: AsRef<Path>>(path: P, mime_type: impl Into<String>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("payload")
            .to_string();
        Self {
            id: Uuid::new_v4(),
            name,
            mime_type: mime_type.into(),
            content: PayloadContent::File(path.to_path_buf()),
        }
    }

    /// Reuse an existing payload id
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Open the payload as a buffered byte stream
    pub fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        match &self.content {
            PayloadContent::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            PayloadContent::File(path) => {
                let file = File::open(path).map_err(|e| {
                    Error::stream(&self.name, format!("cannot open {}: {}", path.display(), e))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }

    /// Lowercased file extension of the payload name
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}
