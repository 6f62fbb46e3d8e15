//! JSON result sink
//!
//! The result document is written atomically: the JSON goes to a temporary
//! file in the destination directory which is then renamed over the target,
//! so a checkpoint interrupted half-way never leaves a truncated document.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised while writing or reading result documents
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One successfully fetched page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub path: String,
    /// Content fingerprint, `null` when the page carries none
    pub hash: Option<String>,
    pub status: u16,
}

/// The persisted result document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub total: usize,
    pub blocked: bool,
    pub results: Vec<PageRecord>,
}

#[derive(Serialize)]
struct ResultDocumentRef<'a> {
    total: usize,
    blocked: bool,
    results: &'a [PageRecord],
}

/// Writes result documents to a fixed path
#[derive(Debug, Clone)]
pub struct ResultSink {
    path: PathBuf,
}

impl ResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists the collected results
    ///
    /// # Arguments
    ///
    /// * `results` - Every page collected so far
    /// * `blocked` - Whether the run ended on a hard block
    pub fn persist(&self, results: &[PageRecord], blocked: bool) -> Result<(), SinkError> {
        let document = ResultDocumentRef {
            total: results.len(),
            blocked,
            results,
        };
        write_json_atomic(&self.path, &document)?;

        tracing::debug!("Wrote {} results to {}", results.len(), self.path.display());
        Ok(())
    }

    /// Reads a previously written result document
    pub fn load(path: &Path) -> Result<ResultDocument, SinkError> {
        let file = File::open(path)?;
        let document = serde_json::from_reader(BufReader::new(file))?;
        Ok(document)
    }
}

/// Serializes `value` as pretty JSON and atomically replaces `path` with it
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SinkError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }

    tmp.persist(path).map_err(|e| SinkError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}
