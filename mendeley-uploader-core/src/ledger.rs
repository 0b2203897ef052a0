//! Append-only record of upload outcomes, one JSON object per line.
//!
//! The ledger is both the audit trail of every batch and the source of truth for
//! "already uploaded": a later batch can skip any file whose path or content hash
//! appears in a successful record.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// The document record could not be created; nothing was uploaded.
    FailedMetadata,
    /// The document exists but the file could not be attached.
    FailedUpload,
}

/// Ledger form of a path. Non-UTF-8 bytes are replaced so every record can be written.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    /// See [`path_key`].
    pub file: String,
    pub title: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    pub outcome: Outcome,
    #[serde(default)]
    pub error: Option<String>,
}

/// Paths and content hashes of files that were uploaded successfully.
#[derive(Debug, Default)]
pub struct UploadedIndex {
    paths: HashSet<String>,
    hashes: HashSet<String>,
}

impl UploadedIndex {
    pub fn contains(&self, path: &Path, sha256: Option<&str>) -> bool {
        self.paths.contains(&path_key(path)) || sha256.is_some_and(|h| self.hashes.contains(h))
    }
}

pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line, creating the file (and its directory) if needed.
    pub fn append(&self, record: &LedgerRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        debug!(ledger = %self.path.display(), file = %record.file, outcome = ?record.outcome, "Appended ledger record");
        Ok(())
    }

    /// All readable records in file order. A missing ledger is empty; malformed lines are skipped.
    pub fn records(&self) -> io::Result<Vec<LedgerRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(ledger = %self.path.display(), line = index + 1, error = %e, "Skipping malformed ledger line")
                }
            }
        }
        Ok(records)
    }

    pub fn uploaded_index(&self) -> io::Result<UploadedIndex> {
        let mut index = UploadedIndex::default();
        for record in self
            .records()?
            .into_iter()
            .filter(|r| r.outcome == Outcome::Success)
        {
            index.paths.insert(record.file);
            if let Some(hash) = record.sha256 {
                index.hashes.insert(hash);
            }
        }
        Ok(index)
    }
}
