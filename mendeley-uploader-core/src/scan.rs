//! Finds the PDF files a batch should upload.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// A PDF found on disk, with the names the upload will use for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Canonical absolute path.
    pub path: PathBuf,
    pub file_name: String,
    pub title: String,
}

impl ScannedFile {
    fn from_path(path: PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        let title = derive_title(&file_name);
        Some(Self {
            path,
            file_name,
            title,
        })
    }
}

/// Document title for a file name: the stem, with underscores read as spaces.
pub fn derive_title(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    stem.replace('_', " ")
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// List the PDFs under `target`.
///
/// A file target yields itself if it is a PDF. A directory target yields its direct,
/// non-hidden PDF children sorted by name; subdirectories are not descended into.
/// A missing target is an `io::ErrorKind::NotFound` error.
pub fn scan_pdfs(target: &Path) -> io::Result<Vec<ScannedFile>> {
    let root = fs::canonicalize(target)?;
    let metadata = fs::metadata(&root)?;

    if metadata.is_file() {
        let files: Vec<ScannedFile> = if is_pdf(&root) {
            ScannedFile::from_path(root.clone()).into_iter().collect()
        } else {
            debug!(path = %root.display(), "Target file is not a PDF");
            Vec::new()
        };
        return Ok(files);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_file() || !is_pdf(&path) {
            continue;
        }
        if let Some(file) = ScannedFile::from_path(path) {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    info!(root = %root.display(), count = files.len(), "Scanned directory for PDFs");
    Ok(files)
}

/// Hex SHA-256 of a file's content, streamed in chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
