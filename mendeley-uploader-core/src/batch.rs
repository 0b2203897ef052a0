//! One upload batch: refresh a token, find the PDFs, then create and attach each one.
//!
//! # Flow
//! 1. Exchange the refresh token for an access token. Failure aborts the batch.
//! 2. Scan the target path and drop files the ledger already records as uploaded.
//! 3. For each remaining file, in name order:
//!    - create a document from the file's title,
//!    - attach the file's bytes to that document,
//!    - append the outcome to the ledger and bump the progress counters,
//!    - pause for the polite delay.
//! 4. Finish with "Completed", or "Stopped." if a stop was requested between files.
//!
//! A file that fails never aborts the batch: it is recorded as `failed_metadata` or
//! `failed_upload` and the loop moves on. Each remote call goes through
//! [`with_retry`](crate::retry::with_retry), and a 401 mid-batch triggers one token refresh.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BatchSettings;
use crate::contract::{AccessToken, ApiError, Library, NewAttachment, NewDocument, TokenSource};
use crate::ledger::{path_key, Ledger, LedgerRecord, Outcome};
use crate::monitor::RunGuard;
use crate::retry::{with_retry, RetryPolicy};
use crate::scan::{scan_pdfs, sha256_file, ScannedFile};

pub const AUTH_FAILED_MESSAGE: &str = "Authentication Failed. Check Logs.";
pub const STOPPED_MESSAGE: &str = "Stopped.";
pub const COMPLETED_MESSAGE: &str = "Completed";

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("authentication failed: {0}")]
    Authentication(#[source] ApiError),

    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read ledger {path}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub title: String,
    pub document_id: Option<String>,
    pub outcome: Outcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub files: Vec<FileReport>,
    pub skipped: usize,
    pub stopped: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.outcome == Outcome::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }
}

struct PendingFile {
    file: ScannedFile,
    sha256: Option<String>,
}

pub async fn upload_batch<T, L>(
    run: RunGuard,
    settings: &BatchSettings,
    tokens: &T,
    library: &L,
    ledger: &Ledger,
    target: &Path,
) -> Result<BatchReport, BatchError>
where
    T: TokenSource + ?Sized,
    L: Library + ?Sized,
{
    let run_id = run.run_id();
    info!(%run_id, target = %target.display(), "Starting upload batch");

    run.set_message("Refreshing access token");
    info!("Refreshing access token...");
    let mut token = match tokens.access_token().await {
        Ok(token) => {
            info!("Access token refreshed.");
            token
        }
        Err(e) => {
            error!(error = %e, "Failed to get access token");
            run.finish(AUTH_FAILED_MESSAGE);
            return Err(BatchError::Authentication(e));
        }
    };

    let scanned = match scan_pdfs(target) {
        Ok(files) => files,
        Err(source) => {
            error!(target = %target.display(), error = %source, "Failed to scan target path");
            run.finish(format!("Scan failed: {source}"));
            return Err(BatchError::Scan {
                path: target.to_path_buf(),
                source,
            });
        }
    };

    let (pending, skipped) = match select_pending(scanned, settings.skip_uploaded, ledger).await {
        Ok(selection) => selection,
        Err(source) => {
            error!(ledger = %ledger.path().display(), error = %source, "Failed to read ledger");
            run.finish("Ledger unreadable. Check Logs.");
            return Err(BatchError::Ledger {
                path: ledger.path().to_path_buf(),
                source,
            });
        }
    };

    let total = pending.len();
    run.set_totals(total, skipped);
    run.set_message(format!("Processing directly from {}", target.display()));
    info!(total, skipped, "Found PDF files to process");

    let mut files = Vec::with_capacity(total);
    let mut stopped = false;

    for (index, item) in pending.iter().enumerate() {
        if run.stop_requested() {
            info!("Process stopped by user.");
            stopped = true;
            break;
        }

        run.begin_file(&item.file.file_name);
        info!(
            position = index + 1,
            total,
            file = %item.file.file_name,
            "Processing file"
        );

        let report = upload_one(settings, tokens, library, &mut token, item).await;

        let record = LedgerRecord {
            timestamp: Utc::now(),
            run_id,
            file: path_key(&report.file),
            title: report.title.clone(),
            sha256: item.sha256.clone(),
            document_id: report.document_id.clone(),
            outcome: report.outcome,
            error: report.error.clone(),
        };
        if let Err(e) = ledger.append(&record) {
            error!(ledger = %ledger.path().display(), error = %e, "Failed to append ledger record");
        }

        run.record(report.outcome);
        files.push(report);

        if index + 1 < total && !settings.polite_delay.is_zero() {
            tokio::time::sleep(settings.polite_delay).await;
        }
    }

    let report = BatchReport {
        run_id,
        files,
        skipped,
        stopped,
    };
    info!(
        %run_id,
        processed = report.files.len(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped,
        stopped,
        "Batch processing finished."
    );
    run.finish(if stopped {
        STOPPED_MESSAGE
    } else {
        COMPLETED_MESSAGE
    });
    Ok(report)
}

async fn select_pending(
    scanned: Vec<ScannedFile>,
    skip_uploaded: bool,
    ledger: &Ledger,
) -> io::Result<(Vec<PendingFile>, usize)> {
    let index = if skip_uploaded {
        Some(ledger.uploaded_index()?)
    } else {
        None
    };

    let mut pending = Vec::with_capacity(scanned.len());
    let mut skipped = 0;
    for file in scanned {
        let sha256 = hash_file(file.path.clone()).await;
        if let Some(index) = &index {
            if index.contains(&file.path, sha256.as_deref()) {
                info!(file = %file.file_name, "Already uploaded, skipping");
                skipped += 1;
                continue;
            }
        }
        pending.push(PendingFile { file, sha256 });
    }
    Ok((pending, skipped))
}

async fn hash_file(path: PathBuf) -> Option<String> {
    let shown = path.display().to_string();
    match tokio::task::spawn_blocking(move || sha256_file(&path)).await {
        Ok(Ok(hash)) => Some(hash),
        Ok(Err(e)) => {
            warn!(file = %shown, error = %e, "Could not hash file");
            None
        }
        Err(e) => {
            warn!(file = %shown, error = %e, "Hashing task failed");
            None
        }
    }
}

async fn upload_one<T, L>(
    settings: &BatchSettings,
    tokens: &T,
    library: &L,
    token: &mut AccessToken,
    item: &PendingFile,
) -> FileReport
where
    T: TokenSource + ?Sized,
    L: Library + ?Sized,
{
    let file = &item.file;
    let new_document = NewDocument {
        title: file.title.clone(),
        kind: settings.document_type.clone(),
    };

    let created = call_with_reauth(&settings.retry, tokens, token, "create_document", |t| {
        let document = new_document.clone();
        async move { library.create_document(&t, document).await }
    })
    .await;

    let document = match created {
        Ok(document) => {
            info!(document_id = %document.id, "Document created");
            document
        }
        Err(e) => {
            error!(file = %file.file_name, title = %file.title, error = %e, "FAILURE (metadata)");
            return FileReport {
                file: file.path.clone(),
                title: file.title.clone(),
                document_id: None,
                outcome: Outcome::FailedMetadata,
                error: Some(e.to_string()),
            };
        }
    };

    let attachment = NewAttachment {
        document_id: document.id.clone(),
        path: file.path.clone(),
        file_name: file.file_name.clone(),
    };
    let attached = call_with_reauth(&settings.retry, tokens, token, "attach_file", |t| {
        let attachment = attachment.clone();
        async move { library.attach_file(&t, attachment).await }
    })
    .await;

    match attached {
        Ok(stored) => {
            info!(file = %file.file_name, document_id = %document.id, file_id = %stored.id, "SUCCESS");
            FileReport {
                file: file.path.clone(),
                title: file.title.clone(),
                document_id: Some(document.id),
                outcome: Outcome::Success,
                error: None,
            }
        }
        Err(e) => {
            error!(file = %file.file_name, document_id = %document.id, error = %e, "FAILURE (upload)");
            FileReport {
                file: file.path.clone(),
                title: file.title.clone(),
                document_id: Some(document.id),
                outcome: Outcome::FailedUpload,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Retry `call` per policy; on a 401, refresh the token once and run the retries again.
async fn call_with_reauth<T, R, F, Fut>(
    policy: &RetryPolicy,
    tokens: &T,
    token: &mut AccessToken,
    operation: &str,
    call: F,
) -> Result<R, ApiError>
where
    T: TokenSource + ?Sized,
    F: Fn(AccessToken) -> Fut,
    Fut: Future<Output = Result<R, ApiError>>,
{
    let first = with_retry(policy, operation, || call(token.clone())).await;
    match first {
        Err(ApiError::Unauthorized { body }) => {
            warn!(operation, response = %body, "Access token rejected, refreshing");
            *token = tokens.access_token().await?;
            with_retry(policy, operation, || call(token.clone())).await
        }
        other => other,
    }
}
