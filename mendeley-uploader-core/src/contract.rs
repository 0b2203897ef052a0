//! Interfaces between the batch pipeline and the outside world.
//!
//! The pipeline in [`crate::batch`] only ever talks to two things: something that hands out
//! access tokens ([`TokenSource`]) and something that stores documents and their attached files
//! ([`Library`]). The real implementations live in the `mendeley-uploader` crate and speak HTTP
//! to the Mendeley API; tests use the `mockall` mocks generated here.
//!
//! All fallible calls return [`ApiError`], which carries enough of the HTTP outcome for the
//! retry policy to tell transient failures (rate limits, 5xx, dropped connections) apart from
//! permanent ones.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mockall::automock;

/// Short-lived bearer credential obtained from a refresh token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building an `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Metadata for a new library document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub title: String,
    /// Mendeley document type, e.g. `book` or `journal`.
    pub kind: String,
}

/// A document as returned by the library after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// A local file to attach to an existing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub document_id: String,
    pub path: PathBuf,
    /// Name reported to the library in `Content-Disposition`.
    pub file_name: String,
}

/// The stored file record returned after an attachment upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub id: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no refresh token configured (set MENDELEY_REFRESH_TOKEN)")]
    MissingRefreshToken,

    #[error("rate limited by the API")]
    RateLimited { retry_after: Option<Duration> },

    #[error("access token rejected: {body}")]
    Unauthorized { body: String },

    #[error("server error {status}: {body}")]
    Server {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 => ApiError::Unauthorized { body },
            429 => ApiError::RateLimited { retry_after },
            500..=599 => ApiError::Server {
                status,
                body,
                retry_after,
            },
            _ => ApiError::Rejected { status, body },
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::Server { .. } | ApiError::Transport(_)
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } | ApiError::Server { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// Exchanges the stored refresh token for an access token.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, ApiError>;
}

/// The remote reference library: creates documents and attaches files to them.
///
/// Implementors perform exactly one request per call; retrying is the caller's job.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Library: Send + Sync {
    /// Create a metadata record and return it with its assigned id.
    async fn create_document(
        &self,
        token: &AccessToken,
        document: NewDocument,
    ) -> Result<Document, ApiError>;

    /// Upload the binary content of a local file and link it to a document.
    async fn attach_file(
        &self,
        token: &AccessToken,
        attachment: NewAttachment,
    ) -> Result<AttachedFile, ApiError>;
}
