#![doc = "Mendeley API client: implements the core `Library` trait over HTTP."]
//
//! # Mendeley client
//!
//! [`MendeleyClient`] is the bridge between the batch pipeline in
//! [`mendeley_uploader_core::batch`] and the Mendeley REST API:
//!
//! - `create_document` → `POST /documents` with a `vnd.mendeley-document.1+json` body.
//! - `attach_file` → `POST /files` with the raw PDF bytes, linked to the document through a
//!   `Link: <.../documents/{id}>; rel="document"` header.
//!
//! Each call is a single request. Non-success statuses are mapped onto
//! [`ApiError`] (including any `Retry-After` header) so the core retry policy can decide
//! what to do; this module never retries on its own.

use std::time::Duration;

use async_trait::async_trait;
use mendeley_uploader_core::contract::{
    AccessToken, ApiError, AttachedFile, Document, Library, NewAttachment, NewDocument,
};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, LINK, RETRY_AFTER};
use reqwest::{Client, Response};
use serde::Serialize;

use crate::load_config::AppConfig;

pub const DOCUMENT_CONTENT_TYPE: &str = "application/vnd.mendeley-document.1+json";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

const DOCUMENT_TIMEOUT: Duration = Duration::from_secs(30);
const FILE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct DocumentBody<'a> {
    title: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

pub(crate) fn transport_error(e: reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

/// Turn a non-success response into an [`ApiError`], keeping the body and `Retry-After`.
pub(crate) async fn error_from_response(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    ApiError::from_status(status, body, retry_after)
}

/// `attachment; filename="..."` with quotes and backslashes in the name neutralised.
pub fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

pub struct MendeleyClient {
    http: Client,
    base_url: String,
}

impl MendeleyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.api_base_url.clone())
    }

    pub fn documents_url(&self) -> String {
        format!("{}/documents", self.base_url)
    }

    pub fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    /// `Link` header value tying an uploaded file to its document.
    pub fn document_link(&self, document_id: &str) -> String {
        format!("<{}/{}>; rel=\"document\"", self.documents_url(), document_id)
    }
}

#[async_trait]
impl Library for MendeleyClient {
    async fn create_document(
        &self,
        token: &AccessToken,
        document: NewDocument,
    ) -> Result<Document, ApiError> {
        tracing::info!(title = %document.title, kind = %document.kind, "Creating document");
        let body = serde_json::to_vec(&DocumentBody {
            title: &document.title,
            kind: &document.kind,
        })
        .map_err(|e| ApiError::InvalidResponse(format!("could not encode document: {e}")))?;

        let response = self
            .http
            .post(self.documents_url())
            .bearer_auth(token.secret())
            .header(CONTENT_TYPE, DOCUMENT_CONTENT_TYPE)
            .body(body)
            .timeout(DOCUMENT_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            tracing::error!(title = %document.title, error = %err, "API error creating document");
            return Err(err);
        }

        let created: Document = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("document response: {e}")))?;
        tracing::info!(document_id = %created.id, "Document created");
        Ok(created)
    }

    async fn attach_file(
        &self,
        token: &AccessToken,
        attachment: NewAttachment,
    ) -> Result<AttachedFile, ApiError> {
        let content = tokio::fs::read(&attachment.path)
            .await
            .map_err(|source| ApiError::Io {
                path: attachment.path.clone(),
                source,
            })?;
        tracing::info!(
            file = %attachment.file_name,
            document_id = %attachment.document_id,
            size = content.len(),
            "Uploading file content"
        );

        let response = self
            .http
            .post(self.files_url())
            .bearer_auth(token.secret())
            .header(CONTENT_TYPE, PDF_CONTENT_TYPE)
            .header(LINK, self.document_link(&attachment.document_id))
            .header(CONTENT_DISPOSITION, content_disposition(&attachment.file_name))
            .body(content)
            .timeout(FILE_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            tracing::error!(file = %attachment.file_name, error = %err, "API error uploading file content");
            return Err(err);
        }

        let stored: AttachedFile = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("file response: {e}")))?;
        tracing::info!(
            file_id = %stored.id,
            document_id = %attachment.document_id,
            "File uploaded successfully"
        );
        Ok(stored)
    }
}
