//! Remote storage mirror boundary and the Google Drive backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors from the remote mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Mirror signalled rate limiting; retryable under the backoff policy.
    #[error("rate limited by storage mirror")]
    RateLimited,
    #[error("mirror request timed out")]
    Timeout,
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("remote file not found: {0}")]
    NotFound(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl MirrorError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, MirrorError::RateLimited)
    }
}

/// A file as the mirror reports it.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Remote document-storage mirror.
///
/// Credentials are caller-supplied and may expire; refreshing them is the
/// caller's responsibility, not this boundary's.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        mime_type: &str,
        folder: &str,
    ) -> Result<String, MirrorError>;
    async fn delete(&self, remote_id: &str) -> Result<(), MirrorError>;
    async fn exists(&self, remote_id: &str) -> Result<bool, MirrorError>;
    async fn download(&self, remote_id: &str) -> Result<Vec<u8>, MirrorError>;
    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>, MirrorError>;
}

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";

/// Google Drive v3 mirror under a caller-supplied bearer token.
pub struct DriveMirror {
    client: Client,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DriveFileResponse {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "mimeType")]
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    trashed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DriveListResponse {
    #[serde(default)]
    files: Vec<DriveFileResponse>,
}

impl DriveMirror {
    pub fn new(access_token: &str, timeout: std::time::Duration) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Http(e.to_string()))?;
        Ok(Self {
            client,
            access_token: access_token.to_string(),
        })
    }

    fn map_send_error(e: reqwest::Error) -> MirrorError {
        if e.is_timeout() {
            MirrorError::Timeout
        } else {
            MirrorError::Http(e.to_string())
        }
    }

    fn check_status(status: StatusCode, context: &str) -> Result<(), MirrorError> {
        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                Err(MirrorError::RateLimited)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(MirrorError::Auth(format!("{}: HTTP {}", context, status)))
            }
            StatusCode::NOT_FOUND => Err(MirrorError::NotFound(context.to_string())),
            s if !s.is_success() => Err(MirrorError::Http(format!("{}: HTTP {}", context, s))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MirrorStore for DriveMirror {
    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        mime_type: &str,
        folder: &str,
    ) -> Result<String, MirrorError> {
        // One multipart request carrying metadata and media together, so a
        // failed upload never leaves an unnamed file stranded outside the
        // mirror folder. remote_id stays unset on failure and the next push
        // simply retries.
        let boundary = format!("loanfile-{}", uuid::Uuid::new_v4());
        let metadata = serde_json::json!({ "name": name, "parents": [folder] });
        let body = multipart_related(&boundary, &metadata.to_string(), mime_type, bytes);

        let url = format!("{}/files?uploadType=multipart", DRIVE_UPLOAD_API);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status(), "upload")?;
        let created: DriveFileResponse = resp
            .json()
            .await
            .map_err(|e| MirrorError::Parse(e.to_string()))?;

        debug!("uploaded '{}' to mirror as {}", name, created.id);
        Ok(created.id)
    }

    async fn delete(&self, remote_id: &str) -> Result<(), MirrorError> {
        let url = format!("{}/files/{}", DRIVE_API, remote_id);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status(), "delete")
    }

    async fn exists(&self, remote_id: &str) -> Result<bool, MirrorError> {
        let url = format!("{}/files/{}?fields=id,trashed", DRIVE_API, remote_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check_status(resp.status(), "exists")?;
        let file: DriveFileResponse = resp
            .json()
            .await
            .map_err(|e| MirrorError::Parse(e.to_string()))?;
        Ok(!file.trashed.unwrap_or(false))
    }

    async fn download(&self, remote_id: &str) -> Result<Vec<u8>, MirrorError> {
        let url = format!("{}/files/{}?alt=media", DRIVE_API, remote_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status(), "download")?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MirrorError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>, MirrorError> {
        let query = format!("'{}' in parents and trashed = false", folder);
        let url = format!(
            "{}/files?q={}&fields=files(id,name,mimeType,size)",
            DRIVE_API,
            urlencoding::encode(&query)
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(resp.status(), "list")?;
        let listing: DriveListResponse = resp
            .json()
            .await
            .map_err(|e| MirrorError::Parse(e.to_string()))?;

        Ok(listing
            .files
            .into_iter()
            .map(|f| RemoteFile {
                id: f.id,
                name: f.name,
                mime_type: f.mime_type,
                size: f.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            })
            .collect())
    }
}

/// Build a `multipart/related` body: a JSON metadata part followed by the
/// media part, as the Drive upload endpoint expects.
fn multipart_related(boundary: &str, metadata: &str, mime_type: &str, media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(media.len() + metadata.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_related_layout() {
        let body = multipart_related(
            "b1",
            r#"{"name":"policy.pdf","parents":["folder-1"]}"#,
            "application/pdf",
            b"%PDF-1.4",
        );
        let text = String::from_utf8(body).unwrap();

        // Metadata part comes first, then the media part, then the closer.
        let metadata_at = text.find(r#""parents":["folder-1"]"#).unwrap();
        let media_at = text.find("%PDF-1.4").unwrap();
        assert!(metadata_at < media_at);
        assert!(text.starts_with("--b1\r\nContent-Type: application/json"));
        assert!(text.contains("--b1\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.4"));
        assert!(text.ends_with("\r\n--b1--"));
    }
}
