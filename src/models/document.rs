//! Document models for loan-file storage.
//!
//! Uploaded files are stored content-addressed on disk and tracked with a
//! soft-delete flag. Documents are never hard-removed except through the
//! explicit purge operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Where a document entered the system from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrigin {
    /// Uploaded directly by a user.
    LocalUpload,
    /// Discovered on the remote storage mirror during sync.
    RemoteMirror,
    /// Captured from an emailed attachment.
    MailboxAttachment,
}

impl DocumentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalUpload => "local_upload",
            Self::RemoteMirror => "remote_mirror",
            Self::MailboxAttachment => "mailbox_attachment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local_upload" => Some(Self::LocalUpload),
            "remote_mirror" => Some(Self::RemoteMirror),
            "mailbox_attachment" => Some(Self::MailboxAttachment),
            _ => None,
        }
    }
}

/// A loan-file document.
///
/// Owned exclusively by its loan. `deleted` is a soft-delete flag; the bytes
/// on disk and the row both survive until an explicit purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier for this document.
    pub id: String,
    /// Loan this document belongs to.
    pub loan_id: String,
    /// Display name, usually the original filename.
    pub name: String,
    /// Classified document-type label (e.g. "Appraisal Report").
    pub category: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// Path to the stored bytes on disk.
    pub source_path: PathBuf,
    /// How the document entered the system.
    pub origin: DocumentOrigin,
    /// Size in bytes.
    pub size_bytes: u64,
    /// SHA-256 of the content.
    pub content_hash: String,
    /// When the document was ingested.
    pub uploaded_at: DateTime<Utc>,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Reference to the counterpart on the remote mirror, once pushed.
    pub remote_id: Option<String>,
}

impl Document {
    /// Compute SHA-256 hash of content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Create a new document from ingested content.
    pub fn new(
        loan_id: &str,
        name: &str,
        category: &str,
        mime_type: &str,
        source_path: PathBuf,
        origin: DocumentOrigin,
        content: &[u8],
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            loan_id: loan_id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            mime_type: mime_type.to_string(),
            source_path,
            origin,
            size_bytes: content.len() as u64,
            content_hash: Self::compute_hash(content),
            uploaded_at: Utc::now(),
            deleted: false,
            remote_id: None,
        }
    }

    /// Whether this document counts as evidence (not soft-deleted).
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Whether this document has a confirmed remote counterpart.
    pub fn is_mirrored(&self) -> bool {
        self.remote_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, content: &[u8]) -> Document {
        Document::new(
            "loan-1",
            name,
            "General Document",
            "application/pdf",
            PathBuf::from("/tmp/x.pdf"),
            DocumentOrigin::LocalUpload,
            content,
        )
    }

    #[test]
    fn test_compute_hash() {
        let hash = Document::compute_hash(b"Hello, World!");
        assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex chars
    }

    #[test]
    fn test_new_document_is_live_and_unmirrored() {
        let doc = sample("appraisal.pdf", b"content");
        assert!(doc.is_live());
        assert!(!doc.is_mirrored());
        assert_eq!(doc.size_bytes, 7);
    }

    #[test]
    fn test_origin_round_trip() {
        for origin in [
            DocumentOrigin::LocalUpload,
            DocumentOrigin::RemoteMirror,
            DocumentOrigin::MailboxAttachment,
        ] {
            assert_eq!(DocumentOrigin::from_str(origin.as_str()), Some(origin));
        }
    }
}
