//! Document ingestion: direct uploads and mailbox attachments.
//!
//! Every ingested document gets its bytes written to content-addressed
//! storage, a MIME type sniffed from content (falling back to the filename
//! extension), and an initial category from the filename classifier. The
//! record is persisted before the document is returned to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mail_parser::{MessageParser, MimeHeaders};
use thiserror::Error;
use tracing::{debug, info};

use crate::classify;
use crate::models::{Document, DocumentOrigin};
use crate::store::{save_content, LoanStore, StoreError};

/// Errors from document ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read input file: {0}")]
    Read(String),

    #[error("failed to parse email: {0}")]
    EmailParse(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingests documents into a loan file.
pub struct Ingestor {
    store: Arc<dyn LoanStore>,
    documents_dir: PathBuf,
}

impl Ingestor {
    pub fn new(store: Arc<dyn LoanStore>, documents_dir: PathBuf) -> Self {
        Self {
            store,
            documents_dir,
        }
    }

    /// Ingest a file from disk as a direct upload.
    pub fn ingest_file(&self, loan_id: &str, path: &Path) -> Result<Document, IngestError> {
        let bytes = std::fs::read(path).map_err(|e| IngestError::Read(e.to_string()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();
        self.ingest_bytes(loan_id, &name, &bytes, DocumentOrigin::LocalUpload)
    }

    /// Ingest raw bytes under a display name.
    ///
    /// The category comes from the filename classifier; content-based
    /// classification happens later, once text has been extracted.
    pub fn ingest_bytes(
        &self,
        loan_id: &str,
        name: &str,
        bytes: &[u8],
        origin: DocumentOrigin,
    ) -> Result<Document, IngestError> {
        let mime_type = detect_mime(name, bytes);
        let stored_path = save_content(&self.documents_dir, name, &mime_type, bytes)?;
        let category = classify::classify(name, "");

        let document = Document::new(
            loan_id,
            name,
            category,
            &mime_type,
            stored_path,
            origin,
            bytes,
        );
        self.store.save_document(&document)?;
        info!(
            "ingested '{}' ({}, {} bytes) into loan {} as {}",
            name, mime_type, document.size_bytes, loan_id, category
        );
        Ok(document)
    }

    /// Ingest every attachment of an RFC822 email file.
    ///
    /// The email body itself is not stored; only named attachments become
    /// documents, with origin `MailboxAttachment`.
    pub fn ingest_mailbox(&self, loan_id: &str, eml_path: &Path) -> Result<Vec<Document>, IngestError> {
        let raw = std::fs::read(eml_path).map_err(|e| IngestError::Read(e.to_string()))?;
        let message = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| IngestError::EmailParse("not a parseable RFC822 message".to_string()))?;

        let mut ingested = Vec::new();
        for attachment in message.attachments() {
            let Some(filename) = attachment.attachment_name() else {
                debug!("skipping unnamed attachment in {}", eml_path.display());
                continue;
            };
            let doc = self.ingest_bytes(
                loan_id,
                filename,
                attachment.contents(),
                DocumentOrigin::MailboxAttachment,
            )?;
            ingested.push(doc);
        }
        info!(
            "ingested {} attachment(s) from {}",
            ingested.len(),
            eml_path.display()
        );
        Ok(ingested)
    }
}

/// Sniff a MIME type from content, falling back to the filename extension.
pub fn detect_mime(name: &str, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ingestor(dir: &Path) -> (Ingestor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            Ingestor::new(store.clone(), dir.to_path_buf()),
            store,
        )
    }

    #[test]
    fn test_detect_mime_from_content() {
        assert_eq!(detect_mime("whatever.bin", b"%PDF-1.4 fake"), "application/pdf");
    }

    #[test]
    fn test_detect_mime_extension_fallback() {
        assert_eq!(detect_mime("notes.txt", b"plain words"), "text/plain");
        assert_eq!(detect_mime("mystery", b"plain words"), "application/octet-stream");
    }

    #[test]
    fn test_ingest_bytes_persists_document() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, store) = ingestor(dir.path());

        let doc = ingestor
            .ingest_bytes("loan-1", "appraisal.pdf", b"%PDF-1.4 body", DocumentOrigin::LocalUpload)
            .unwrap();

        assert_eq!(doc.category, "Appraisal Report");
        assert_eq!(doc.mime_type, "application/pdf");
        assert!(doc.is_live());
        assert!(doc.source_path.exists());
        assert_eq!(std::fs::read(&doc.source_path).unwrap(), b"%PDF-1.4 body");

        let listed = store.list_documents("loan-1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, doc.id);
    }

    #[test]
    fn test_ingest_file_uses_filename() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bank statement jan.txt");
        std::fs::write(&input, b"ACCOUNT SUMMARY").unwrap();
        let (ingestor, _) = ingestor(dir.path());

        let doc = ingestor.ingest_file("loan-1", &input).unwrap();
        assert_eq!(doc.name, "bank statement jan.txt");
        assert_eq!(doc.category, "Bank Statements");
        assert_eq!(doc.origin, DocumentOrigin::LocalUpload);
    }

    #[test]
    fn test_ingest_mailbox_extracts_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let eml = concat!(
            "From: broker@example.com\r\n",
            "To: intake@example.com\r\n",
            "Subject: Loan docs\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"SPLIT\"\r\n",
            "\r\n",
            "--SPLIT\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Docs attached.\r\n",
            "--SPLIT\r\n",
            "Content-Type: application/pdf; name=\"insurance policy.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"insurance policy.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERi0xLjQgZmFrZQ==\r\n",
            "--SPLIT--\r\n",
        );
        let eml_path = dir.path().join("intake.eml");
        std::fs::write(&eml_path, eml).unwrap();

        let (ingestor, store) = ingestor(dir.path());
        let docs = ingestor.ingest_mailbox("loan-1", &eml_path).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "insurance policy.pdf");
        assert_eq!(docs[0].origin, DocumentOrigin::MailboxAttachment);
        assert_eq!(docs[0].category, "Insurance Policy");
        assert_eq!(store.list_documents("loan-1").unwrap().len(), 1);
    }

    #[test]
    fn test_ingest_mailbox_without_attachments_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let eml_path = dir.path().join("plain.eml");
        std::fs::write(
            &eml_path,
            b"From: a@example.com\r\nSubject: hi\r\n\r\nno attachments here\r\n",
        )
        .unwrap();

        let (ingestor, store) = ingestor(dir.path());
        let docs = ingestor.ingest_mailbox("loan-1", &eml_path).unwrap();
        assert!(docs.is_empty());
        assert!(store.list_documents("loan-1").unwrap().is_empty());
    }
}
