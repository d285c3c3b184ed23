//! Synchronization between the local document store and the remote mirror.
//!
//! Directionality is explicit: `LocalAuthoritative` means the local store
//! wins every conflict. The mirror is never allowed to silently reintroduce
//! a document the local store has soft-deleted, and remote failures never
//! reverse local state. Sync is manual and one-shot; there is no automatic
//! trigger.

mod mirror;

pub use mirror::{DriveMirror, MirrorError, MirrorStore, RemoteFile};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify;
use crate::models::{Document, DocumentOrigin};
use crate::retry::BackoffPolicy;
use crate::store::{save_content, LoanStore, StoreError};

/// Errors from synchronization operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("rate limit budget exhausted while syncing loan {loan_id} (document: {document:?})")]
    RateLimitExhausted {
        loan_id: String,
        document: Option<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directional sync policy: the local store is authoritative.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAuthoritative;

impl LocalAuthoritative {
    /// A remote file may seed a new local document only if the loan has
    /// never tracked it. A soft-deleted local document is still "tracked",
    /// so the mirror can never resurrect it.
    pub fn admit_remote_file(&self, tracked_locally: bool) -> bool {
        !tracked_locally
    }

    /// A failed remote deletion never reverses a local soft-delete.
    pub fn keep_local_delete_on_remote_failure(&self) -> bool {
        true
    }
}

/// Result of an outbound push pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub pushed: usize,
    pub failed: usize,
    pub already_mirrored: usize,
}

/// Outcome of restoring a soft-deleted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Remote counterpart still present; nothing to re-upload.
    RemoteIntact,
    /// Remote copy was gone; re-uploaded from locally retained bytes.
    Reuploaded { remote_id: String },
    /// Remote copy gone and no local bytes available.
    RestoredUnmirrored,
}

/// Coordinates the local store with the remote mirror for one folder.
pub struct SyncCoordinator {
    store: Arc<dyn LoanStore>,
    mirror: Arc<dyn MirrorStore>,
    backoff: BackoffPolicy,
    policy: LocalAuthoritative,
    folder: String,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn LoanStore>,
        mirror: Arc<dyn MirrorStore>,
        backoff: BackoffPolicy,
        folder: &str,
    ) -> Self {
        Self {
            store,
            mirror,
            backoff,
            policy: LocalAuthoritative,
            folder: folder.to_string(),
        }
    }

    pub fn policy(&self) -> LocalAuthoritative {
        self.policy
    }

    /// Run one mirror call under the shared backoff policy.
    async fn with_backoff<T, Fut, Op>(
        &self,
        loan_id: &str,
        document: Option<&str>,
        op: Op,
    ) -> Result<Result<T, MirrorError>, SyncError>
    where
        Op: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, MirrorError>>,
    {
        let result = self
            .backoff
            .run(
                |e: &MirrorError| e.is_rate_limit(),
                |retry, delay| debug!("mirror backoff {:?} (retry {})", delay, retry + 1),
                op,
            )
            .await;
        match result {
            Err(MirrorError::RateLimited) => Err(SyncError::RateLimitExhausted {
                loan_id: loan_id.to_string(),
                document: document.map(|d| d.to_string()),
            }),
            other => Ok(other),
        }
    }

    /// Push every live local document that lacks a confirmed remote
    /// counterpart. A failed upload leaves the remote reference unset so the
    /// next pass retries it.
    pub async fn push(&self, loan_id: &str) -> Result<PushReport, SyncError> {
        let documents = self.store.list_documents(loan_id)?;
        let mut report = PushReport::default();

        for mut doc in documents.into_iter().filter(|d| d.is_live()) {
            if doc.is_mirrored() {
                report.already_mirrored += 1;
                continue;
            }

            let bytes = match std::fs::read(&doc.source_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("cannot read local bytes for {}: {}", doc.id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let upload = self
                .with_backoff(loan_id, Some(&doc.id), || {
                    self.mirror
                        .upload(&doc.name, &bytes, &doc.mime_type, &self.folder)
                })
                .await?;

            match upload {
                Ok(remote_id) => {
                    doc.remote_id = Some(remote_id);
                    self.store.save_document(&doc)?;
                    report.pushed += 1;
                }
                Err(e) => {
                    // Remote reference stays unset; retried on the next pass.
                    warn!("remote sync failure pushing {}: {}", doc.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "push for loan {}: {} uploaded, {} failed, {} already mirrored",
            loan_id, report.pushed, report.failed, report.already_mirrored
        );
        Ok(report)
    }

    /// Soft-delete a document locally, then best-effort delete its remote
    /// counterpart. The local soft-delete stands even if the remote call
    /// fails.
    pub async fn soft_delete(&self, loan_id: &str, document_id: &str) -> Result<(), SyncError> {
        let mut doc = self
            .store
            .get_document(loan_id, document_id)?
            .ok_or_else(|| StoreError::DocumentNotFound {
                loan_id: loan_id.to_string(),
                document_id: document_id.to_string(),
            })?;

        doc.deleted = true;
        self.store.save_document(&doc)?;

        if let Some(remote_id) = doc.remote_id.clone() {
            match self
                .with_backoff(loan_id, Some(&doc.id), || self.mirror.delete(&remote_id))
                .await
            {
                Ok(Ok(())) => {
                    doc.remote_id = None;
                    self.store.save_document(&doc)?;
                }
                Ok(Err(e)) => {
                    debug_assert!(self.policy.keep_local_delete_on_remote_failure());
                    warn!(
                        "remote sync failure deleting {} for {}: {} (local delete stands)",
                        remote_id, doc.id, e
                    );
                }
                Err(e) => {
                    warn!(
                        "rate limit exhausted deleting remote counterpart of {}: {} (local delete stands)",
                        doc.id, e
                    );
                }
            }
        }
        Ok(())
    }

    /// Propagate local soft-deletes to the mirror, best-effort.
    pub async fn propagate_deletions(&self, loan_id: &str) -> Result<usize, SyncError> {
        let documents = self.store.list_documents(loan_id)?;
        let mut deleted = 0;

        for mut doc in documents.into_iter().filter(|d| d.deleted) {
            let Some(remote_id) = doc.remote_id.clone() else {
                continue;
            };
            match self
                .with_backoff(loan_id, Some(&doc.id), || self.mirror.delete(&remote_id))
                .await?
            {
                Ok(()) => {
                    doc.remote_id = None;
                    self.store.save_document(&doc)?;
                    deleted += 1;
                }
                Err(e) => {
                    warn!("remote sync failure deleting {}: {} (will retry)", remote_id, e);
                }
            }
        }
        Ok(deleted)
    }

    /// Restore a soft-deleted document.
    ///
    /// Re-checks remote existence; if the counterpart is gone, re-uploads
    /// from locally retained bytes when possible, otherwise the document
    /// comes back unmirrored.
    pub async fn restore(
        &self,
        loan_id: &str,
        document_id: &str,
    ) -> Result<RestoreOutcome, SyncError> {
        let mut doc = self
            .store
            .get_document(loan_id, document_id)?
            .ok_or_else(|| StoreError::DocumentNotFound {
                loan_id: loan_id.to_string(),
                document_id: document_id.to_string(),
            })?;

        doc.deleted = false;

        let remote_intact = match &doc.remote_id {
            Some(remote_id) => {
                let remote_id = remote_id.clone();
                self.with_backoff(loan_id, Some(&doc.id), || self.mirror.exists(&remote_id))
                    .await?
                    .unwrap_or(false)
            }
            None => false,
        };

        if remote_intact {
            self.store.save_document(&doc)?;
            return Ok(RestoreOutcome::RemoteIntact);
        }

        doc.remote_id = None;
        let outcome = match std::fs::read(&doc.source_path) {
            Ok(bytes) => {
                let upload = self
                    .with_backoff(loan_id, Some(&doc.id), || {
                        self.mirror
                            .upload(&doc.name, &bytes, &doc.mime_type, &self.folder)
                    })
                    .await?;
                match upload {
                    Ok(remote_id) => {
                        doc.remote_id = Some(remote_id.clone());
                        RestoreOutcome::Reuploaded { remote_id }
                    }
                    Err(e) => {
                        warn!("remote sync failure re-uploading {}: {}", doc.id, e);
                        RestoreOutcome::RestoredUnmirrored
                    }
                }
            }
            Err(e) => {
                warn!("no local bytes retained for {}: {}", doc.id, e);
                RestoreOutcome::RestoredUnmirrored
            }
        };

        self.store.save_document(&doc)?;
        Ok(outcome)
    }

    /// Opportunistic duplicate sweep over live documents.
    ///
    /// Groups by the exact key (normalized name, byte size, origin); within
    /// each group the earliest-uploaded document survives and the rest are
    /// soft-deleted. Exact matching only: documents differing in size or
    /// origin are never merged however similar their names.
    pub async fn dedup_pass(&self, loan_id: &str) -> Result<Vec<String>, SyncError> {
        let documents = self.store.list_documents(loan_id)?;

        let mut groups: BTreeMap<(String, u64, DocumentOrigin), Vec<Document>> = BTreeMap::new();
        for doc in documents.into_iter().filter(|d| d.is_live()) {
            let key = (normalize_name(&doc.name), doc.size_bytes, doc.origin);
            groups.entry(key).or_default().push(doc);
        }

        let mut removed = Vec::new();
        for (_key, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
            for mut dup in group.into_iter().skip(1) {
                info!("dedup: soft-deleting duplicate {} ({})", dup.id, dup.name);
                dup.deleted = true;
                self.store.save_document(&dup)?;
                removed.push(dup.id);
            }
        }
        Ok(removed)
    }

    /// Import mirror files the loan has never tracked.
    ///
    /// Local state is authoritative: any file matching a tracked document's
    /// remote reference or identity key is skipped, including soft-deleted
    /// ones, so a deletion is never undone by the mirror.
    pub async fn import_remote(
        &self,
        loan_id: &str,
        documents_dir: &std::path::Path,
    ) -> Result<Vec<Document>, SyncError> {
        let listing = match self
            .with_backoff(loan_id, None, || self.mirror.list(&self.folder))
            .await?
        {
            Ok(listing) => listing,
            Err(e) => {
                warn!("remote sync failure listing mirror folder: {}", e);
                return Ok(Vec::new());
            }
        };

        let local = self.store.list_documents(loan_id)?;
        let mut imported = Vec::new();

        for remote in listing {
            let tracked = local.iter().any(|d| {
                d.remote_id.as_deref() == Some(remote.id.as_str())
                    || (normalize_name(&d.name) == normalize_name(&remote.name)
                        && d.size_bytes == remote.size)
            });
            if !self.policy.admit_remote_file(tracked) {
                continue;
            }

            let bytes = match self
                .with_backoff(loan_id, Some(&remote.id), || {
                    self.mirror.download(&remote.id)
                })
                .await?
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("remote sync failure downloading {}: {}", remote.id, e);
                    continue;
                }
            };

            let path = save_content(documents_dir, &remote.name, &remote.mime_type, &bytes)?;
            let mut doc = Document::new(
                loan_id,
                &remote.name,
                classify::classify(&remote.name, ""),
                &remote.mime_type,
                path,
                DocumentOrigin::RemoteMirror,
                &bytes,
            );
            doc.remote_id = Some(remote.id);
            self.store.save_document(&doc)?;
            imported.push(doc);
        }

        Ok(imported)
    }

    /// Irreversible reset: hard-remove soft-deleted documents, their stored
    /// bytes, and their remote counterparts.
    pub async fn purge_deleted(&self, loan_id: &str) -> Result<usize, SyncError> {
        let documents = self.store.list_documents(loan_id)?;
        let mut purged = 0;

        for doc in documents.into_iter().filter(|d| d.deleted) {
            if let Some(remote_id) = &doc.remote_id {
                let remote_id = remote_id.clone();
                if let Ok(Err(e)) = self
                    .with_backoff(loan_id, Some(&doc.id), || self.mirror.delete(&remote_id))
                    .await
                {
                    warn!("remote sync failure purging {}: {}", remote_id, e);
                }
            }
            if let Err(e) = std::fs::remove_file(&doc.source_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove bytes for {}: {}", doc.id, e);
                }
            }
            self.store.remove_document(loan_id, &doc.id)?;
            purged += 1;
        }
        Ok(purged)
    }
}

/// Strip parenthesized duplicate suffixes like " (1)" before the extension.
pub fn normalize_name(name: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(?P<stem>.*?)\s*\(\d+\)(?P<ext>\.[A-Za-z0-9]+)?$").unwrap()
    });
    match re.captures(name) {
        Some(caps) => {
            let stem = caps.name("stem").map(|m| m.as_str()).unwrap_or("");
            let ext = caps.name("ext").map(|m| m.as_str()).unwrap_or("");
            format!("{}{}", stem, ext)
        }
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_strips_duplicate_suffix() {
        assert_eq!(normalize_name("appraisal (1).pdf"), "appraisal.pdf");
        assert_eq!(normalize_name("appraisal (12).pdf"), "appraisal.pdf");
        assert_eq!(normalize_name("appraisal(2).pdf"), "appraisal.pdf");
        assert_eq!(normalize_name("appraisal.pdf"), "appraisal.pdf");
    }

    #[test]
    fn test_normalize_name_keeps_meaningful_parentheses() {
        // Only a trailing numeric suffix is a duplicate marker.
        assert_eq!(normalize_name("report (final).pdf"), "report (final).pdf");
        assert_eq!(normalize_name("unit (3) notes (1).pdf"), "unit (3) notes.pdf");
    }

    #[test]
    fn test_local_authoritative_policy() {
        let policy = LocalAuthoritative;
        assert!(policy.admit_remote_file(false));
        assert!(!policy.admit_remote_file(true));
        assert!(policy.keep_local_delete_on_remote_failure());
    }
}
