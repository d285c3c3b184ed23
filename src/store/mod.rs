//! Persistence layer for loan documents and reconciliation state.
//!
//! The reconciliation engine only sees the `LoanStore` trait; each write is
//! atomic per entity. `MemoryStore` backs tests and `SqliteStore` is the
//! default on-disk backend. Document bytes live outside the store,
//! content-addressed on disk (see `content`).

mod content;
mod memory;
mod sqlite;

pub use content::{content_storage_path, mime_to_extension, sanitize_filename, save_content};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::models::Document;

/// Requirement display name -> assigned document ids.
pub type AssignmentMap = BTreeMap<String, BTreeSet<String>>;

/// Requirement display names explicitly marked complete.
pub type CompletionSet = BTreeSet<String>;

/// Persistence failures. Surfaced to callers without partial state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("document {document_id} not found for loan {loan_id}")]
    DocumentNotFound {
        loan_id: String,
        document_id: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage contract for one loan's documents and reconciliation state.
///
/// Operations are synchronous: the engine mutates in memory only after the
/// corresponding write succeeds, and callers serialize access per loan.
pub trait LoanStore: Send + Sync {
    // Documents
    fn save_document(&self, document: &Document) -> Result<(), StoreError>;
    fn get_document(&self, loan_id: &str, document_id: &str)
        -> Result<Option<Document>, StoreError>;
    fn list_documents(&self, loan_id: &str) -> Result<Vec<Document>, StoreError>;
    /// Hard removal; only the explicit purge path calls this.
    fn remove_document(&self, loan_id: &str, document_id: &str) -> Result<(), StoreError>;

    // Reconciliation state
    fn save_assignments(&self, loan_id: &str, assignments: &AssignmentMap)
        -> Result<(), StoreError>;
    fn load_assignments(&self, loan_id: &str) -> Result<AssignmentMap, StoreError>;
    fn save_completion(&self, loan_id: &str, completion: &CompletionSet)
        -> Result<(), StoreError>;
    fn load_completion(&self, loan_id: &str) -> Result<CompletionSet, StoreError>;
    fn save_custom_requirements(&self, loan_id: &str, names: &[String])
        -> Result<(), StoreError>;
    fn load_custom_requirements(&self, loan_id: &str) -> Result<Vec<String>, StoreError>;
}
