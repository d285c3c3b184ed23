//! In-memory store for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::models::Document;

use super::{AssignmentMap, CompletionSet, LoanStore, StoreError};

#[derive(Default)]
struct LoanState {
    documents: Vec<Document>,
    assignments: AssignmentMap,
    completion: CompletionSet,
    custom_requirements: Vec<String>,
}

/// HashMap-backed store. Writes can be forced to fail to exercise the
/// engine's no-partial-mutation guarantee.
#[derive(Default)]
pub struct MemoryStore {
    loans: Mutex<HashMap<String, LoanState>>,
    fail_writes: AtomicBool,
    fail_after_writes: Mutex<Option<u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a persistence error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let the next `n` writes succeed, then fail the one after. Exercises
    /// partial-failure paths in multi-write operations.
    pub fn set_fail_after_writes(&self, n: Option<u32>) {
        *self.fail_after_writes.lock().unwrap() = n;
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Persistence("simulated write failure".to_string()));
        }
        let mut after = self.fail_after_writes.lock().unwrap();
        match *after {
            Some(0) => {
                *after = None;
                Err(StoreError::Persistence("simulated write failure".to_string()))
            }
            Some(n) => {
                *after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl LoanStore for MemoryStore {
    fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut loans = self.loans.lock().unwrap();
        let state = loans.entry(document.loan_id.clone()).or_default();
        match state.documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document.clone(),
            None => state.documents.push(document.clone()),
        }
        Ok(())
    }

    fn get_document(
        &self,
        loan_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let loans = self.loans.lock().unwrap();
        Ok(loans
            .get(loan_id)
            .and_then(|s| s.documents.iter().find(|d| d.id == document_id).cloned()))
    }

    fn list_documents(&self, loan_id: &str) -> Result<Vec<Document>, StoreError> {
        let loans = self.loans.lock().unwrap();
        Ok(loans
            .get(loan_id)
            .map(|s| s.documents.clone())
            .unwrap_or_default())
    }

    fn remove_document(&self, loan_id: &str, document_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut loans = self.loans.lock().unwrap();
        if let Some(state) = loans.get_mut(loan_id) {
            state.documents.retain(|d| d.id != document_id);
        }
        Ok(())
    }

    fn save_assignments(
        &self,
        loan_id: &str,
        assignments: &AssignmentMap,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut loans = self.loans.lock().unwrap();
        loans.entry(loan_id.to_string()).or_default().assignments = assignments.clone();
        Ok(())
    }

    fn load_assignments(&self, loan_id: &str) -> Result<AssignmentMap, StoreError> {
        let loans = self.loans.lock().unwrap();
        Ok(loans
            .get(loan_id)
            .map(|s| s.assignments.clone())
            .unwrap_or_default())
    }

    fn save_completion(&self, loan_id: &str, completion: &CompletionSet) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut loans = self.loans.lock().unwrap();
        loans.entry(loan_id.to_string()).or_default().completion = completion.clone();
        Ok(())
    }

    fn load_completion(&self, loan_id: &str) -> Result<CompletionSet, StoreError> {
        let loans = self.loans.lock().unwrap();
        Ok(loans
            .get(loan_id)
            .map(|s| s.completion.clone())
            .unwrap_or_default())
    }

    fn save_custom_requirements(&self, loan_id: &str, names: &[String]) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut loans = self.loans.lock().unwrap();
        loans
            .entry(loan_id.to_string())
            .or_default()
            .custom_requirements = names.to_vec();
        Ok(())
    }

    fn load_custom_requirements(&self, loan_id: &str) -> Result<Vec<String>, StoreError> {
        let loans = self.loans.lock().unwrap();
        Ok(loans
            .get(loan_id)
            .map(|s| s.custom_requirements.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentOrigin;
    use std::path::PathBuf;

    fn doc(loan_id: &str, name: &str) -> Document {
        Document::new(
            loan_id,
            name,
            "General Document",
            "application/pdf",
            PathBuf::from("/tmp/x"),
            DocumentOrigin::LocalUpload,
            b"bytes",
        )
    }

    #[test]
    fn test_save_and_list_documents() {
        let store = MemoryStore::new();
        let d = doc("loan-1", "a.pdf");
        store.save_document(&d).unwrap();
        let docs = store.list_documents("loan-1").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, d.id);
    }

    #[test]
    fn test_save_updates_in_place() {
        let store = MemoryStore::new();
        let mut d = doc("loan-1", "a.pdf");
        store.save_document(&d).unwrap();
        d.deleted = true;
        store.save_document(&d).unwrap();
        let docs = store.list_documents("loan-1").unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].deleted);
    }

    #[test]
    fn test_fail_after_writes_fires_once() {
        let store = MemoryStore::new();
        store.set_fail_after_writes(Some(1));
        store.save_document(&doc("loan-1", "a.pdf")).unwrap();
        let err = store.save_document(&doc("loan-1", "b.pdf")).unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
        // One-shot: subsequent writes go through again.
        store.save_document(&doc("loan-1", "c.pdf")).unwrap();
    }

    #[test]
    fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store.save_document(&doc("loan-1", "a.pdf")).unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
        assert!(store.list_documents("loan-1").unwrap().is_empty());
    }
}
