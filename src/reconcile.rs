//! Per-loan reconciliation of documents against the requirement checklist.
//!
//! A `LoanSession` owns the immutable requirement set resolved at loan-open
//! time plus the loan's mutable assignment and completion state. Assignment
//! tracks *evidence* (which documents back a slot); completion tracks
//! *disposition* (an explicit "this is satisfied"). The two are independent
//! on purpose: a requirement can be marked complete with no document, or
//! hold documents without being marked complete.
//!
//! Every mutation persists before it commits to memory, so a persistence
//! failure leaves the in-memory session exactly as it was. Callers serialize
//! operations per loan; the session has no internal locking.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::models::{RequirementCategory, RequirementDefinition, RequirementSet};
use crate::store::{AssignmentMap, CompletionSet, LoanStore, StoreError};

/// Errors from reconciliation operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("unknown requirement '{requirement}' for loan {loan_id}")]
    UnknownRequirement {
        loan_id: String,
        requirement: String,
    },

    #[error("requirement '{requirement}' already exists for loan {loan_id}")]
    DuplicateRequirement {
        loan_id: String,
        requirement: String,
    },

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// Checklist completion rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSummary {
    pub total_required: usize,
    pub total_satisfied: usize,
    /// round(100 * satisfied_required / total_required); 0 when nothing is
    /// required.
    pub percentage: u32,
}

/// One loan's reconciliation state.
pub struct LoanSession {
    loan_id: String,
    requirement_set: RequirementSet,
    custom_requirements: Vec<String>,
    assignments: AssignmentMap,
    completion: CompletionSet,
    store: Arc<dyn LoanStore>,
}

impl LoanSession {
    /// Open a session, loading persisted state for the loan.
    pub fn open(
        loan_id: &str,
        requirement_set: RequirementSet,
        store: Arc<dyn LoanStore>,
    ) -> Result<Self, ReconcileError> {
        let assignments = store.load_assignments(loan_id)?;
        let completion = store.load_completion(loan_id)?;
        let custom_requirements = store.load_custom_requirements(loan_id)?;
        Ok(Self {
            loan_id: loan_id.to_string(),
            requirement_set,
            custom_requirements,
            assignments,
            completion,
            store,
        })
    }

    pub fn loan_id(&self) -> &str {
        &self.loan_id
    }

    /// The active checklist: catalog set plus loan-scoped custom slots.
    pub fn active_requirements(&self) -> Vec<RequirementDefinition> {
        let mut defs = self.requirement_set.definitions.clone();
        for name in &self.custom_requirements {
            defs.push(
                RequirementDefinition::new(name, name, RequirementCategory::Custom, true),
            );
        }
        defs
    }

    fn has_requirement(&self, name: &str) -> bool {
        self.requirement_set.contains(name)
            || self.custom_requirements.iter().any(|n| n == name)
    }

    fn ensure_requirement(&self, name: &str) -> Result<(), ReconcileError> {
        if self.has_requirement(name) {
            Ok(())
        } else {
            Err(ReconcileError::UnknownRequirement {
                loan_id: self.loan_id.clone(),
                requirement: name.to_string(),
            })
        }
    }

    /// Assign a document to a requirement slot. Idempotent; a document may
    /// be assigned to any number of slots.
    pub fn assign(&mut self, requirement: &str, document_id: &str) -> Result<(), ReconcileError> {
        self.ensure_requirement(requirement)?;
        let mut next = self.assignments.clone();
        next.entry(requirement.to_string())
            .or_insert_with(BTreeSet::new)
            .insert(document_id.to_string());
        self.store.save_assignments(&self.loan_id, &next)?;
        self.assignments = next;
        debug!("assigned {} -> '{}'", document_id, requirement);
        Ok(())
    }

    /// Remove a document from a requirement slot. No-op if absent.
    pub fn unassign(&mut self, requirement: &str, document_id: &str) -> Result<(), ReconcileError> {
        self.ensure_requirement(requirement)?;
        let mut next = self.assignments.clone();
        if let Some(set) = next.get_mut(requirement) {
            set.remove(document_id);
            if set.is_empty() {
                next.remove(requirement);
            }
        }
        self.store.save_assignments(&self.loan_id, &next)?;
        self.assignments = next;
        Ok(())
    }

    /// Documents currently assigned to a slot.
    pub fn assigned(&self, requirement: &str) -> Vec<&str> {
        self.assignments
            .get(requirement)
            .map(|set| set.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Mark a requirement complete independent of evidence.
    pub fn mark_complete(&mut self, requirement: &str) -> Result<(), ReconcileError> {
        self.ensure_requirement(requirement)?;
        let mut next = self.completion.clone();
        next.insert(requirement.to_string());
        self.store.save_completion(&self.loan_id, &next)?;
        self.completion = next;
        Ok(())
    }

    /// Clear the explicit completion mark.
    pub fn unmark_complete(&mut self, requirement: &str) -> Result<(), ReconcileError> {
        self.ensure_requirement(requirement)?;
        let mut next = self.completion.clone();
        next.remove(requirement);
        self.store.save_completion(&self.loan_id, &next)?;
        self.completion = next;
        Ok(())
    }

    pub fn is_marked_complete(&self, requirement: &str) -> bool {
        self.completion.contains(requirement)
    }

    /// Add a loan-scoped custom requirement. The catalog is untouched.
    pub fn add_custom_requirement(&mut self, name: &str) -> Result<(), ReconcileError> {
        if self.has_requirement(name) {
            return Err(ReconcileError::DuplicateRequirement {
                loan_id: self.loan_id.clone(),
                requirement: name.to_string(),
            });
        }
        let mut next = self.custom_requirements.clone();
        next.push(name.to_string());
        self.store.save_custom_requirements(&self.loan_id, &next)?;
        self.custom_requirements = next;
        Ok(())
    }

    /// Remove a custom requirement along with its assignment and completion
    /// entries.
    pub fn remove_custom_requirement(&mut self, name: &str) -> Result<(), ReconcileError> {
        if !self.custom_requirements.iter().any(|n| n == name) {
            return Err(ReconcileError::UnknownRequirement {
                loan_id: self.loan_id.clone(),
                requirement: name.to_string(),
            });
        }

        let mut next_customs = self.custom_requirements.clone();
        next_customs.retain(|n| n != name);
        let mut next_assignments = self.assignments.clone();
        next_assignments.remove(name);
        let mut next_completion = self.completion.clone();
        next_completion.remove(name);

        // Customs first: if a later write fails, the persisted leftover is an
        // assignment or completion entry for a name no rollup resolves, and a
        // retry clears it. Clearing assignments first could leave evidence
        // gone while the slot survives.
        self.store
            .save_custom_requirements(&self.loan_id, &next_customs)?;
        self.store.save_assignments(&self.loan_id, &next_assignments)?;
        self.store.save_completion(&self.loan_id, &next_completion)?;

        self.assignments = next_assignments;
        self.completion = next_completion;
        self.custom_requirements = next_customs;
        Ok(())
    }

    /// Whether a slot is satisfied: at least one live assigned document, or
    /// explicitly marked complete.
    fn is_satisfied(&self, requirement: &str, live_document_ids: &BTreeSet<String>) -> bool {
        if self.completion.contains(requirement) {
            return true;
        }
        self.assignments
            .get(requirement)
            .map(|docs| docs.iter().any(|id| live_document_ids.contains(id)))
            .unwrap_or(false)
    }

    /// Compute the completion rollup over required slots.
    pub fn completion_summary(&self) -> Result<CompletionSummary, ReconcileError> {
        let live_ids: BTreeSet<String> = self
            .store
            .list_documents(&self.loan_id)?
            .into_iter()
            .filter(|d| d.is_live())
            .map(|d| d.id)
            .collect();

        let required: Vec<RequirementDefinition> = self
            .active_requirements()
            .into_iter()
            .filter(|d| d.required)
            .collect();

        let total_required = required.len();
        let total_satisfied = required
            .iter()
            .filter(|d| self.is_satisfied(&d.display_name, &live_ids))
            .count();

        let percentage = if total_required == 0 {
            0
        } else {
            ((100.0 * total_satisfied as f64) / total_required as f64).round() as u32
        };

        Ok(CompletionSummary {
            total_required,
            total_satisfied,
            percentage,
        })
    }

    /// Required slots that are still unsatisfied.
    pub fn missing_requirements(&self) -> Result<Vec<RequirementDefinition>, ReconcileError> {
        let live_ids: BTreeSet<String> = self
            .store
            .list_documents(&self.loan_id)?
            .into_iter()
            .filter(|d| d.is_live())
            .map(|d| d.id)
            .collect();

        Ok(self
            .active_requirements()
            .into_iter()
            .filter(|d| d.required && !self.is_satisfied(&d.display_name, &live_ids))
            .collect())
    }

    /// Seed assignments from advisory analysis output.
    ///
    /// Each candidate is (requirement display name, document id). Only slots
    /// with no live evidence and no completion mark are filled; manual edits
    /// are never overwritten. Unknown requirement names are skipped, not
    /// errors, since analysis output is advisory. Returns the slots filled.
    pub fn seed_assignments(
        &mut self,
        candidates: &[(String, String)],
    ) -> Result<Vec<String>, ReconcileError> {
        let live_ids: BTreeSet<String> = self
            .store
            .list_documents(&self.loan_id)?
            .into_iter()
            .filter(|d| d.is_live())
            .map(|d| d.id)
            .collect();

        let mut next = self.assignments.clone();
        let mut filled = Vec::new();
        for (requirement, document_id) in candidates {
            if !self.has_requirement(requirement) {
                debug!("skipping advisory candidate for unknown slot '{}'", requirement);
                continue;
            }
            if self.is_satisfied(requirement, &live_ids) {
                continue;
            }
            if filled.contains(requirement) {
                continue;
            }
            next.entry(requirement.clone())
                .or_insert_with(BTreeSet::new)
                .insert(document_id.clone());
            filled.push(requirement.clone());
        }

        if filled.is_empty() {
            return Ok(filled);
        }

        self.store.save_assignments(&self.loan_id, &next)?;
        self.assignments = next;
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RequirementCatalog;
    use crate::models::{Document, DocumentOrigin};
    use crate::store::MemoryStore;
    use std::path::PathBuf;

    fn session_with_store() -> (LoanSession, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let catalog = RequirementCatalog::builtin().unwrap();
        let session = LoanSession::open(
            "loan-1",
            catalog.requirement_set("kiavi"),
            store.clone(),
        )
        .unwrap();
        (session, store)
    }

    fn live_doc(store: &MemoryStore, name: &str) -> Document {
        let doc = Document::new(
            "loan-1",
            name,
            "General Document",
            "application/pdf",
            PathBuf::from("/tmp/x"),
            DocumentOrigin::LocalUpload,
            name.as_bytes(),
        );
        store.save_document(&doc).unwrap();
        doc
    }

    #[test]
    fn test_zero_documents_summary() {
        let (session, _store) = session_with_store();
        let summary = session.completion_summary().unwrap();
        assert_eq!(summary.total_satisfied, 0);
        // Base required + kiavi overlay required.
        let catalog = RequirementCatalog::builtin().unwrap();
        assert_eq!(
            summary.total_required,
            catalog.requirement_set("kiavi").required_count()
        );
        assert_eq!(summary.percentage, 0);
    }

    #[test]
    fn test_percentage_zero_when_nothing_required() {
        let store = Arc::new(MemoryStore::new());
        let empty_set = RequirementSet {
            funder_id: "none".to_string(),
            definitions: Vec::new(),
        };
        let session = LoanSession::open("loan-1", empty_set, store).unwrap();
        let summary = session.completion_summary().unwrap();
        assert_eq!(summary.total_required, 0);
        assert_eq!(summary.percentage, 0); // not NaN
    }

    #[test]
    fn test_assign_unassign_round_trip() {
        let (mut session, store) = session_with_store();
        let doc = live_doc(&store, "appraisal.pdf");

        let before = session.assignments.clone();
        session.assign("Appraisal Report", &doc.id).unwrap();
        // Idempotent add.
        session.assign("Appraisal Report", &doc.id).unwrap();
        assert_eq!(session.assigned("Appraisal Report"), vec![doc.id.as_str()]);

        session.unassign("Appraisal Report", &doc.id).unwrap();
        assert_eq!(session.assignments, before);
        // Unassign of an absent pair is a no-op.
        session.unassign("Appraisal Report", &doc.id).unwrap();
        assert_eq!(session.assignments, before);
    }

    #[test]
    fn test_document_may_back_multiple_slots() {
        let (mut session, store) = session_with_store();
        let doc = live_doc(&store, "combined.pdf");
        session.assign("Title Report", &doc.id).unwrap();
        session.assign("Title Commitment", &doc.id).unwrap();
        assert_eq!(session.assigned("Title Report"), vec![doc.id.as_str()]);
        assert_eq!(session.assigned("Title Commitment"), vec![doc.id.as_str()]);
    }

    #[test]
    fn test_mark_complete_without_evidence_counts() {
        let (mut session, _store) = session_with_store();
        let before = session.completion_summary().unwrap();
        session.mark_complete("Appraisal Report").unwrap();
        let after = session.completion_summary().unwrap();
        assert_eq!(after.total_satisfied, before.total_satisfied + 1);

        session.unmark_complete("Appraisal Report").unwrap();
        let reverted = session.completion_summary().unwrap();
        assert_eq!(reverted.total_satisfied, before.total_satisfied);
    }

    #[test]
    fn test_soft_deleted_document_does_not_satisfy() {
        let (mut session, store) = session_with_store();
        let mut doc = live_doc(&store, "insurance.pdf");
        session.assign("Insurance Policy", &doc.id).unwrap();
        let with_doc = session.completion_summary().unwrap();

        doc.deleted = true;
        store.save_document(&doc).unwrap();
        let after_delete = session.completion_summary().unwrap();
        assert_eq!(after_delete.total_satisfied, with_doc.total_satisfied - 1);
    }

    #[test]
    fn test_unknown_requirement_rejected() {
        let (mut session, _store) = session_with_store();
        let err = session.assign("No Such Slot", "doc-1").unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownRequirement { .. }));
    }

    #[test]
    fn test_custom_requirement_lifecycle() {
        let (mut session, store) = session_with_store();
        session.add_custom_requirement("HOA Estoppel Letter").unwrap();
        // Participates like any slot.
        let doc = live_doc(&store, "hoa.pdf");
        session.assign("HOA Estoppel Letter", &doc.id).unwrap();
        session.mark_complete("HOA Estoppel Letter").unwrap();

        // Duplicate names rejected, including catalog collisions.
        assert!(matches!(
            session.add_custom_requirement("HOA Estoppel Letter"),
            Err(ReconcileError::DuplicateRequirement { .. })
        ));
        assert!(matches!(
            session.add_custom_requirement("Title Report"),
            Err(ReconcileError::DuplicateRequirement { .. })
        ));

        // Removal clears assignment and completion entries.
        session.remove_custom_requirement("HOA Estoppel Letter").unwrap();
        assert!(session.assigned("HOA Estoppel Letter").is_empty());
        assert!(!session.is_marked_complete("HOA Estoppel Letter"));
        assert!(store
            .load_assignments("loan-1")
            .unwrap()
            .get("HOA Estoppel Letter")
            .is_none());
    }

    #[test]
    fn test_persistence_failure_leaves_memory_unchanged() {
        let (mut session, store) = session_with_store();
        let doc = live_doc(&store, "appraisal.pdf");
        session.assign("Appraisal Report", &doc.id).unwrap();
        let before = session.assignments.clone();

        store.set_fail_writes(true);
        let err = session.assign("Title Report", &doc.id).unwrap_err();
        assert!(matches!(err, ReconcileError::Persistence(_)));
        assert_eq!(session.assignments, before);

        store.set_fail_writes(false);
        session.assign("Title Report", &doc.id).unwrap();
        assert_ne!(session.assignments, before);
    }

    #[test]
    fn test_custom_removal_partial_failure_is_retryable() {
        let (mut session, store) = session_with_store();
        session.add_custom_requirement("Survey").unwrap();
        let doc = live_doc(&store, "survey.pdf");
        session.assign("Survey", &doc.id).unwrap();
        session.mark_complete("Survey").unwrap();

        // Custom row write goes through, the assignments write fails.
        store.set_fail_after_writes(Some(1));
        let err = session.remove_custom_requirement("Survey").unwrap_err();
        assert!(matches!(err, ReconcileError::Persistence(_)));

        // In-memory state untouched; the persisted leftover is evidence for
        // a slot nothing resolves, never a slot with its evidence cleared.
        assert!(session.active_requirements().iter().any(|d| d.display_name == "Survey"));
        assert_eq!(session.assigned("Survey"), vec![doc.id.as_str()]);
        let persisted = store.load_assignments("loan-1").unwrap();
        assert!(persisted.get("Survey").is_some());
        assert!(store.load_custom_requirements("loan-1").unwrap().is_empty());

        // Retry self-heals.
        session.remove_custom_requirement("Survey").unwrap();
        assert!(session.assigned("Survey").is_empty());
        assert!(store.load_assignments("loan-1").unwrap().get("Survey").is_none());
        assert!(!session.is_marked_complete("Survey"));
    }

    #[test]
    fn test_seed_assignments_never_overwrites_manual_state() {
        let (mut session, store) = session_with_store();
        let manual = live_doc(&store, "my-appraisal.pdf");
        let auto = live_doc(&store, "auto-appraisal.pdf");
        session.assign("Appraisal Report", &manual.id).unwrap();
        session.mark_complete("Payoff Statement").unwrap();

        let filled = session
            .seed_assignments(&[
                ("Appraisal Report".to_string(), auto.id.clone()),
                ("Payoff Statement".to_string(), auto.id.clone()),
                ("Title Report".to_string(), auto.id.clone()),
                ("Unknown Slot".to_string(), auto.id.clone()),
            ])
            .unwrap();

        // Only the genuinely empty slot was filled.
        assert_eq!(filled, vec!["Title Report".to_string()]);
        assert_eq!(session.assigned("Appraisal Report"), vec![manual.id.as_str()]);
        assert_eq!(session.assigned("Title Report"), vec![auto.id.as_str()]);
    }
}
