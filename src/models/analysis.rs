//! Structured analysis results from the language-model service.
//!
//! The service returns JSON constrained to these shapes. Every field is
//! defaulted so a partially-filled response still deserializes; validation
//! and coercion happen here at the boundary rather than deeper in the
//! pipeline. Results are advisory seeds, never persisted verbatim.

use serde::{Deserialize, Serialize};

/// Structured fields extracted from a single document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    /// Document-type label the service assigned.
    #[serde(default)]
    pub document_type: String,
    /// Free-form extracted fields (borrower name, loan amount, dates, ...).
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Loan-level candidate fields from the consolidation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoanInfo {
    #[serde(default)]
    pub borrower_name: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub loan_amount: Option<f64>,
    #[serde(default)]
    pub loan_type: Option<String>,
    #[serde(default)]
    pub funder: Option<String>,
    #[serde(default)]
    pub target_close_date: Option<String>,
}

/// Property-level candidate fields from the consolidation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyInfo {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
}

/// A contact mentioned across the loan file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactCandidate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A follow-up task the service suggested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCandidate {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub details: Option<String>,
}

/// Consolidated result of a batch analysis run.
///
/// Ephemeral: consumed to seed loan entities and then discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchAnalysis {
    #[serde(default)]
    pub loan: LoanInfo,
    #[serde(default)]
    pub property: PropertyInfo,
    #[serde(default)]
    pub contacts: Vec<ContactCandidate>,
    #[serde(default)]
    pub tasks: Vec<TaskCandidate>,
    /// Requirement display names the service believes are still missing.
    #[serde(default)]
    pub missing_documents: Vec<String>,
}

/// Per-document record collected during the first analysis stage and fed
/// into the consolidation call.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedDocument {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub document_type: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_analysis_tolerates_sparse_json() {
        // A response missing most keys must still deserialize with defaults.
        let parsed: BatchAnalysis =
            serde_json::from_str(r#"{"loan": {"borrower_name": "Jane Doe"}}"#).unwrap();
        assert_eq!(parsed.loan.borrower_name.as_deref(), Some("Jane Doe"));
        assert!(parsed.contacts.is_empty());
        assert!(parsed.missing_documents.is_empty());
    }

    #[test]
    fn test_document_analysis_defaults() {
        let parsed: DocumentAnalysis = serde_json::from_str("{}").unwrap();
        assert!(parsed.document_type.is_empty());
        assert!(parsed.fields.is_empty());
    }
}
