//! Prompt templates for the two analysis stages.

use crate::models::AnalyzedDocument;

/// Prompt for the per-document extraction stage.
pub const PER_DOCUMENT_PROMPT: &str = r#"You are analyzing one document from a real-estate loan file. Extract structured information from it.

Respond with ONLY a JSON object matching this schema:
{
  "document_type": "the kind of document this is (e.g. Appraisal Report, Insurance Policy, Bank Statements)",
  "fields": {
    "any structured fields you can extract": "values (names, amounts, dates, addresses, policy numbers)"
  }
}

Rules:
1. Extract only what the document actually states; never invent values.
2. Use plain strings and numbers for field values.
3. If the document is unreadable, return {"document_type": "", "fields": {}}.

Document Name: {name}

Document Content:
{content}"#;

/// Prompt for the consolidation stage.
pub const CONSOLIDATION_PROMPT: &str = r#"You are reviewing the extracted contents of an entire real-estate loan file. Consolidate them into one summary.

Respond with ONLY a JSON object matching this schema:
{
  "loan": {"borrower_name": null, "entity_name": null, "loan_amount": null, "loan_type": null, "funder": null, "target_close_date": null},
  "property": {"address": null, "city": null, "state": null, "zip": null, "property_type": null, "purchase_price": null},
  "contacts": [{"name": "", "role": null, "email": null, "phone": null}],
  "tasks": [{"title": "", "details": null}],
  "missing_documents": ["names of standard loan-file documents NOT present in the list below"]
}

Rules:
1. Prefer values that appear consistently across multiple documents.
2. Use null for anything the documents do not establish.
3. missing_documents should name common checklist items (appraisal, insurance, title report, payoff, entity documents, bank statements) absent from the file.

Documents:
{documents}"#;

/// Build the per-document prompt.
pub fn per_document_prompt(name: &str, content: &str) -> String {
    PER_DOCUMENT_PROMPT
        .replace("{name}", name)
        .replace("{content}", content)
}

/// Build the consolidation prompt from the stage-one results.
pub fn consolidation_prompt(documents: &[AnalyzedDocument]) -> String {
    let listing = serde_json::to_string_pretty(documents).unwrap_or_else(|_| "[]".to_string());
    CONSOLIDATION_PROMPT.replace("{documents}", &listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_document_prompt_substitution() {
        let prompt = per_document_prompt("appraisal.pdf", "subject property at 123 Main St");
        assert!(prompt.contains("appraisal.pdf"));
        assert!(prompt.contains("123 Main St"));
        assert!(!prompt.contains("{name}"));
        assert!(!prompt.contains("{content}"));
    }

    #[test]
    fn test_consolidation_prompt_embeds_documents() {
        let docs = vec![AnalyzedDocument {
            name: "policy.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 42,
            document_type: "Insurance Policy".to_string(),
            fields: serde_json::Map::new(),
        }];
        let prompt = consolidation_prompt(&docs);
        assert!(prompt.contains("policy.pdf"));
        assert!(prompt.contains("Insurance Policy"));
    }
}
