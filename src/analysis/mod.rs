//! Batch analysis of loan documents via the language-model service.
//!
//! Two-stage protocol: one structured-extraction call per document (run
//! concurrently), then exactly one consolidation call over the collected
//! results. Both stages share the injected backoff policy; exhausting the
//! rate-limit budget is fatal to the current request only. There is no
//! degraded heuristic fallback: extraction quality is preferred over
//! availability.

mod prompts;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::llm::{LanguageModel, LlmError, StructuredRequest};
use crate::models::{AnalyzedDocument, BatchAnalysis, DocumentAnalysis};
use crate::retry::BackoffPolicy;

pub use prompts::{CONSOLIDATION_PROMPT, PER_DOCUMENT_PROMPT};

/// Which stage of the protocol an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    PerDocument,
    Consolidation,
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerDocument => write!(f, "per-document extraction"),
            Self::Consolidation => write!(f, "consolidation"),
        }
    }
}

/// Errors from batch analysis, with enough context to retry or alert.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("rate limit budget exhausted during {stage} for loan {loan_id} (document: {document:?})")]
    RateLimitExhausted {
        loan_id: String,
        document: Option<String>,
        stage: AnalysisStage,
    },

    #[error("analysis service error during {stage} for loan {loan_id} (document: {document:?}): {source}")]
    Service {
        loan_id: String,
        document: Option<String>,
        stage: AnalysisStage,
        #[source]
        source: LlmError,
    },
}

/// One document's input to a batch run.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Locally classified type label, used when the service omits one.
    pub category: String,
    pub text: String,
}

/// Temperature for extraction calls; low for stable structured output.
const EXTRACTION_TEMPERATURE: f32 = 0.1;
/// Token ceilings per stage.
const PER_DOCUMENT_MAX_TOKENS: u32 = 1024;
const CONSOLIDATION_MAX_TOKENS: u32 = 2048;

/// Runs the two-stage analysis protocol.
pub struct AnalysisAggregator {
    model: Arc<dyn LanguageModel>,
    backoff: BackoffPolicy,
    /// Per-document text ceiling applied before prompt inclusion.
    max_doc_chars: usize,
    /// Backoff delays observed during the most recent run.
    recorded_backoffs: Mutex<Vec<Duration>>,
}

impl AnalysisAggregator {
    pub fn new(model: Arc<dyn LanguageModel>, backoff: BackoffPolicy) -> Self {
        Self {
            model,
            backoff,
            max_doc_chars: 8000,
            recorded_backoffs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_doc_chars(mut self, max_doc_chars: usize) -> Self {
        self.max_doc_chars = max_doc_chars;
        self
    }

    /// Backoff delays recorded during the most recent batch run.
    pub fn last_backoff_delays(&self) -> Vec<Duration> {
        self.recorded_backoffs.lock().unwrap().clone()
    }

    /// Analyze a single document, returning its structured fields.
    pub async fn analyze_document(
        &self,
        loan_id: &str,
        input: &DocumentInput,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        let prompt = prompts::per_document_prompt(
            &input.name,
            crate::llm::truncate_at_boundary(&input.text, self.max_doc_chars),
        );
        let value = self
            .call_model(
                loan_id,
                Some(&input.name),
                AnalysisStage::PerDocument,
                StructuredRequest {
                    prompt,
                    temperature: EXTRACTION_TEMPERATURE,
                    max_tokens: PER_DOCUMENT_MAX_TOKENS,
                },
            )
            .await?;

        let mut analysis: DocumentAnalysis =
            serde_json::from_value(value).unwrap_or_default();
        if analysis.document_type.is_empty() {
            analysis.document_type = input.category.clone();
        }
        Ok(analysis)
    }

    /// Run the full two-stage batch analysis.
    ///
    /// Per-document calls run concurrently; the consolidation call waits for
    /// all of them (a join point). The result is advisory: callers must not
    /// let it overwrite manual assignment or completion edits.
    pub async fn analyze_batch(
        &self,
        loan_id: &str,
        documents: &[DocumentInput],
    ) -> Result<BatchAnalysis, AnalysisError> {
        self.recorded_backoffs.lock().unwrap().clear();

        info!(
            "analyzing batch of {} documents for loan {}",
            documents.len(),
            loan_id
        );

        // Stage 1: per-document extraction, concurrent.
        let per_doc = futures::future::join_all(
            documents
                .iter()
                .map(|input| self.analyze_document(loan_id, input)),
        )
        .await;

        let mut analyzed = Vec::with_capacity(documents.len());
        for (input, result) in documents.iter().zip(per_doc) {
            let analysis = result?;
            analyzed.push(AnalyzedDocument {
                name: input.name.clone(),
                mime_type: input.mime_type.clone(),
                size_bytes: input.size_bytes,
                document_type: analysis.document_type,
                fields: analysis.fields,
            });
        }

        // Stage 2: exactly one consolidation call over the collection.
        let prompt = prompts::consolidation_prompt(&analyzed);
        let value = self
            .call_model(
                loan_id,
                None,
                AnalysisStage::Consolidation,
                StructuredRequest {
                    prompt,
                    temperature: EXTRACTION_TEMPERATURE,
                    max_tokens: CONSOLIDATION_MAX_TOKENS,
                },
            )
            .await?;

        let batch: BatchAnalysis = serde_json::from_value(value).unwrap_or_default();
        debug!(
            "consolidation produced {} contacts, {} tasks, {} missing documents",
            batch.contacts.len(),
            batch.tasks.len(),
            batch.missing_documents.len()
        );
        Ok(batch)
    }

    /// Issue one model call under the shared backoff policy, mapping errors
    /// into the analysis taxonomy.
    async fn call_model(
        &self,
        loan_id: &str,
        document: Option<&str>,
        stage: AnalysisStage,
        request: StructuredRequest,
    ) -> Result<serde_json::Value, AnalysisError> {
        let result = self
            .backoff
            .run(
                |e: &LlmError| e.is_rate_limit(),
                |_, delay| self.recorded_backoffs.lock().unwrap().push(delay),
                || self.model.extract_structured(request.clone()),
            )
            .await;

        result.map_err(|e| match e {
            LlmError::RateLimited => AnalysisError::RateLimitExhausted {
                loan_id: loan_id.to_string(),
                document: document.map(|d| d.to_string()),
                stage,
            },
            other => AnalysisError::Service {
                loan_id: loan_id.to_string(),
                document: document.map(|d| d.to_string()),
                stage,
                source: other,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted model: prompts containing `limited_marker` are rate-limited
    /// for the first `rate_limit_first` matching calls; everything else
    /// succeeds immediately.
    struct ScriptedModel {
        limited_marker: Option<String>,
        rate_limit_first: u32,
        calls: AtomicU32,
        response: serde_json::Value,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn extract_structured(
            &self,
            request: StructuredRequest,
        ) -> Result<serde_json::Value, LlmError> {
            let limited = match &self.limited_marker {
                Some(marker) => request.prompt.contains(marker),
                None => true,
            };
            if limited {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.rate_limit_first {
                    return Err(LlmError::RateLimited);
                }
            }
            Ok(self.response.clone())
        }
    }

    fn input(name: &str) -> DocumentInput {
        DocumentInput {
            name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1000,
            category: "General Document".to_string(),
            text: "sample text".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_is_terminal() {
        let model = Arc::new(ScriptedModel {
            limited_marker: None,
            rate_limit_first: u32::MAX,
            calls: AtomicU32::new(0),
            response: serde_json::json!({}),
        });
        let agg = AnalysisAggregator::new(
            model,
            BackoffPolicy::new(3, Duration::from_millis(10), 2.0),
        );
        let err = agg
            .analyze_document("loan-1", &input("appraisal.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RateLimitExhausted { .. }));
    }

    #[tokio::test]
    async fn test_non_retryable_service_error_surfaces_immediately() {
        struct FailingModel;
        #[async_trait]
        impl LanguageModel for FailingModel {
            async fn extract_structured(
                &self,
                _request: StructuredRequest,
            ) -> Result<serde_json::Value, LlmError> {
                Err(LlmError::Api("HTTP 500".to_string()))
            }
        }
        let agg = AnalysisAggregator::new(Arc::new(FailingModel), BackoffPolicy::default());
        let err = agg
            .analyze_document("loan-1", &input("a.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Service { .. }));
    }

    #[tokio::test]
    async fn test_missing_document_type_falls_back_to_category() {
        let model = Arc::new(ScriptedModel {
            limited_marker: None,
            rate_limit_first: 0,
            calls: AtomicU32::new(0),
            response: serde_json::json!({"fields": {"amount": 125000}}),
        });
        let agg = AnalysisAggregator::new(model, BackoffPolicy::default());
        let mut doc = input("scan.pdf");
        doc.category = "Payoff Statement".to_string();
        let result = agg.analyze_document("loan-1", &doc).await.unwrap();
        assert_eq!(result.document_type, "Payoff Statement");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_retries_then_reflects_all_documents() {
        // The second document's per-document call is rate limited three
        // times; the batch must still complete with both documents and the
        // recorded delays must double.
        let model = Arc::new(ScriptedModel {
            limited_marker: Some("feb.pdf".to_string()),
            rate_limit_first: 3,
            calls: AtomicU32::new(0),
            response: serde_json::json!({
                "document_type": "Bank Statements",
                "fields": {"institution": "First National"}
            }),
        });
        let agg = AnalysisAggregator::new(
            model,
            BackoffPolicy::new(5, Duration::from_millis(100), 2.0),
        );

        let docs = vec![input("jan.pdf"), input("feb.pdf")];
        let batch = agg.analyze_batch("loan-1", &docs).await;
        assert!(batch.is_ok());

        let delays = agg.last_backoff_delays();
        assert_eq!(delays.len(), 3);
        assert_eq!(delays[1], delays[0] * 2);
        assert_eq!(delays[2], delays[1] * 2);
    }
}
