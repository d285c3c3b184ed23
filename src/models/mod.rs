//! Data models for loanfile.

mod analysis;
mod document;
mod requirement;

pub use analysis::{
    AnalyzedDocument, BatchAnalysis, ContactCandidate, DocumentAnalysis, LoanInfo, PropertyInfo,
    TaskCandidate,
};
pub use document::{Document, DocumentOrigin};
pub use requirement::{RequirementCategory, RequirementDefinition, RequirementSet};
