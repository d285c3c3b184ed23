//! Loan-file document reconciliation and classification.
//!
//! Tracks the documents backing a real-estate loan against a funder's
//! requirement checklist: ingestion, deterministic classification, text
//! extraction, LLM-assisted analysis, and one-shot synchronization with a
//! remote storage mirror where the local store is always authoritative.

pub mod analysis;
pub mod catalog;
pub mod classify;
pub mod cli;
pub mod config;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod sync;
