//! Shared domain types for the TestDeck orchestration layer.
//!
//! - [`types`]: identifiers shared by every crate.
//! - [`conversion`]: document-conversion job status as reported by the backend.
//! - [`test_result`]: per-item results, run summaries and execution items.
//! - [`remote`]: the remote-call seams (status, execute, persistence) and
//!   their wire records.
//! - [`error`]: the error taxonomy surfaced to callers.

pub mod conversion;
pub mod error;
pub mod remote;
pub mod test_result;
pub mod types;
