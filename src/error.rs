//! Error types for the edgequake-repurpose library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`RepurposeError`] — **Fatal** for one document: the request is invalid,
//!   no model can serve a required capability, or assembly failed. Returned
//!   as `Err(RepurposeError)` from [`crate::coordinator::Pipeline::process`].
//!
//! * [`FragmentError`] — **Non-fatal**: a single fragment failed (timeout,
//!   backend error) while its siblings are fine. Stored inside
//!   [`crate::output::FragmentResult`] so callers can inspect partial
//!   success and re-request only the failed fragments.
//!
//! * [`BackendError`] — what a [`crate::backend::ModelBackend`] reports for
//!   one call. The orchestrator retries transient variants and converts the
//!   final one into a [`FragmentError`]; it never reaches document level.

use crate::pipeline::cost::Capability;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-repurpose library.
#[derive(Debug, Error)]
pub enum RepurposeError {
    // ── Validation errors (raised before any spend) ───────────────────────
    /// A processing option or configuration value is out of range.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The document has no content to segment.
    #[error("Document '{title}' is empty")]
    EmptyDocument { title: String },

    // ── Planning errors ───────────────────────────────────────────────────
    /// No model in the catalog advertises the capability a fragment needs.
    #[error("No model advertises capability '{capability}' (needed by fragment {fragment})")]
    CapabilityUnavailable {
        capability: Capability,
        fragment: String,
    },

    /// The budget did not cover every fragment.
    ///
    /// Never raised by planning itself (a short plan is a normal outcome);
    /// returned by [`crate::output::ProcessedResult::into_result`] for callers
    /// that treat an incomplete plan as an error.
    #[error("Budget ${budget:.4} exhausted: {unplanned} fragment(s) left unplanned")]
    BudgetExhausted { budget: f64, unplanned: usize },

    // ── Post-dispatch errors ──────────────────────────────────────────────
    /// Format-specific assembly could not produce an output document.
    #[error("Assembly failed: {0}")]
    Assembly(String),

    /// Some fragments succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::ProcessedResult::into_result`] when the
    /// caller wants to treat any fragment failure as an error.
    #[error("{failed}/{total} fragments failed during processing")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// A model catalog file could not be parsed.
    #[error("Invalid model catalog: {0}")]
    CatalogParse(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a panicked document task in batch mode).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RepurposeError {
    /// True for errors raised before any backend call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RepurposeError::InvalidOptions(_) | RepurposeError::EmptyDocument { .. }
        )
    }
}

/// A non-fatal error for a single fragment.
///
/// Stored alongside [`crate::output::FragmentResult`] when a fragment fails.
/// The document continues; its terminal status becomes `Partial`.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum FragmentError {
    /// Backend call failed after retries.
    #[error("Fragment {fragment}: model '{model}' failed after {retries} retries: {detail}")]
    Backend {
        fragment: String,
        model: String,
        retries: u32,
        detail: String,
    },

    /// Backend call did not answer within the per-call timeout.
    #[error("Fragment {fragment}: model '{model}' timed out after {secs}s")]
    Timeout {
        fragment: String,
        model: String,
        secs: u64,
    },

    /// The backend refused the request as outside the model's capability.
    #[error("Fragment {fragment}: model '{model}' rejected the request: {detail}")]
    Capability {
        fragment: String,
        model: String,
        detail: String,
    },

    /// Not even one word of the fragment fits the model's input room.
    /// Never dispatched.
    #[error("Fragment {fragment}: no content fits {limit} input units of model '{model}'")]
    Oversized {
        fragment: String,
        model: String,
        limit: usize,
    },
}

/// An error reported by a [`crate::backend::ModelBackend`] for one call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// 5xx, connection reset or an overloaded backend. Retried.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// HTTP 429. Retried after backing off.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The model cannot perform this request; retrying will not help.
    #[error("capability error: {0}")]
    Capability(String),

    /// The backend itself gave up waiting.
    #[error("backend timed out")]
    Timeout,

    /// The requested model is not registered with this backend.
    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

impl BackendError {
    /// Whether the orchestrator should retry the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Transient(_) | BackendError::RateLimited { .. } | BackendError::Timeout
        )
    }
}
