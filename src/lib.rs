//! # edgequake-repurpose
//!
//! Turn long-form text documents into podcast scripts, course modules,
//! short-video scripts or translations using Large Language Models, within
//! a spending budget.
//!
//! ## Why this crate?
//!
//! Sending a whole book to one model is slow, expensive and runs into
//! context limits. Instead this crate splits each document into
//! format-aware fragments, routes every fragment to the most cost-efficient
//! model able to handle it, never plans beyond the caller's budget, and
//! caches fragment results so re-running a document costs nothing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document
//!  │
//!  ├─ 1. Validate  options checked before any spend
//!  ├─ 2. Segment   podcast segments / course sections / video beats / text blocks
//!  ├─ 3. Cache     fingerprinted hits skip the backend entirely
//!  ├─ 4. Plan      capability → most efficient model within budget
//!  ├─ 5. Digest    summary, entities, quotes as shared prompt context
//!  ├─ 6. Dispatch  batched concurrent calls with timeout + retry
//!  ├─ 7. Polish    deterministic cleanup of model chatter
//!  └─ 8. Assemble  episodes / modules / scenes, in original order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_repurpose::{
//!     Document, LlmBackend, ModelCatalog, Pipeline, PipelineConfig, ProcessingOptions,
//!     TargetFormat,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Providers are created from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY …
//!     let mut catalog = ModelCatalog::with_defaults();
//!     let backend = LlmBackend::from_catalog(&catalog);
//!     catalog.retain(|m| backend.supports(&m.name));
//!
//!     let pipeline = Pipeline::new(PipelineConfig::default(), catalog, Arc::new(backend));
//!     let doc = Document::new("Essay", std::fs::read_to_string("essay.md")?);
//!     let options = ProcessingOptions::default().target_language("French").budget(0.10);
//!
//!     let result = pipeline.process(&doc, TargetFormat::Translation, &options).await?;
//!     println!("{}", result.output);
//!     eprintln!(
//!         "{:?}: estimated ${:.4}, spent ${:.4}",
//!         result.status, result.stats.estimated_cost, result.stats.actual_cost
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `repurpose` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-repurpose = { version = "0.1", default-features = false }
//! ```
//!
//! ## Budgets
//!
//! Budgets are checked against *estimated* cost (`ceil(words × 1.3)` units
//! at catalog prices). A plan's estimate never exceeds the budget; fragments
//! the budget cannot cover are reported as unplanned and the document
//! finishes as `Partial`. The actual spend, from provider-reported usage, is
//! reported separately in [`ProcessingStats::actual_cost`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{AnalysisError, HeuristicAnalyzer, StructureDescriptor, TextAnalyzer};
pub use backend::{BackendReply, GenerationRequest, LlmBackend, ModelBackend};
pub use config::{CacheConfig, PipelineConfig, PipelineConfigBuilder, ProcessingOptions, SegmentOptions};
pub use coordinator::Pipeline;
pub use document::{
    Document, DocumentMetadata, DocumentStatus, Fragment, FragmentId, FragmentTag, TargetFormat,
};
pub use error::{BackendError, FragmentError, RepurposeError};
pub use output::{
    FragmentOutcome, FragmentResult, PipelineStats, PlanPreview, ProcessedResult, ProcessingStats,
    ResultSource,
};
pub use pipeline::cache::CacheStats;
pub use pipeline::cost::{
    Capability, CostBreakdown, CostModel, CostStrategy, DocumentEstimate, ModelCatalog, ModelProfile,
};
pub use progress::{NoopProgressObserver, ProgressCallback, ProgressObserver};
