//! Pipeline coordinator: the public entry point.
//!
//! ## Sequence
//!
//! ```text
//! validate ─▶ segment ─▶ cache partition ─▶ plan misses ─▶ preprocess
//!    ─▶ dispatch ─▶ merge in order ─▶ assemble ─▶ statistics
//! ```
//!
//! Cache hits are merged back by fragment index, so output order never
//! depends on which fragments were cached or which batch finished first.
//! Preprocessing runs after planning rather than before segmentation:
//! segmentation and cache keys never read the digest, and documents with
//! nothing planned (all cached, or no budget) skip it and dispatch
//! entirely.
//!
//! The cache, the aggregate statistics and the status registry are the only
//! state shared between concurrent documents. Each sits behind a
//! `std::sync::Mutex` that is never held across an `.await`.

use crate::analysis::{HeuristicAnalyzer, TextAnalyzer};
use crate::backend::ModelBackend;
use crate::config::{PipelineConfig, ProcessingOptions};
use crate::document::{Document, DocumentStatus, TargetFormat};
use crate::error::RepurposeError;
use crate::output::{
    FragmentOutcome, FragmentResult, PipelineStats, PlanPreview, ProcessedResult, ProcessingStats,
};
use crate::pipeline::assemble::{assemble, Slot};
use crate::pipeline::cache::FragmentCache;
use crate::pipeline::chunk::{segment, Segmentation};
use crate::pipeline::compress::{preprocess, DocumentDigest};
use crate::pipeline::cost::ModelCatalog;
use crate::pipeline::orchestrator::{
    build_jobs, dispatch, plan, GenerationParams, JobSet, Plan, PlanRequest, PromptInputs,
};
use crate::pipeline::postprocess::clean_fragment;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Repurposes documents into target formats.
///
/// # Example
/// ```rust,no_run
/// use edgequake_repurpose::{
///     Document, LlmBackend, ModelCatalog, Pipeline, PipelineConfig, ProcessingOptions,
///     TargetFormat,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = ModelCatalog::with_defaults();
/// let backend = Arc::new(LlmBackend::from_catalog(&catalog));
/// let pipeline = Pipeline::new(PipelineConfig::default(), catalog, backend);
///
/// let doc = Document::new("Ownership", std::fs::read_to_string("ownership.md")?);
/// let options = ProcessingOptions::default().budget(0.05).tone("friendly");
/// let result = pipeline.process(&doc, TargetFormat::Podcast, &options).await?;
/// println!("{}", result.output);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    catalog: ModelCatalog,
    backend: Arc<dyn ModelBackend>,
    analyzer: Arc<dyn TextAnalyzer>,
    cache: Mutex<FragmentCache>,
    stats: Mutex<PipelineStats>,
    statuses: Mutex<HashMap<Uuid, DocumentStatus>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("models", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

/// Lock a mutex, recovering the data if a panicking task poisoned it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Pipeline {
    pub fn new(config: PipelineConfig, catalog: ModelCatalog, backend: Arc<dyn ModelBackend>) -> Self {
        let cache = FragmentCache::new(&config.cache);
        Self {
            config,
            catalog,
            backend,
            analyzer: Arc::new(HeuristicAnalyzer::default()),
            cache: Mutex::new(cache),
            stats: Mutex::new(PipelineStats::default()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the built-in [`HeuristicAnalyzer`].
    pub fn with_analyzer(mut self, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Repurpose one document.
    ///
    /// Returns `Ok` with status `Completed` or `Partial` whenever output
    /// could be assembled; fragment failures and budget gaps are reported
    /// inside the result (see [`ProcessedResult::into_result`]). Validation
    /// errors are returned before any backend call.
    pub async fn process(
        &self,
        document: &Document,
        format: TargetFormat,
        options: &ProcessingOptions,
    ) -> Result<ProcessedResult, RepurposeError> {
        self.set_status(document.id(), DocumentStatus::Processing);
        match self.run(document, format, options).await {
            Ok(result) => {
                self.finish(document.id(), result.status, &result.stats);
                Ok(result)
            }
            Err(e) => {
                warn!("Document '{}' failed: {e}", document.title());
                self.finish(document.id(), DocumentStatus::Failed, &ProcessingStats::default());
                Err(e)
            }
        }
    }

    /// Repurpose several documents with bounded concurrency.
    ///
    /// Every document is registered as `Pending` up front and moves to
    /// `Processing` when its turn comes. Results are index-aligned with
    /// `documents`. A failing or panicking document yields an `Err` entry
    /// and never affects its siblings.
    pub async fn process_batch(
        &self,
        documents: &[Document],
        format: TargetFormat,
        options: &ProcessingOptions,
    ) -> Vec<Result<ProcessedResult, RepurposeError>> {
        info!(
            "Processing batch of {} documents as {} (concurrency {})",
            documents.len(),
            format,
            self.config.document_concurrency
        );
        {
            let mut statuses = lock(&self.statuses);
            for doc in documents {
                statuses.insert(doc.id(), DocumentStatus::Pending);
            }
        }
        let mut indexed: Vec<(usize, Result<ProcessedResult, RepurposeError>)> =
            stream::iter(documents.iter().enumerate().map(|(i, doc)| async move {
                let outcome = AssertUnwindSafe(self.process(doc, format, options))
                    .catch_unwind()
                    .await;
                let result = outcome.unwrap_or_else(|panic| {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!("Document '{}' panicked: {msg}", doc.title());
                    self.finish(doc.id(), DocumentStatus::Failed, &ProcessingStats::default());
                    Err(RepurposeError::Internal(format!(
                        "document task panicked: {msg}"
                    )))
                });
                (i, result)
            }))
            .buffer_unordered(self.config.document_concurrency.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, r)| r).collect()
    }

    /// Process a document and write its output to `path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn process_to_file(
        &self,
        document: &Document,
        format: TargetFormat,
        options: &ProcessingOptions,
        path: impl AsRef<Path>,
    ) -> Result<ProcessedResult, RepurposeError> {
        let result = self.process(document, format, options).await?;
        let path = path.as_ref();
        let write_err = |e: std::io::Error| RepurposeError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp_path = path.with_extension("repurpose.tmp");
        tokio::fs::write(&tmp_path, &result.output)
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

        Ok(result)
    }

    /// Synchronous wrapper around [`Pipeline::process`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from
    /// inside an async context.
    pub fn process_sync(
        &self,
        document: &Document,
        format: TargetFormat,
        options: &ProcessingOptions,
    ) -> Result<ProcessedResult, RepurposeError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| RepurposeError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.process(document, format, options))
    }

    /// Plan a document without dispatching or touching cache statistics.
    pub fn estimate(
        &self,
        document: &Document,
        format: TargetFormat,
        options: &ProcessingOptions,
    ) -> Result<PlanPreview, RepurposeError> {
        let seg = self.validate_and_segment(document, format, options)?;
        let key_material = options.key_material(&self.config);
        let cached: Vec<bool> = {
            let cache = lock(&self.cache);
            seg.fragments
                .iter()
                .map(|f| cache.contains_fresh(&cache.key_for(f, format, &key_material)))
                .collect()
        };
        let plan = self.plan_misses(&seg, &cached, format, options)?;
        Ok(PlanPreview {
            document_id: document.id(),
            format,
            total_fragments: seg.fragments.len(),
            cached: cached.iter().filter(|c| **c).count(),
            estimated_cost: plan.estimated_cost(),
            entries: plan.entries,
            unplanned: plan.unplanned,
            budget: options.budget,
        })
    }

    /// Last known status of a document processed by this pipeline.
    pub fn status(&self, document_id: Uuid) -> Option<DocumentStatus> {
        lock(&self.statuses).get(&document_id).copied()
    }

    /// Aggregate statistics, including current cache counters.
    pub fn get_stats(&self) -> PipelineStats {
        let mut stats = lock(&self.stats).clone();
        stats.cache = lock(&self.cache).stats();
        stats
    }

    /// Drop expired cache entries and release memory; returns entries removed.
    pub fn optimize_cache(&self) -> usize {
        lock(&self.cache).optimize()
    }

    /// Drop expired cache entries; returns entries removed.
    pub fn clear_expired(&self) -> usize {
        lock(&self.cache).clear_expired()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn set_status(&self, id: Uuid, status: DocumentStatus) {
        lock(&self.statuses).insert(id, status);
    }

    fn finish(&self, id: Uuid, status: DocumentStatus, stats: &ProcessingStats) {
        self.set_status(id, status);
        lock(&self.stats).record(status, stats);
    }

    fn validate_and_segment(
        &self,
        document: &Document,
        format: TargetFormat,
        options: &ProcessingOptions,
    ) -> Result<Segmentation, RepurposeError> {
        options.validate(format)?;
        if document.is_blank() {
            return Err(RepurposeError::EmptyDocument {
                title: document.title().to_string(),
            });
        }
        let seg = segment(document, format, &self.config.segment);
        if seg.fragments.is_empty() {
            return Err(RepurposeError::EmptyDocument {
                title: document.title().to_string(),
            });
        }
        Ok(seg)
    }

    fn plan_misses(
        &self,
        seg: &Segmentation,
        cached: &[bool],
        format: TargetFormat,
        options: &ProcessingOptions,
    ) -> Result<Plan, RepurposeError> {
        let misses: Vec<_> = seg
            .fragments
            .iter()
            .zip(cached)
            .filter(|(_, hit)| !**hit)
            .map(|(f, _)| f)
            .collect();
        plan(
            &misses,
            &self.catalog,
            &PlanRequest {
                format,
                params: GenerationParams::resolve(options, &self.config),
                max_input_units: self.config.max_input_units,
                quality_floor: self.config.quality_floor,
                budget: options.budget,
            },
        )
    }

    /// One document through the whole sequence. The digest is built after
    /// planning and only when something is planned; nothing before dispatch
    /// depends on it.
    async fn run(
        &self,
        document: &Document,
        format: TargetFormat,
        options: &ProcessingOptions,
    ) -> Result<ProcessedResult, RepurposeError> {
        let total_start = Instant::now();
        let seg = self.validate_and_segment(document, format, options)?;
        let total = seg.fragments.len();
        let progress = self.config.progress_callback.as_ref();

        info!(
            "Processing '{}' as {}: {} words, {} fragments",
            document.title(),
            format,
            document.word_count(),
            total
        );
        if let Some(cb) = progress {
            cb.on_document_start(document.title(), total);
        }

        // ── Cache partition ──────────────────────────────────────────────
        let key_material = options.key_material(&self.config);
        let mut slots: Vec<Option<FragmentResult>> = vec![None; total];
        let keys: Vec<String> = {
            let mut cache = lock(&self.cache);
            let keys: Vec<String> = seg
                .fragments
                .iter()
                .map(|f| cache.key_for(f, format, &key_material))
                .collect();
            for ((slot, key), fragment) in slots.iter_mut().zip(&keys).zip(&seg.fragments) {
                *slot = cache.get_by_key(key).map(|hit| hit.as_cached(fragment));
            }
            keys
        };
        let cached: Vec<bool> = slots.iter().map(Option::is_some).collect();
        let served_from_cache = cached.iter().filter(|c| **c).count();
        if let Some(cb) = progress {
            for (i, r) in slots.iter().enumerate() {
                if let Some(text) = r.as_ref().and_then(|r| r.text()) {
                    cb.on_fragment_complete(i, total, text.len(), true);
                }
            }
        }
        debug!("{}/{} fragments served from cache", served_from_cache, total);

        // ── Plan ─────────────────────────────────────────────────────────
        let plan = self.plan_misses(&seg, &cached, format, options)?;
        if let Some(cb) = progress {
            for id in &plan.unplanned {
                if let Some(f) = seg.fragments.iter().find(|f| &f.id == id) {
                    cb.on_fragment_skipped(f.index, total);
                }
            }
        }

        // ── Preprocess + dispatch ────────────────────────────────────────
        let mut preprocess_duration_ms = 0;
        let mut dispatch_duration_ms = 0;
        let mut dispatched = Vec::new();
        let mut calls = 0;
        if !plan.entries.is_empty() {
            let t = Instant::now();
            let digest: DocumentDigest = preprocess(document, self.analyzer.as_ref()).await;
            preprocess_duration_ms = t.elapsed().as_millis() as u64;

            let context = digest.as_context();
            let inputs = PromptInputs {
                format,
                options,
                context: &context,
                max_input_units: self.config.max_input_units,
            };
            let JobSet { jobs, rejected } = build_jobs(&plan, &seg.fragments, &self.catalog, &inputs);
            calls = jobs.len();
            if let Some(cb) = progress {
                for r in &rejected {
                    if let Some(e) = r.error() {
                        cb.on_fragment_error(r.index, total, &e.to_string());
                    }
                }
            }

            let t = Instant::now();
            dispatched = dispatch(jobs, self.backend.as_ref(), &self.catalog, &self.config, total).await;
            dispatch_duration_ms = t.elapsed().as_millis() as u64;
            dispatched.extend(rejected);
        }

        // ── Merge + cache write-back ─────────────────────────────────────
        let mut stats = ProcessingStats {
            requested: total,
            served_from_cache,
            dispatched: calls,
            unplanned: plan.unplanned_count(),
            estimated_cost: plan.estimated_cost(),
            preprocess_duration_ms,
            dispatch_duration_ms,
            ..Default::default()
        };
        {
            let mut cache = lock(&self.cache);
            for mut result in dispatched {
                if let FragmentOutcome::Success {
                    text,
                    input_units,
                    output_units,
                    cost,
                } = &mut result.outcome
                {
                    *text = clean_fragment(text);
                    stats.actual_cost += *cost;
                    stats.input_units += *input_units as u64;
                    stats.output_units += *output_units as u64;
                    if let Some(key) = keys.get(result.index) {
                        cache.put_by_key(key.clone(), &result);
                    }
                }
                let index = result.index;
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(result);
                }
            }
        }

        let failed_fragments: Vec<_> = slots
            .iter()
            .flatten()
            .filter(|r| !r.is_success())
            .map(|r| r.fragment_id.clone())
            .collect();
        stats.failed = failed_fragments.len();
        stats.succeeded = slots.iter().flatten().filter(|r| r.is_success()).count();

        // ── Assemble ─────────────────────────────────────────────────────
        let output = {
            let assembly: Vec<Slot<'_>> = slots
                .iter()
                .zip(&seg.fragments)
                .map(|(slot, fragment)| match slot {
                    Some(r) => match r.text() {
                        Some(text) => Slot::Text(text),
                        None => Slot::Failed(&r.fragment_id),
                    },
                    None => Slot::Unplanned(&fragment.id),
                })
                .collect();
            assemble(
                format,
                document.title(),
                options.target_language.as_deref(),
                &seg.context_map,
                &assembly,
            )?
        };

        let status = if failed_fragments.is_empty() && plan.unplanned.is_empty() {
            DocumentStatus::Completed
        } else {
            DocumentStatus::Partial
        };
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "'{}' {:?}: {}/{} fragments ({} cached, {} failed, {} unplanned), est ${:.4} / actual ${:.4}, {}ms",
            document.title(),
            status,
            stats.succeeded,
            total,
            stats.served_from_cache,
            stats.failed,
            stats.unplanned,
            stats.estimated_cost,
            stats.actual_cost,
            stats.total_duration_ms
        );
        if let Some(cb) = progress {
            cb.on_document_complete(document.title(), stats.succeeded, total);
        }

        Ok(ProcessedResult {
            document_id: document.id(),
            title: document.title().to_string(),
            format,
            status,
            output,
            fragments: slots.into_iter().flatten().collect(),
            failed_fragments,
            unplanned_fragments: plan.unplanned,
            budget: options.budget,
            stats,
        })
    }
}
