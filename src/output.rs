//! Result and statistics types returned by the pipeline.

use crate::document::{DocumentStatus, Fragment, FragmentId, TargetFormat};
use crate::error::{FragmentError, RepurposeError};
use crate::pipeline::cache::CacheStats;
use crate::pipeline::orchestrator::PlanEntry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a fragment's output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Cache,
    Dispatch,
}

/// Success or failure of one fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentOutcome {
    Success {
        text: String,
        input_units: usize,
        output_units: usize,
        /// Actual USD cost of the call (0 when served from cache).
        cost: f64,
    },
    Failure { error: FragmentError },
}

/// Result for a single fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentResult {
    pub fragment_id: FragmentId,
    /// 0-based position in the document's fragment sequence.
    pub index: usize,
    pub model: String,
    pub latency_ms: u64,
    pub source: ResultSource,
    pub outcome: FragmentOutcome,
}

impl FragmentResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FragmentOutcome::Success { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            FragmentOutcome::Success { text, .. } => Some(text),
            FragmentOutcome::Failure { .. } => None,
        }
    }

    /// Actual cost; failures and cache hits cost nothing.
    pub fn cost(&self) -> f64 {
        match (&self.outcome, self.source) {
            (FragmentOutcome::Success { cost, .. }, ResultSource::Dispatch) => *cost,
            _ => 0.0,
        }
    }

    pub fn error(&self) -> Option<&FragmentError> {
        match &self.outcome {
            FragmentOutcome::Failure { error } => Some(error),
            FragmentOutcome::Success { .. } => None,
        }
    }

    /// A copy of this result served from the cache for `fragment`.
    ///
    /// The stored entry may have been produced for identical content at
    /// another offset or in another document, so identity always comes from
    /// `fragment`.
    pub fn as_cached(&self, fragment: &Fragment) -> Self {
        Self {
            fragment_id: fragment.id.clone(),
            index: fragment.index,
            latency_ms: 0,
            source: ResultSource::Cache,
            ..self.clone()
        }
    }
}

/// Per-document processing statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Fragments produced by segmentation.
    pub requested: usize,
    pub served_from_cache: usize,
    /// Backend requests issued (one per planned fragment, retries excluded).
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unplanned: usize,
    /// Sum of planning estimates for dispatched fragments.
    pub estimated_cost: f64,
    /// Sum of real per-call costs.
    pub actual_cost: f64,
    pub input_units: u64,
    pub output_units: u64,
    pub preprocess_duration_ms: u64,
    pub dispatch_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Complete result of processing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub document_id: Uuid,
    pub title: String,
    pub format: TargetFormat,
    /// `Completed` or `Partial`; failed documents are returned as `Err`.
    pub status: DocumentStatus,
    /// The assembled, post-processed output document.
    pub output: String,
    /// One entry per planned fragment, in fragment order.
    pub fragments: Vec<FragmentResult>,
    pub failed_fragments: Vec<FragmentId>,
    pub unplanned_fragments: Vec<FragmentId>,
    pub budget: Option<f64>,
    pub stats: ProcessingStats,
}

impl ProcessedResult {
    pub fn is_complete(&self) -> bool {
        self.status == DocumentStatus::Completed
    }

    /// Treat any gap in the output as an error.
    ///
    /// Unplanned fragments take precedence over failed ones, since they
    /// mean the caller's budget, not a backend, limited the result.
    pub fn into_result(self) -> Result<Self, RepurposeError> {
        if !self.unplanned_fragments.is_empty() {
            return Err(RepurposeError::BudgetExhausted {
                budget: self.budget.unwrap_or_default(),
                unplanned: self.unplanned_fragments.len(),
            });
        }
        if !self.failed_fragments.is_empty() {
            return Err(RepurposeError::PartialFailure {
                succeeded: self.stats.succeeded,
                failed: self.failed_fragments.len(),
                total: self.stats.requested,
            });
        }
        Ok(self)
    }
}

/// Dry-run result of [`crate::coordinator::Pipeline::estimate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPreview {
    pub document_id: Uuid,
    pub format: TargetFormat,
    pub total_fragments: usize,
    /// Fragments that would be served from the cache.
    pub cached: usize,
    pub entries: Vec<PlanEntry>,
    pub unplanned: Vec<FragmentId>,
    pub estimated_cost: f64,
    pub budget: Option<f64>,
}

/// Aggregate statistics of one [`crate::coordinator::Pipeline`] instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub documents_completed: usize,
    pub documents_partial: usize,
    pub documents_failed: usize,
    pub fragments_requested: usize,
    pub served_from_cache: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unplanned: usize,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub cache: CacheStats,
}

impl PipelineStats {
    pub fn documents_processed(&self) -> usize {
        self.documents_completed + self.documents_partial + self.documents_failed
    }

    pub(crate) fn record(&mut self, status: DocumentStatus, stats: &ProcessingStats) {
        match status {
            DocumentStatus::Completed => self.documents_completed += 1,
            DocumentStatus::Partial => self.documents_partial += 1,
            _ => self.documents_failed += 1,
        }
        self.fragments_requested += stats.requested;
        self.served_from_cache += stats.served_from_cache;
        self.dispatched += stats.dispatched;
        self.succeeded += stats.succeeded;
        self.failed += stats.failed;
        self.unplanned += stats.unplanned;
        self.estimated_cost += stats.estimated_cost;
        self.actual_cost += stats.actual_cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Fragment, FragmentTag};

    fn success(index: usize) -> FragmentResult {
        let f = Fragment::new(index, index * 10, format!("content {index}"), FragmentTag::Narration);
        FragmentResult {
            fragment_id: f.id,
            index,
            model: "m".into(),
            latency_ms: 12,
            source: ResultSource::Dispatch,
            outcome: FragmentOutcome::Success {
                text: "out".into(),
                input_units: 10,
                output_units: 5,
                cost: 0.25,
            },
        }
    }

    fn result(failed: usize, unplanned: usize) -> ProcessedResult {
        let ids = |n: usize| {
            (0..n)
                .map(|i| Fragment::new(i, i, "x", FragmentTag::Section).id)
                .collect::<Vec<_>>()
        };
        ProcessedResult {
            document_id: Uuid::new_v4(),
            title: "t".into(),
            format: TargetFormat::Podcast,
            status: DocumentStatus::Partial,
            output: String::new(),
            fragments: vec![],
            failed_fragments: ids(failed),
            unplanned_fragments: ids(unplanned),
            budget: Some(1.5),
            stats: ProcessingStats {
                requested: 4,
                succeeded: 4 - failed - unplanned,
                ..Default::default()
            },
        }
    }

    #[test]
    fn cached_copy_costs_nothing() {
        let r = success(0);
        assert_eq!(r.cost(), 0.25);
        let elsewhere = Fragment::new(3, 420, "same words", FragmentTag::Narration);
        let c = r.as_cached(&elsewhere);
        assert_eq!(c.index, 3);
        assert_eq!(c.fragment_id, elsewhere.id);
        assert_ne!(c.fragment_id, r.fragment_id);
        assert_eq!(c.source, ResultSource::Cache);
        assert_eq!(c.cost(), 0.0);
        assert_eq!(c.text(), Some("out"));
    }

    #[test]
    fn into_result_reports_gaps() {
        assert!(result(0, 0).into_result().is_ok());
        match result(1, 0).into_result() {
            Err(RepurposeError::PartialFailure { failed, total, .. }) => {
                assert_eq!((failed, total), (1, 4));
            }
            other => panic!("unexpected: {other:?}"),
        }
        match result(1, 2).into_result() {
            Err(RepurposeError::BudgetExhausted { budget, unplanned }) => {
                assert_eq!(unplanned, 2);
                assert_eq!(budget, 1.5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_string(&success(1)).unwrap();
        assert!(json.contains(r#""kind":"success""#), "got {json}");
        assert!(json.contains(r#""source":"dispatch""#));
    }

    #[test]
    fn pipeline_stats_accumulate() {
        let mut p = PipelineStats::default();
        let s = ProcessingStats {
            requested: 3,
            dispatched: 2,
            served_from_cache: 1,
            succeeded: 3,
            actual_cost: 0.5,
            ..Default::default()
        };
        p.record(DocumentStatus::Completed, &s);
        p.record(DocumentStatus::Failed, &ProcessingStats::default());
        assert_eq!(p.documents_processed(), 2);
        assert_eq!(p.documents_failed, 1);
        assert_eq!(p.fragments_requested, 3);
        assert_eq!(p.actual_cost, 0.5);
    }
}
