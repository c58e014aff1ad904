//! Model orchestrator: capability mapping, budget-aware planning and
//! batched dispatch.
//!
//! ## Planning
//!
//! One deterministic pass in fragment order. For each fragment the capable
//! models are ranked by efficiency; with a budget the most efficient model
//! is taken only if the running total plus the cheapest possible cost of
//! every later fragment still fits, otherwise the cheapest capable model is
//! taken if it alone fits, otherwise planning stops and every remaining
//! fragment is reported as unplanned. The estimated total of a plan
//! therefore never exceeds the budget, and a larger budget never plans
//! fewer fragments.
//!
//! ## Dispatch
//!
//! Planned fragments are sent in fixed-size batches. A batch runs
//! concurrently; batches run one after another with a pacing delay. Each
//! call has its own timeout and exponential-backoff retries for transient
//! errors (`retry_backoff_ms * 2^(attempt-1)`). A failed fragment becomes a
//! failed [`FragmentResult`] with zero cost; its siblings are unaffected.

use crate::backend::{GenerationRequest, ModelBackend};
use crate::config::{PipelineConfig, ProcessingOptions};
use crate::document::{Fragment, FragmentId, FragmentTag, TargetFormat};
use crate::error::{BackendError, FragmentError, RepurposeError};
use crate::output::{FragmentOutcome, FragmentResult, ResultSource};
use crate::pipeline::compress::compress;
use crate::pipeline::cost::{
    estimate_units, Capability, CostModel, ModelCatalog, Workload, PROMPT_OVERHEAD_UNITS,
};
use crate::prompts::{build_prompt, Prompt, PromptRole};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

static RE_TECHNICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)```|\$[^$\n]+\$|\b(theorem|proof|lemma|equation|algorithm|derivative|integral|complexity)\b|\w\s*[=<>]=?\s*\d",
    )
    .unwrap()
});

/// Capability a fragment needs for `format`.
pub fn required_capability(format: TargetFormat, fragment: &Fragment) -> Capability {
    match (format, fragment.tag) {
        (TargetFormat::Translation, _) => Capability::Translate,
        (TargetFormat::Podcast, _) | (TargetFormat::ShortVideo, _) => Capability::CreativeWrite,
        (TargetFormat::Course, FragmentTag::Exercise) => Capability::Reason,
        (TargetFormat::Course, FragmentTag::Dialogue) => Capability::CreativeWrite,
        (TargetFormat::Course, FragmentTag::Section | FragmentTag::Narration) => {
            if RE_TECHNICAL.is_match(&fragment.content) {
                Capability::Reason
            } else {
                Capability::Summarize
            }
        }
    }
}

/// Estimated workload of one fragment request.
///
/// Input is capped at `max_input_units` since oversized content is
/// compressed before it is sent.
pub fn fragment_workload(
    fragment: &Fragment,
    format: TargetFormat,
    max_output_units: usize,
    max_input_units: usize,
) -> Workload {
    let base = Workload::for_text(&fragment.content, format, max_output_units);
    let content_units = base.input_units - PROMPT_OVERHEAD_UNITS;
    Workload {
        input_units: content_units.min(max_input_units) + PROMPT_OVERHEAD_UNITS,
        output_units: base.output_units,
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────

/// Sampling parameters sent with a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_units: usize,
}

impl GenerationParams {
    pub fn resolve(options: &ProcessingOptions, config: &PipelineConfig) -> Self {
        Self {
            temperature: options.effective_temperature(config),
            max_output_units: options.effective_max_output_units(config),
        }
    }
}

/// One planned fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub fragment_index: usize,
    pub fragment_id: FragmentId,
    pub model: String,
    pub params: GenerationParams,
    pub capability: Capability,
    pub workload: Workload,
    pub estimated_cost: f64,
}

/// Output of [`plan`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    /// Fragments the budget could not cover, in fragment order.
    pub unplanned: Vec<FragmentId>,
    pub budget: Option<f64>,
}

impl Plan {
    pub fn estimated_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.estimated_cost).sum()
    }

    pub fn unplanned_count(&self) -> usize {
        self.unplanned.len()
    }

    pub fn is_complete(&self) -> bool {
        self.unplanned.is_empty()
    }
}

/// Inputs to [`plan`] that do not vary per fragment.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest {
    pub format: TargetFormat,
    pub params: GenerationParams,
    pub max_input_units: usize,
    pub quality_floor: f64,
    pub budget: Option<f64>,
}

/// Assign a model to each fragment, in order.
///
/// Fails with [`RepurposeError::CapabilityUnavailable`] before planning
/// anything when some fragment needs a capability no eligible model offers.
pub fn plan(
    fragments: &[&Fragment],
    catalog: &ModelCatalog,
    request: &PlanRequest,
) -> Result<Plan, RepurposeError> {
    let cost_model = CostModel::new(catalog);

    let mut prepared = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let capability = required_capability(request.format, fragment);
        let workload = fragment_workload(
            fragment,
            request.format,
            request.params.max_output_units,
            request.max_input_units,
        );
        let (_, min_cost) = cost_model
            .cheapest_for(capability, request.quality_floor, &workload)
            .ok_or_else(|| RepurposeError::CapabilityUnavailable {
                capability,
                fragment: fragment.id.to_string(),
            })?;
        prepared.push((capability, workload, min_cost));
    }

    // reserve[i] = cheapest possible cost of fragments i+1..
    let mut reserve = vec![0.0_f64; prepared.len()];
    for i in (0..prepared.len().saturating_sub(1)).rev() {
        reserve[i] = reserve[i + 1] + prepared[i + 1].2;
    }

    let mut out = Plan {
        budget: request.budget,
        ..Plan::default()
    };
    let mut spent = 0.0_f64;
    let mut stopped = false;

    for (i, (fragment, (capability, workload, _))) in fragments.iter().zip(&prepared).enumerate() {
        if stopped {
            out.unplanned.push(fragment.id.clone());
            continue;
        }

        let ranked = cost_model.ranked(*capability, request.quality_floor, workload);
        let priced = ranked
            .into_iter()
            .map(|m| (m, m.cost(workload.input_units, workload.output_units)));

        let choice = match request.budget {
            None => priced.into_iter().next(),
            Some(budget) => {
                let priced: Vec<_> = priced.collect();
                priced
                    .iter()
                    .find(|(_, c)| spent + c + reserve[i] <= budget)
                    .or_else(|| {
                        cost_model
                            .cheapest_for(*capability, request.quality_floor, workload)
                            .and_then(|(m, _)| priced.iter().find(|(p, _)| p.name == m.name))
                            .filter(|(_, c)| spent + c <= budget)
                    })
                    .copied()
            }
        };

        match choice {
            Some((model, cost)) => {
                spent += cost;
                debug!(
                    "Planned {} ({}) on {} for ${:.6}",
                    fragment.id, capability, model.name, cost
                );
                out.entries.push(PlanEntry {
                    fragment_index: fragment.index,
                    fragment_id: fragment.id.clone(),
                    model: model.name.clone(),
                    params: request.params,
                    capability: *capability,
                    workload: *workload,
                    estimated_cost: cost,
                });
            }
            None => {
                stopped = true;
                out.unplanned.push(fragment.id.clone());
            }
        }
    }

    if !out.unplanned.is_empty() {
        warn!(
            "Budget ${:.4} covers {}/{} fragments (estimated ${:.4})",
            request.budget.unwrap_or_default(),
            out.entries.len(),
            fragments.len(),
            spent
        );
    }
    Ok(out)
}

// ── Dispatch ─────────────────────────────────────────────────────────────

/// A planned fragment with its rendered prompt.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub entry: PlanEntry,
    pub prompt: Prompt,
}

/// Prompt inputs shared by every fragment of a document.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub format: TargetFormat,
    pub options: &'a ProcessingOptions,
    /// Rendered document digest.
    pub context: &'a str,
    pub max_input_units: usize,
}

/// Output of [`build_jobs`].
#[derive(Debug, Default)]
pub struct JobSet {
    pub jobs: Vec<DispatchJob>,
    /// Fragments whose content could not be fitted; failed without a call.
    pub rejected: Vec<FragmentResult>,
}

/// Render a prompt for every plan entry, compressing oversized content to
/// the input ceiling or the model's context window, whichever is smaller.
///
/// A fragment of which not even one word fits is rejected with
/// [`FragmentError::Oversized`] instead of being sent without content.
pub fn build_jobs(
    plan: &Plan,
    fragments: &[Fragment],
    catalog: &ModelCatalog,
    inputs: &PromptInputs<'_>,
) -> JobSet {
    let mut set = JobSet::default();
    for entry in &plan.entries {
        let Some(fragment) = fragments.get(entry.fragment_index) else {
            continue;
        };
        let window_room = catalog
            .get(&entry.model)
            .map(|m| {
                m.context_window
                    .saturating_sub(entry.params.max_output_units + PROMPT_OVERHEAD_UNITS)
            })
            .unwrap_or(inputs.max_input_units);
        let limit = inputs.max_input_units.min(window_room);
        let content = compress(&fragment.content, limit);
        if content.is_empty() {
            warn!(
                "Fragment {}: nothing fits {} input units of '{}'",
                fragment.id, limit, entry.model
            );
            set.rejected.push(FragmentResult {
                fragment_id: entry.fragment_id.clone(),
                index: entry.fragment_index,
                model: entry.model.clone(),
                latency_ms: 0,
                source: ResultSource::Dispatch,
                outcome: FragmentOutcome::Failure {
                    error: FragmentError::Oversized {
                        fragment: entry.fragment_id.to_string(),
                        model: entry.model.clone(),
                        limit,
                    },
                },
            });
            continue;
        }
        let prompt = build_prompt(
            PromptRole::for_fragment(inputs.format, fragment.tag),
            inputs.options,
            inputs.context,
            &content,
        );
        set.jobs.push(DispatchJob {
            entry: entry.clone(),
            prompt,
        });
    }
    set
}

/// Run `jobs` in batches; results come back sorted by fragment index.
///
/// `total` is the document's fragment count, used for progress events.
pub async fn dispatch(
    jobs: Vec<DispatchJob>,
    backend: &dyn ModelBackend,
    catalog: &ModelCatalog,
    config: &PipelineConfig,
    total: usize,
) -> Vec<FragmentResult> {
    let batch_size = config.batch_size.max(1);
    let batch_count = jobs.len().div_ceil(batch_size);
    let mut results = Vec::with_capacity(jobs.len());
    let mut jobs = jobs.into_iter().peekable();
    let mut batch_no = 0;

    while jobs.peek().is_some() {
        if batch_no > 0 && config.batch_delay_ms > 0 {
            sleep(Duration::from_millis(config.batch_delay_ms)).await;
        }
        batch_no += 1;
        let batch: Vec<DispatchJob> = jobs.by_ref().take(batch_size).collect();
        debug!("Dispatching batch {}/{} ({} fragments)", batch_no, batch_count, batch.len());

        let width = batch.len();
        let mut done: Vec<FragmentResult> = stream::iter(batch.into_iter().map(|job| async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_fragment_start(job.entry.fragment_index, total);
            }
            let result = dispatch_one(job, backend, catalog, config).await;
            if let Some(ref cb) = config.progress_callback {
                match &result.outcome {
                    FragmentOutcome::Success { text, .. } => {
                        cb.on_fragment_complete(result.index, total, text.len(), false)
                    }
                    FragmentOutcome::Failure { error } => {
                        cb.on_fragment_error(result.index, total, &error.to_string())
                    }
                }
            }
            result
        }))
        .buffer_unordered(width)
        .collect()
        .await;
        results.append(&mut done);
    }

    results.sort_by_key(|r| r.index);
    results
}

/// One fragment: timeout, retries, cost accounting.
///
/// Never fails; errors are folded into the returned result.
async fn dispatch_one(
    job: DispatchJob,
    backend: &dyn ModelBackend,
    catalog: &ModelCatalog,
    config: &PipelineConfig,
) -> FragmentResult {
    let start = Instant::now();
    let DispatchJob { entry, prompt } = job;
    let request = GenerationRequest {
        model: entry.model.clone(),
        prompt,
        temperature: entry.params.temperature,
        max_output_units: entry.params.max_output_units,
    };
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_err = BackendError::Transient("no attempt made".into());
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let mut backoff = config
                .retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1));
            if let BackendError::RateLimited {
                retry_after_secs: Some(secs),
            } = last_err
            {
                backoff = backoff.max(secs.saturating_mul(1000));
            }
            warn!(
                "Fragment {}: retry {}/{} after {}ms",
                entry.fragment_id, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, backend.generate(&request)).await {
            Ok(Ok(reply)) => {
                let input_units = reply
                    .input_units
                    .unwrap_or_else(|| estimate_units(&request.prompt.as_text()));
                let output_units = reply
                    .output_units
                    .unwrap_or_else(|| estimate_units(&reply.text));
                let cost = catalog
                    .get(&entry.model)
                    .map(|m| m.cost(input_units, output_units))
                    .unwrap_or_default();
                let latency = start.elapsed();
                debug!(
                    "Fragment {}: {} in / {} out units, ${:.6}, {:?}",
                    entry.fragment_id, input_units, output_units, cost, latency
                );
                return FragmentResult {
                    fragment_id: entry.fragment_id,
                    index: entry.fragment_index,
                    model: entry.model,
                    latency_ms: latency.as_millis() as u64,
                    source: ResultSource::Dispatch,
                    outcome: FragmentOutcome::Success {
                        text: reply.text,
                        input_units,
                        output_units,
                        cost,
                    },
                };
            }
            Ok(Err(e)) => {
                warn!(
                    "Fragment {}: attempt {} failed: {}",
                    entry.fragment_id,
                    attempt + 1,
                    e
                );
                let retryable = e.is_retryable();
                last_err = e;
                if !retryable {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "Fragment {}: attempt {} timed out after {}s",
                    entry.fragment_id,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = BackendError::Timeout;
            }
        }
    }

    let fragment = entry.fragment_id.to_string();
    let error = match last_err {
        BackendError::Timeout => FragmentError::Timeout {
            fragment,
            model: entry.model.clone(),
            secs: config.api_timeout_secs,
        },
        BackendError::Capability(detail) => FragmentError::Capability {
            fragment,
            model: entry.model.clone(),
            detail,
        },
        other => FragmentError::Backend {
            fragment,
            model: entry.model.clone(),
            retries: config.max_retries,
            detail: other.to_string(),
        },
    };
    warn!("{error}");

    FragmentResult {
        fragment_id: entry.fragment_id,
        index: entry.fragment_index,
        model: entry.model,
        latency_ms: start.elapsed().as_millis() as u64,
        source: ResultSource::Dispatch,
        outcome: FragmentOutcome::Failure { error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendReply;
    use crate::pipeline::cost::ModelProfile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> ModelCatalog {
        let mut c = ModelCatalog::empty();
        c.insert(
            ModelProfile::new("test", "budget", 0.001, 0.001)
                .capabilities(&[Capability::CreativeWrite, Capability::Summarize])
                .ratings(5.0, 5.0),
        );
        c.insert(
            ModelProfile::new("test", "premium", 0.01, 0.01)
                .capabilities(&[Capability::CreativeWrite, Capability::Summarize, Capability::Reason])
                .ratings(9.0, 9.0),
        );
        c
    }

    fn fragments(n: usize, words: usize) -> Vec<Fragment> {
        (0..n)
            .map(|i| {
                let text = vec![format!("word{i}"); words].join(" ");
                Fragment::new(i, i * 1000, text, FragmentTag::Narration)
            })
            .collect()
    }

    fn request(budget: Option<f64>) -> PlanRequest {
        PlanRequest {
            format: TargetFormat::Podcast,
            params: GenerationParams {
                temperature: 0.7,
                max_output_units: 2048,
            },
            max_input_units: 3000,
            quality_floor: 0.0,
            budget,
        }
    }

    fn cost_of(c: &ModelCatalog, model: &str, f: &Fragment) -> f64 {
        let w = fragment_workload(f, TargetFormat::Podcast, 2048, 3000);
        c.get(model).unwrap().cost(w.input_units, w.output_units)
    }

    #[test]
    fn capability_table() {
        let narration = Fragment::new(0, 0, "A calm story.", FragmentTag::Narration);
        let exercise = Fragment::new(0, 0, "Answer these.", FragmentTag::Exercise);
        let technical = Fragment::new(0, 0, "The algorithm runs in O(n).", FragmentTag::Section);
        assert_eq!(required_capability(TargetFormat::Translation, &narration), Capability::Translate);
        assert_eq!(required_capability(TargetFormat::Podcast, &narration), Capability::CreativeWrite);
        assert_eq!(required_capability(TargetFormat::ShortVideo, &narration), Capability::CreativeWrite);
        assert_eq!(required_capability(TargetFormat::Course, &exercise), Capability::Reason);
        assert_eq!(required_capability(TargetFormat::Course, &technical), Capability::Reason);
        assert_eq!(required_capability(TargetFormat::Course, &narration), Capability::Summarize);
    }

    #[test]
    fn unbounded_plan_uses_most_efficient_model() {
        let c = catalog();
        let frags = fragments(3, 50);
        let refs: Vec<&Fragment> = frags.iter().collect();
        let p = plan(&refs, &c, &request(None)).unwrap();
        assert!(p.is_complete());
        let budget_eff = c.get("budget").unwrap().efficiency();
        let premium_eff = c.get("premium").unwrap().efficiency();
        let expected = if premium_eff > budget_eff { "premium" } else { "budget" };
        assert!(p.entries.iter().all(|e| e.model == expected));
    }

    #[test]
    fn budget_for_two_of_three_leaves_one_unplanned() {
        let c = catalog();
        let frags = fragments(3, 50);
        let refs: Vec<&Fragment> = frags.iter().collect();
        let one = cost_of(&c, "budget", &frags[0]);
        let budget = one * 2.5;

        let p = plan(&refs, &c, &request(Some(budget))).unwrap();
        assert_eq!(p.entries.len(), 2);
        assert_eq!(p.unplanned_count(), 1);
        assert_eq!(p.unplanned[0], frags[2].id);
        assert!(p.estimated_cost() <= budget);
    }

    #[test]
    fn reserve_prefers_efficient_model_when_affordable() {
        let mut c = catalog();
        // Most efficient, but twice the price of "budget".
        c.insert(
            ModelProfile::new("test", "mid", 0.002, 0.002)
                .capabilities(&[Capability::CreativeWrite])
                .ratings(10.0, 10.0),
        );
        let frags = fragments(2, 50);
        let refs: Vec<&Fragment> = frags.iter().collect();
        let mid = cost_of(&c, "mid", &frags[0]);
        let cheap = cost_of(&c, "budget", &frags[1]);

        let p = plan(&refs, &c, &request(Some(mid + cheap))).unwrap();
        assert!(p.is_complete());
        assert!(p.estimated_cost() <= mid + cheap);
        assert_eq!(p.entries[0].model, "mid");
        assert_eq!(p.entries[1].model, "budget");
    }

    #[test]
    fn larger_budget_never_plans_fewer() {
        let c = catalog();
        let frags = fragments(6, 80);
        let refs: Vec<&Fragment> = frags.iter().collect();
        let mut last = 0;
        for step in 0..40 {
            let budget = step as f64 * 0.002;
            let p = plan(&refs, &c, &request(Some(budget))).unwrap();
            assert!(p.estimated_cost() <= budget, "over budget at {budget}");
            assert!(p.entries.len() >= last, "fewer planned at {budget}");
            last = p.entries.len();
        }
        assert_eq!(last, 6);
    }

    #[test]
    fn missing_capability_fails_before_planning() {
        let mut c = catalog();
        c.retain(|m| m.name == "budget");
        let f = Fragment::new(0, 0, "Exercise one.", FragmentTag::Exercise);
        let req = PlanRequest {
            format: TargetFormat::Course,
            ..request(None)
        };
        let err = plan(&[&f], &c, &req).unwrap_err();
        assert!(matches!(
            err,
            RepurposeError::CapabilityUnavailable {
                capability: Capability::Reason,
                ..
            }
        ));
    }

    struct FlakyBackend {
        calls: AtomicUsize,
        fail_first: usize,
        error: BackendError,
    }

    #[async_trait]
    impl ModelBackend for FlakyBackend {
        async fn generate(&self, request: &GenerationRequest) -> Result<BackendReply, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(BackendReply {
                    text: format!("ok from {}", request.model),
                    input_units: Some(100),
                    output_units: Some(50),
                })
            }
        }
    }

    fn job(f: &Fragment) -> DispatchJob {
        DispatchJob {
            entry: PlanEntry {
                fragment_index: f.index,
                fragment_id: f.id.clone(),
                model: "budget".into(),
                params: GenerationParams {
                    temperature: 0.7,
                    max_output_units: 100,
                },
                capability: Capability::CreativeWrite,
                workload: Workload {
                    input_units: 10,
                    output_units: 10,
                },
                estimated_cost: 0.0,
            },
            prompt: Prompt {
                system: "s".into(),
                user: f.content.clone(),
            },
        }
    }

    fn fast_config(max_retries: u32) -> PipelineConfig {
        PipelineConfig::builder()
            .batch_size(2)
            .batch_delay_ms(0)
            .retry_backoff_ms(1)
            .max_retries(max_retries)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            error: BackendError::Transient("503".into()),
        };
        let f = &fragments(1, 5)[0];
        let out = dispatch(vec![job(f)], &backend, &catalog(), &fast_config(2), 1).await;
        assert!(out[0].is_success());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        // Reported usage: 100 in + 50 out at $0.001/1K each.
        assert!((out[0].cost() - 0.00015).abs() < 1e-12);
    }

    #[tokio::test]
    async fn capability_errors_are_not_retried() {
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 10,
            error: BackendError::Capability("too long".into()),
        };
        let f = &fragments(1, 5)[0];
        let out = dispatch(vec![job(f)], &backend, &catalog(), &fast_config(3), 1).await;
        assert!(matches!(out[0].error(), Some(FragmentError::Capability { .. })));
        assert_eq!(out[0].cost(), 0.0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn results_are_sorted_across_batches() {
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            error: BackendError::Timeout,
        };
        let frags = fragments(5, 5);
        let jobs = frags.iter().rev().map(job).collect();
        let out = dispatch(jobs, &backend, &catalog(), &fast_config(0), 5).await;
        let idx: Vec<usize> = out.iter().map(|r| r.index).collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn oversized_content_is_compressed_in_prompt() {
        let c = catalog();
        let text = (0..200)
            .map(|i| format!("Sentence number {i} talks about topic {}.", i % 7))
            .collect::<Vec<_>>()
            .join(" ");
        let frags = vec![Fragment::new(0, 0, text, FragmentTag::Narration)];
        let refs: Vec<&Fragment> = frags.iter().collect();
        let p = plan(&refs, &c, &request(None)).unwrap();
        let options = ProcessingOptions::default();
        let inputs = PromptInputs {
            format: TargetFormat::Podcast,
            options: &options,
            context: "",
            max_input_units: 100,
        };
        let set = build_jobs(&p, &frags, &c, &inputs);
        assert_eq!(set.jobs.len(), 1);
        assert!(set.rejected.is_empty());
        let body = set.jobs[0]
            .prompt
            .user
            .trim_start_matches("Source passage:\n\"\"\"\n")
            .trim_end_matches("\n\"\"\"");
        assert!(estimate_units(body) <= 100);
        assert!(!body.is_empty());
    }

    fn inputs(options: &ProcessingOptions, max_input_units: usize) -> PromptInputs<'_> {
        PromptInputs {
            format: TargetFormat::Podcast,
            options,
            context: "Document summary: about words\n",
            max_input_units,
        }
    }

    #[test]
    fn unpunctuated_fragment_keeps_its_leading_words() {
        let c = catalog();
        let text = (0..60).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let frags = vec![Fragment::new(0, 0, text, FragmentTag::Narration)];
        let p = Plan {
            entries: vec![job(&frags[0]).entry],
            ..Plan::default()
        };
        let options = ProcessingOptions::default();
        let set = build_jobs(&p, &frags, &c, &inputs(&options, 50));
        assert!(set.rejected.is_empty());
        let user = &set.jobs[0].prompt.user;
        assert!(user.ends_with("w36 w37\n\"\"\""), "got: {user}");
        assert!(!user.contains("\"\"\"\n\n\"\"\""));
        assert!(!user.contains("belongs to"));
    }

    #[test]
    fn fragment_with_no_room_is_rejected_without_a_call() {
        let mut c = catalog();
        c.insert(
            ModelProfile::new("test", "tiny", 0.001, 0.001)
                .capabilities(&[Capability::CreativeWrite])
                .context_window(100 + PROMPT_OVERHEAD_UNITS),
        );
        let frags = fragments(1, 5);
        let mut entry = job(&frags[0]).entry;
        entry.model = "tiny".into();
        let p = Plan {
            entries: vec![entry],
            ..Plan::default()
        };
        let options = ProcessingOptions::default();
        let set = build_jobs(&p, &frags, &c, &inputs(&options, 3000));
        assert!(set.jobs.is_empty());
        assert_eq!(set.rejected.len(), 1);
        assert!(matches!(
            set.rejected[0].error(),
            Some(FragmentError::Oversized { limit: 0, .. })
        ));
        assert_eq!(set.rejected[0].cost(), 0.0);
    }

    #[tokio::test]
    async fn huge_retry_counts_do_not_overflow_backoff() {
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_first: 80,
            error: BackendError::Transient("503".into()),
        };
        let config = PipelineConfig::builder()
            .batch_delay_ms(0)
            .retry_backoff_ms(0)
            .max_retries(100)
            .build()
            .unwrap();
        let f = &fragments(1, 5)[0];
        let out = dispatch(vec![job(f)], &backend, &catalog(), &config, 1).await;
        assert!(out[0].is_success());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 81);
    }
}
