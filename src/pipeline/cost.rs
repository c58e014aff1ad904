//! Cost model: model catalog, unit estimates and cost arithmetic.
//!
//! Prices are in USD per 1 000 units (tokens). Unit counts are *estimates*
//! derived from word counts with a fixed multiplier; every budget decision
//! treats them as upper bounds, never as ground truth. The authoritative
//! spend is the sum of real per-call costs, which the orchestrator reports
//! separately and never feeds back into a budget check.

use crate::config::{PipelineConfig, ProcessingOptions};
use crate::document::{Document, TargetFormat};
use crate::error::RepurposeError;
use crate::pipeline::chunk::segment;
use crate::pipeline::orchestrator::{fragment_workload, required_capability};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Estimated tokens per whitespace-delimited word.
pub const UNITS_PER_WORD: f64 = 1.3;

/// Fixed allowance for the system prompt and document digest in each request.
pub const PROMPT_OVERHEAD_UNITS: usize = 200;

/// Estimate the unit count of `text`.
pub fn estimate_units(text: &str) -> usize {
    units_for_words(text.split_whitespace().count())
}

pub fn units_for_words(words: usize) -> usize {
    (words as f64 * UNITS_PER_WORD).ceil() as usize
}

// ── Capabilities ─────────────────────────────────────────────────────────

/// The kind of transformation a model is suited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Summarize,
    Translate,
    CreativeWrite,
    Reason,
}

impl Capability {
    pub fn label(&self) -> &'static str {
        match self {
            Capability::Summarize => "summarize",
            Capability::Translate => "translate",
            Capability::CreativeWrite => "creative-write",
            Capability::Reason => "reason",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Model profiles ───────────────────────────────────────────────────────

/// Pricing, limits and ratings for one backend model. Read-only reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model identifier passed to the backend, e.g. "gpt-4.1-nano".
    pub name: String,
    /// Provider name understood by `edgequake_llm::ProviderFactory`.
    pub provider: String,
    pub capabilities: Vec<Capability>,
    /// USD per 1K input units.
    pub input_per_1k: f64,
    /// USD per 1K output units.
    pub output_per_1k: f64,
    /// Maximum input + output units per request.
    pub context_window: usize,
    /// Relative speed rating, 0–10.
    pub speed: f64,
    /// Relative quality rating, 0–10.
    pub quality: f64,
}

impl ModelProfile {
    pub fn new(
        provider: impl Into<String>,
        name: impl Into<String>,
        input_per_1k: f64,
        output_per_1k: f64,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            capabilities: Vec::new(),
            input_per_1k,
            output_per_1k,
            context_window: 128_000,
            speed: 5.0,
            quality: 5.0,
        }
    }

    pub fn capabilities(mut self, caps: &[Capability]) -> Self {
        self.capabilities = caps.to_vec();
        self
    }

    pub fn context_window(mut self, units: usize) -> Self {
        self.context_window = units;
        self
    }

    pub fn ratings(mut self, speed: f64, quality: f64) -> Self {
        self.speed = speed;
        self.quality = quality;
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Mean of input and output price per 1K units.
    pub fn blended_per_1k(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }

    /// quality × speed / cost. Free models are clamped to a tiny price.
    pub fn efficiency(&self) -> f64 {
        self.quality * self.speed / self.blended_per_1k().max(1e-6)
    }

    /// Cost in USD for the given unit counts.
    pub fn cost(&self, input_units: usize, output_units: usize) -> f64 {
        (input_units as f64 * self.input_per_1k + output_units as f64 * self.output_per_1k)
            / 1000.0
    }

    fn fits(&self, workload: &Workload) -> bool {
        workload.input_units + workload.output_units <= self.context_window
    }
}

/// Ordered collection of model profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelProfile>,
}

impl ModelCatalog {
    /// A catalog pre-populated with common hosted models.
    pub fn with_defaults() -> Self {
        use Capability::*;

        let mut catalog = Self::empty();

        // ── OpenAI ─────────────────────────────────────────────────
        catalog.insert(
            ModelProfile::new("openai", "gpt-4.1-nano", 0.0001, 0.0004)
                .capabilities(&[Summarize, Translate, CreativeWrite])
                .ratings(9.0, 6.0),
        );
        catalog.insert(
            ModelProfile::new("openai", "gpt-4.1-mini", 0.0004, 0.0016)
                .capabilities(&[Summarize, Translate, CreativeWrite, Reason])
                .ratings(8.0, 7.5),
        );
        catalog.insert(
            ModelProfile::new("openai", "gpt-4.1", 0.002, 0.008)
                .capabilities(&[Summarize, Translate, CreativeWrite, Reason])
                .ratings(6.0, 9.0),
        );

        // ── Anthropic ──────────────────────────────────────────────
        catalog.insert(
            ModelProfile::new("anthropic", "claude-3-5-haiku-latest", 0.0008, 0.004)
                .capabilities(&[Summarize, Translate, CreativeWrite])
                .context_window(200_000)
                .ratings(8.0, 7.0),
        );
        catalog.insert(
            ModelProfile::new("anthropic", "claude-sonnet-4-20250514", 0.003, 0.015)
                .capabilities(&[Summarize, Translate, CreativeWrite, Reason])
                .context_window(200_000)
                .ratings(6.0, 9.5),
        );

        // ── Google ─────────────────────────────────────────────────
        catalog.insert(
            ModelProfile::new("gemini", "gemini-2.0-flash", 0.0001, 0.0004)
                .capabilities(&[Summarize, Translate, Reason])
                .context_window(1_000_000)
                .ratings(9.0, 6.5),
        );

        // ── Mistral ────────────────────────────────────────────────
        catalog.insert(
            ModelProfile::new("mistral", "mistral-small-latest", 0.0002, 0.0006)
                .capabilities(&[Summarize, Translate])
                .context_window(32_000)
                .ratings(8.0, 6.0),
        );

        catalog
    }

    pub fn empty() -> Self {
        Self { models: Vec::new() }
    }

    /// Parse a JSON array of [`ModelProfile`]s.
    pub fn from_json_str(json: &str) -> Result<Self, RepurposeError> {
        let models: Vec<ModelProfile> =
            serde_json::from_str(json).map_err(|e| RepurposeError::CatalogParse(e.to_string()))?;
        let mut catalog = Self::empty();
        for m in models {
            if m.input_per_1k < 0.0 || m.output_per_1k < 0.0 {
                return Err(RepurposeError::CatalogParse(format!(
                    "model '{}' has a negative price",
                    m.name
                )));
            }
            catalog.insert(m);
        }
        Ok(catalog)
    }

    /// Add a model, replacing any existing entry with the same name.
    pub fn insert(&mut self, profile: ModelProfile) {
        match self.models.iter_mut().find(|m| m.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.models.push(profile),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelProfile> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn models(&self) -> &[ModelProfile] {
        &self.models
    }

    pub fn retain(&mut self, f: impl FnMut(&ModelProfile) -> bool) {
        self.models.retain(f);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn advertises(&self, capability: Capability) -> bool {
        self.models.iter().any(|m| m.supports(capability))
    }
}

// ── Estimates ────────────────────────────────────────────────────────────

/// Estimated input and output units for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub input_units: usize,
    pub output_units: usize,
}

impl Workload {
    /// Estimate the workload of repurposing `text` into `format`.
    pub fn for_text(text: &str, format: TargetFormat, max_output_units: usize) -> Self {
        let content_units = estimate_units(text);
        let expected = (content_units as f64 * format.output_ratio()).ceil() as usize;
        Self {
            input_units: content_units + PROMPT_OVERHEAD_UNITS,
            output_units: expected.clamp(1, max_output_units.max(1)),
        }
    }
}

/// How to pick a model when estimating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostStrategy {
    Cheapest,
    MostEfficient,
    Model(String),
}

/// Itemised estimated cost of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub model: String,
    pub provider: String,
    pub input_units: usize,
    pub output_units: usize,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total: f64,
}

impl CostBreakdown {
    fn new(model: &ModelProfile, workload: &Workload) -> Self {
        let input_cost = workload.input_units as f64 * model.input_per_1k / 1000.0;
        let output_cost = workload.output_units as f64 * model.output_per_1k / 1000.0;
        Self {
            model: model.name.clone(),
            provider: model.provider.clone(),
            input_units: workload.input_units,
            output_units: workload.output_units,
            input_cost,
            output_cost,
            total: input_cost + output_cost,
        }
    }
}

/// Whole-document estimate, one breakdown per fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEstimate {
    pub fragments: usize,
    pub breakdowns: Vec<CostBreakdown>,
    pub total: f64,
}

/// Cost arithmetic and model selection over a [`ModelCatalog`].
#[derive(Debug, Clone)]
pub struct CostModel<'a> {
    catalog: &'a ModelCatalog,
}

impl<'a> CostModel<'a> {
    pub fn new(catalog: &'a ModelCatalog) -> Self {
        Self { catalog }
    }

    /// Cost of a call to `model`, or `None` if the model is not in the catalog.
    pub fn calculate(&self, model: &str, input_units: usize, output_units: usize) -> Option<f64> {
        self.catalog
            .get(model)
            .map(|m| m.cost(input_units, output_units))
    }

    /// Models able to serve `capability` for `workload`, most efficient first.
    pub fn ranked(
        &self,
        capability: Capability,
        quality_floor: f64,
        workload: &Workload,
    ) -> Vec<&'a ModelProfile> {
        let mut capable: Vec<&ModelProfile> = self
            .catalog
            .models()
            .iter()
            .filter(|m| m.supports(capability) && m.quality >= quality_floor && m.fits(workload))
            .collect();
        capable.sort_by(|a, b| {
            b.efficiency()
                .total_cmp(&a.efficiency())
                .then_with(|| a.name.cmp(&b.name))
        });
        capable
    }

    /// Cheapest model able to serve `capability` for `workload`, with its cost.
    pub fn cheapest_for(
        &self,
        capability: Capability,
        quality_floor: f64,
        workload: &Workload,
    ) -> Option<(&'a ModelProfile, f64)> {
        self.ranked(capability, quality_floor, workload)
            .into_iter()
            .map(|m| (m, m.cost(workload.input_units, workload.output_units)))
            .min_by(|(a, ca), (b, cb)| cheaper_first(a, *ca, b, *cb))
    }

    /// Estimate the cost of `workload` under `strategy`.
    pub fn estimate(
        &self,
        workload: &Workload,
        capability: Capability,
        strategy: &CostStrategy,
    ) -> Result<CostBreakdown, RepurposeError> {
        let model = match strategy {
            CostStrategy::Cheapest => self.cheapest_for(capability, 0.0, workload).map(|(m, _)| m),
            CostStrategy::MostEfficient => {
                self.ranked(capability, 0.0, workload).into_iter().next()
            }
            CostStrategy::Model(name) => {
                let model = self.catalog.get(name).ok_or_else(|| {
                    RepurposeError::InvalidOptions(format!("unknown model '{name}'"))
                })?;
                Some(model).filter(|m| m.supports(capability))
            }
        };
        model
            .map(|m| CostBreakdown::new(m, workload))
            .ok_or_else(|| RepurposeError::CapabilityUnavailable {
                capability,
                fragment: "<estimate>".into(),
            })
    }

    /// Cheapest-model estimate for every fragment of `document`.
    ///
    /// Ignores the budget and the cache; this is the lower bound the CLI
    /// reports in `--estimate` mode.
    pub fn estimate_document(
        &self,
        document: &Document,
        format: TargetFormat,
        config: &PipelineConfig,
        options: &ProcessingOptions,
    ) -> Result<DocumentEstimate, RepurposeError> {
        let max_output_units = options.effective_max_output_units(config);
        let fragments = segment(document, format, &config.segment).fragments;
        let mut breakdowns = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            let capability = required_capability(format, fragment);
            let workload =
                fragment_workload(fragment, format, max_output_units, config.max_input_units);
            let (model, _) = self
                .cheapest_for(capability, config.quality_floor, &workload)
                .ok_or_else(|| RepurposeError::CapabilityUnavailable {
                    capability,
                    fragment: fragment.id.to_string(),
                })?;
            breakdowns.push(CostBreakdown::new(model, &workload));
        }
        Ok(DocumentEstimate {
            total: breakdowns.iter().map(|b| b.total).sum(),
            fragments: fragments.len(),
            breakdowns,
        })
    }

    /// Cheapest model advertising `capability` with quality at least
    /// `quality_floor` and a blended price per unit no higher than
    /// `budget_per_unit` (if given).
    pub fn select_cheapest(
        &self,
        capability: Capability,
        quality_floor: f64,
        budget_per_unit: Option<f64>,
    ) -> Option<&'a ModelProfile> {
        self.catalog
            .models()
            .iter()
            .filter(|m| m.supports(capability) && m.quality >= quality_floor)
            .filter(|m| budget_per_unit.is_none_or(|b| m.blended_per_1k() / 1000.0 <= b))
            .min_by(|a, b| cheaper_first(a, a.blended_per_1k(), b, b.blended_per_1k()))
    }
}

/// Lower cost first; on ties, higher quality, then name.
fn cheaper_first(a: &ModelProfile, ca: f64, b: &ModelProfile, cb: f64) -> Ordering {
    ca.total_cmp(&cb)
        .then_with(|| b.quality.total_cmp(&a.quality))
        .then_with(|| a.name.cmp(&b.name))
}
