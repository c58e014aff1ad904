//! Configuration types for document repurposing.
//!
//! Two layers of configuration exist:
//!
//! * [`PipelineConfig`] — long-lived knobs of a [`crate::coordinator::Pipeline`]
//!   (batching, retries, timeouts, segmentation ceilings, cache policy),
//!   built via [`PipelineConfigBuilder`].
//! * [`ProcessingOptions`] — per-request choices (budget, target language,
//!   tone…), validated before any backend call is made.
//!
//! Only the request options that change what a model writes participate in
//! the cache fingerprint; see [`CacheConfig::key_options`].

use crate::document::TargetFormat;
use crate::error::RepurposeError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Configuration for a [`crate::coordinator::Pipeline`].
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_repurpose::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .batch_size(8)
///     .api_timeout_secs(30)
///     .cache_capacity(5_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Fragments dispatched concurrently per batch. Default: 5.
    ///
    /// Batches run one after another, so this is also the maximum number of
    /// in-flight backend calls for one document.
    pub batch_size: usize,

    /// Pause between batches in milliseconds. Default: 250.
    ///
    /// A courtesy towards provider rate limits; set to 0 for local models.
    pub batch_delay_ms: u64,

    /// Documents processed concurrently by `process_batch`. Default: 3.
    pub document_concurrency: usize,

    /// Retries on a transient backend failure. Default: 2.
    ///
    /// Capability errors are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Sampling temperature unless a request overrides it. Default: 0.7.
    ///
    /// Repurposing is a rewriting task, so the default is higher than a
    /// transcription pipeline would use.
    pub temperature: f32,

    /// Maximum units a model may generate per fragment. Default: 2048.
    pub max_output_units: usize,

    /// Fragment content above this many units is compressed before it is
    /// placed in a prompt. Default: 3000.
    pub max_input_units: usize,

    /// Minimum quality rating (0–10) a model needs to be planned. Default: 0.
    pub quality_floor: f64,

    /// Segmentation ceilings.
    pub segment: SegmentOptions,

    /// Fragment cache policy.
    pub cache: CacheConfig,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay_ms: 250,
            document_concurrency: 3,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            temperature: 0.7,
            max_output_units: 2048,
            max_input_units: 3000,
            quality_floor: 0.0,
            segment: SegmentOptions::default(),
            cache: CacheConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("batch_size", &self.batch_size)
            .field("batch_delay_ms", &self.batch_delay_ms)
            .field("document_concurrency", &self.document_concurrency)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_output_units", &self.max_output_units)
            .field("max_input_units", &self.max_input_units)
            .field("quality_floor", &self.quality_floor)
            .field("segment", &self.segment)
            .field("cache", &self.cache)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressObserver>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn batch_delay_ms(mut self, ms: u64) -> Self {
        self.config.batch_delay_ms = ms;
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_units(mut self, n: usize) -> Self {
        self.config.max_output_units = n;
        self
    }

    pub fn max_input_units(mut self, n: usize) -> Self {
        self.config.max_input_units = n;
        self
    }

    pub fn quality_floor(mut self, q: f64) -> Self {
        self.config.quality_floor = q;
        self
    }

    pub fn segment(mut self, options: SegmentOptions) -> Self {
        self.config.segment = options;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache.ttl_secs = secs;
        self
    }

    pub fn cache_capacity(mut self, n: usize) -> Self {
        self.config.cache.capacity = n;
        self
    }

    /// Replace the set of request options that participate in cache keys.
    pub fn cache_key_options<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.cache.key_options = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, RepurposeError> {
        let c = &self.config;
        if c.max_output_units == 0 {
            return Err(RepurposeError::InvalidOptions(
                "max_output_units must be ≥ 1".into(),
            ));
        }
        if c.max_input_units < 50 {
            return Err(RepurposeError::InvalidOptions(format!(
                "max_input_units must be ≥ 50, got {}",
                c.max_input_units
            )));
        }
        if !(0.0..=10.0).contains(&c.quality_floor) {
            return Err(RepurposeError::InvalidOptions(format!(
                "quality_floor must be 0–10, got {}",
                c.quality_floor
            )));
        }
        if c.cache.capacity == 0 {
            return Err(RepurposeError::InvalidOptions(
                "cache capacity must be ≥ 1".into(),
            ));
        }
        c.segment.validate()?;
        Ok(self.config)
    }
}

// ── Segmentation ─────────────────────────────────────────────────────────

/// Ceilings used by the chunk planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentOptions {
    /// Speaking rate used to turn words into minutes. Default: 150.
    pub words_per_minute: usize,
    /// Podcast fragment ceiling in minutes. Default: 4.
    pub segment_minutes: f64,
    /// Podcast episode ceiling in minutes. Default: 20.
    pub episode_minutes: f64,
    /// Translation / course fallback fragment ceiling in units. Default: 1500.
    pub max_fragment_units: usize,
    /// Longest short-video beat in words. Default: 120.
    pub beat_max_words: usize,
    /// Beats shorter than this merge into a neighbour. Default: 20.
    pub min_beat_words: usize,
    /// Beats per short-video scene. Default: 3.
    pub beats_per_scene: usize,
    /// Fragments per synthetic module when a course has no markers. Default: 3.
    pub sections_per_module: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            words_per_minute: 150,
            segment_minutes: 4.0,
            episode_minutes: 20.0,
            max_fragment_units: 1500,
            beat_max_words: 120,
            min_beat_words: 20,
            beats_per_scene: 3,
            sections_per_module: 3,
        }
    }
}

impl SegmentOptions {
    fn validate(&self) -> Result<(), RepurposeError> {
        if self.words_per_minute == 0 {
            return Err(RepurposeError::InvalidOptions(
                "words_per_minute must be ≥ 1".into(),
            ));
        }
        if !(self.segment_minutes > 0.0 && self.episode_minutes > 0.0) {
            return Err(RepurposeError::InvalidOptions(
                "segment and episode durations must be positive".into(),
            ));
        }
        if self.max_fragment_units == 0 || self.beat_max_words == 0 {
            return Err(RepurposeError::InvalidOptions(
                "fragment ceilings must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Cache policy ─────────────────────────────────────────────────────────

/// Fragment cache policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in seconds. Default: 3600.
    pub ttl_secs: u64,
    /// Maximum entries before least-recently-used eviction. Default: 1000.
    pub capacity: usize,
    /// Named request options that belong in the fingerprint. Every
    /// [`ProcessingOptions::extra`] entry is rendered into the prompt and is
    /// always part of the fingerprint, whatever this set says.
    pub key_options: BTreeSet<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 1000,
            key_options: DEFAULT_KEY_OPTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Prefix of fingerprint names derived from [`ProcessingOptions::extra`].
pub const EXTRA_KEY_PREFIX: &str = "extra.";

/// Options known to change what a model writes.
pub const DEFAULT_KEY_OPTIONS: [&str; 6] = [
    "target_language",
    "tone",
    "audience",
    "temperature",
    "max_output_units",
    "system_prompt",
];

// ── Per-request options ──────────────────────────────────────────────────

/// Per-request processing options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Maximum *estimated* spend in USD. `None` = unbounded.
    pub budget: Option<f64>,
    /// Required for [`TargetFormat::Translation`].
    pub target_language: Option<String>,
    /// e.g. "conversational", "academic".
    pub tone: Option<String>,
    /// e.g. "beginners", "executives".
    pub audience: Option<String>,
    /// Overrides [`PipelineConfig::temperature`].
    pub temperature: Option<f32>,
    /// Overrides [`PipelineConfig::max_output_units`].
    pub max_output_units: Option<usize>,
    /// Replaces the built-in format prompt.
    pub system_prompt: Option<String>,
    /// Free-form options rendered into prompts as `- key: value`.
    pub extra: BTreeMap<String, String>,
}

impl ProcessingOptions {
    pub fn budget(mut self, usd: f64) -> Self {
        self.budget = Some(usd);
        self
    }

    pub fn target_language(mut self, lang: impl Into<String>) -> Self {
        self.target_language = Some(lang.into());
        self
    }

    pub fn tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_output_units(mut self, n: usize) -> Self {
        self.max_output_units = Some(n);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Reject malformed options before any spend happens.
    pub fn validate(&self, format: TargetFormat) -> Result<(), RepurposeError> {
        if let Some(b) = self.budget {
            if !b.is_finite() || b < 0.0 {
                return Err(RepurposeError::InvalidOptions(format!(
                    "budget must be a non-negative amount, got {b}"
                )));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RepurposeError::InvalidOptions(format!(
                    "temperature must be 0–2, got {t}"
                )));
            }
        }
        if self.max_output_units == Some(0) {
            return Err(RepurposeError::InvalidOptions(
                "max_output_units must be ≥ 1".into(),
            ));
        }
        if format == TargetFormat::Translation
            && self
                .target_language
                .as_deref()
                .is_none_or(|l| l.trim().is_empty())
        {
            return Err(RepurposeError::InvalidOptions(
                "translation requires a target language".into(),
            ));
        }
        Ok(())
    }

    pub fn effective_temperature(&self, config: &PipelineConfig) -> f32 {
        self.temperature.unwrap_or(config.temperature)
    }

    pub fn effective_max_output_units(&self, config: &PipelineConfig) -> usize {
        self.max_output_units.unwrap_or(config.max_output_units)
    }

    /// Every output-affecting option as `(name, value)`, effective values
    /// resolved against `config`. Extras are named `extra.<key>`; the cache
    /// keeps those plus the allow-listed names.
    pub fn key_material(&self, config: &PipelineConfig) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut push = |name: &str, value: Option<String>| {
            if let Some(v) = value {
                pairs.push((name.to_string(), v));
            }
        };
        push("target_language", self.target_language.clone());
        push("tone", self.tone.clone());
        push("audience", self.audience.clone());
        push(
            "temperature",
            Some(format!("{:.3}", self.effective_temperature(config))),
        );
        push(
            "max_output_units",
            Some(self.effective_max_output_units(config).to_string()),
        );
        push("system_prompt", self.system_prompt.clone());
        for (k, v) in &self.extra {
            push(&format!("{EXTRA_KEY_PREFIX}{k}"), Some(v.clone()));
        }
        pairs
    }
}
