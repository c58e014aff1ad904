//! Fragment cache: content-addressed store of successful fragment results.
//!
//! An entry is keyed by a SHA-256 fingerprint over everything that changes
//! what a model would write for a fragment:
//!
//! - the exact fragment content,
//! - the target format,
//! - the effective prompt role and required capability,
//! - the allow-listed request options ([`CacheConfig::key_options`]),
//! - every free-form `extra` option, since each one reaches the prompt.
//!
//! Options outside the allow-list (the budget, for instance) never
//! fragment the cache. Entries expire lazily after the TTL and the least
//! recently used entry is evicted once capacity is exceeded. Failures are
//! never stored.

use crate::config::{CacheConfig, EXTRA_KEY_PREFIX};
use crate::document::{Fragment, TargetFormat};
use crate::output::FragmentResult;
use crate::pipeline::cost::Capability;
use crate::pipeline::orchestrator::required_capability;
use crate::prompts::PromptRole;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before the first lookup.
    pub hit_rate: f64,
    pub size: usize,
    pub evictions: u64,
    pub expirations: u64,
}

/// Fingerprint of one fragment request.
///
/// `options` are `(name, value)` pairs as produced by
/// [`crate::config::ProcessingOptions::key_material`]; names in `allow`
/// and every `extra.` name contribute.
pub fn fingerprint(
    content: &str,
    format: TargetFormat,
    role: PromptRole,
    capability: Capability,
    options: &[(String, String)],
    allow: &BTreeSet<String>,
) -> String {
    let mut selected: Vec<&(String, String)> =
        options
        .iter()
        .filter(|(k, _)| allow.contains(k) || k.starts_with(EXTRA_KEY_PREFIX))
        .collect();
    selected.sort();

    let mut hasher = Sha256::new();
    // Length-prefixed fields so no two distinct inputs share a byte stream.
    let mut field = |bytes: &[u8]| {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };
    field(content.as_bytes());
    field(format.label().as_bytes());
    field(role.label().as_bytes());
    field(capability.label().as_bytes());
    for (k, v) in selected {
        field(k.as_bytes());
        field(v.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: FragmentResult,
    inserted: Instant,
    tick: u64,
}

/// In-memory LRU + TTL store of successful [`FragmentResult`]s.
#[derive(Debug)]
pub struct FragmentCache {
    entries: HashMap<String, CacheEntry>,
    /// Recency tick → key; the first entry is the least recently used.
    recency: BTreeMap<u64, String>,
    ttl: Duration,
    capacity: usize,
    key_options: BTreeSet<String>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl FragmentCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            ttl: Duration::from_secs(config.ttl_secs),
            capacity: config.capacity.max(1),
            key_options: config.key_options.clone(),
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Fingerprint `fragment` as it would be requested for `format`.
    pub fn key_for(
        &self,
        fragment: &Fragment,
        format: TargetFormat,
        options: &[(String, String)],
    ) -> String {
        fingerprint(
            &fragment.content,
            format,
            PromptRole::for_fragment(format, fragment.tag),
            required_capability(format, fragment),
            options,
            &self.key_options,
        )
    }

    /// Look up a fresh entry, refreshing its recency. Counts a hit or miss.
    pub fn get(
        &mut self,
        fragment: &Fragment,
        format: TargetFormat,
        options: &[(String, String)],
    ) -> Option<FragmentResult> {
        let key = self.key_for(fragment, format, options);
        self.get_by_key(&key)
    }

    pub fn get_by_key(&mut self, key: &str) -> Option<FragmentResult> {
        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => entry.inserted.elapsed() >= self.ttl,
        };
        if expired {
            self.remove(key);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }

        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.to_string());
        self.hits += 1;
        Some(entry.result.clone())
    }

    /// Whether `key` holds a fresh entry. Touches neither recency nor stats.
    pub fn contains_fresh(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.inserted.elapsed() < self.ttl)
    }

    /// Store a successful result. Failures are ignored; returns whether the
    /// result was stored.
    pub fn put(
        &mut self,
        fragment: &Fragment,
        format: TargetFormat,
        options: &[(String, String)],
        result: &FragmentResult,
    ) -> bool {
        let key = self.key_for(fragment, format, options);
        self.put_by_key(key, result)
    }

    pub fn put_by_key(&mut self, key: String, result: &FragmentResult) -> bool {
        if !result.is_success() {
            return false;
        }
        self.remove(&key);
        self.tick += 1;
        self.recency.insert(self.tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                inserted: Instant::now(),
                tick: self.tick,
            },
        );
        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
        }
        true
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn clear_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.inserted.elapsed() >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    /// Drop expired entries and release spare memory.
    pub fn optimize(&mut self) -> usize {
        let removed = self.clear_expired();
        self.entries.shrink_to_fit();
        debug!(
            "Cache optimized: {} expired removed, {} live",
            removed,
            self.entries.len()
        );
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
            size: self.entries.len(),
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, ProcessingOptions};
    use crate::document::FragmentTag;
    use crate::error::FragmentError;
    use crate::output::{FragmentOutcome, ResultSource};

    fn cfg(ttl_secs: u64, capacity: usize) -> CacheConfig {
        CacheConfig {
            ttl_secs,
            capacity,
            ..CacheConfig::default()
        }
    }

    fn ok_result(fragment: &Fragment, text: &str) -> FragmentResult {
        FragmentResult {
            fragment_id: fragment.id.clone(),
            index: fragment.index,
            model: "m".into(),
            latency_ms: 5,
            source: ResultSource::Dispatch,
            outcome: FragmentOutcome::Success {
                text: text.into(),
                input_units: 1,
                output_units: 1,
                cost: 0.1,
            },
        }
    }

    fn opts(o: ProcessingOptions) -> Vec<(String, String)> {
        o.key_material(&PipelineConfig::default())
    }

    #[test]
    fn hit_after_put_and_stats() {
        let mut cache = FragmentCache::new(&CacheConfig::default());
        let f = Fragment::new(0, 0, "Hello there.", FragmentTag::Narration);
        let o = opts(ProcessingOptions::default());

        assert!(cache.get(&f, TargetFormat::Podcast, &o).is_none());
        assert!(cache.put(&f, TargetFormat::Podcast, &o, &ok_result(&f, "hi")));
        let key = cache.key_for(&f, TargetFormat::Podcast, &o);
        assert!(cache.contains_fresh(&key));
        let hit = cache.get(&f, TargetFormat::Podcast, &o).unwrap();
        assert_eq!(hit.text(), Some("hi"));

        let s = cache.stats();
        assert_eq!((s.hits, s.misses, s.size), (1, 1, 1));
        assert!((s.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn failures_are_not_stored() {
        let mut cache = FragmentCache::new(&CacheConfig::default());
        let f = Fragment::new(0, 0, "x", FragmentTag::Narration);
        let failed = FragmentResult {
            outcome: FragmentOutcome::Failure {
                error: FragmentError::Timeout {
                    fragment: f.id.to_string(),
                    model: "m".into(),
                    secs: 1,
                },
            },
            ..ok_result(&f, "")
        };
        assert!(!cache.put(&f, TargetFormat::Podcast, &[], &failed));
        assert!(cache.is_empty());
    }

    #[test]
    fn key_ignores_budget_and_tracks_format_and_tone() {
        let cache = FragmentCache::new(&CacheConfig::default());
        let f = Fragment::new(0, 0, "Same words.", FragmentTag::Narration);
        let base = cache.key_for(&f, TargetFormat::Podcast, &opts(ProcessingOptions::default()));

        let budgeted = opts(ProcessingOptions::default().budget(0.01));
        assert_eq!(base, cache.key_for(&f, TargetFormat::Podcast, &budgeted));

        assert_ne!(base, cache.key_for(&f, TargetFormat::ShortVideo, &opts(ProcessingOptions::default())));

        let toned = opts(ProcessingOptions::default().tone("formal"));
        assert_ne!(base, cache.key_for(&f, TargetFormat::Podcast, &toned));
    }

    #[test]
    fn extra_options_always_change_the_key() {
        let f = Fragment::new(0, 0, "Same words.", FragmentTag::Narration);
        let noir = opts(ProcessingOptions::default().extra("style", "noir"));
        let comedy = opts(ProcessingOptions::default().extra("style", "comedy"));
        let plain = opts(ProcessingOptions::default());

        let cache = FragmentCache::new(&CacheConfig::default());
        let keys = [&noir, &comedy, &plain].map(|o| cache.key_for(&f, TargetFormat::Podcast, o));
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);

        let empty_allow = CacheConfig {
            key_options: BTreeSet::new(),
            ..CacheConfig::default()
        };
        let bare = FragmentCache::new(&empty_allow);
        assert_ne!(
            bare.key_for(&f, TargetFormat::Podcast, &noir),
            bare.key_for(&f, TargetFormat::Podcast, &comedy)
        );
        assert_eq!(
            bare.key_for(&f, TargetFormat::Podcast, &plain),
            bare.key_for(&f, TargetFormat::Podcast, &opts(ProcessingOptions::default().tone("x")))
        );
    }

    #[test]
    fn dialogue_and_narration_differ_except_in_translation() {
        let cache = FragmentCache::new(&CacheConfig::default());
        let text = "\"Ready?\" she asked.";
        let dialogue = Fragment::new(0, 0, text, FragmentTag::Dialogue);
        let narration = Fragment::new(1, 0, text, FragmentTag::Narration);
        let o = opts(ProcessingOptions::default().target_language("fr"));

        assert_ne!(
            cache.key_for(&dialogue, TargetFormat::Podcast, &o),
            cache.key_for(&narration, TargetFormat::Podcast, &o)
        );
        assert_eq!(
            cache.key_for(&dialogue, TargetFormat::Translation, &o),
            cache.key_for(&narration, TargetFormat::Translation, &o)
        );
    }

    #[test]
    fn zero_ttl_expires_on_lookup() {
        let mut cache = FragmentCache::new(&cfg(0, 10));
        let f = Fragment::new(0, 0, "x", FragmentTag::Narration);
        cache.put(&f, TargetFormat::Podcast, &[], &ok_result(&f, "y"));
        assert!(cache.get(&f, TargetFormat::Podcast, &[]).is_none());
        let s = cache.stats();
        assert_eq!((s.expirations, s.size, s.misses), (1, 0, 1));
    }

    #[test]
    fn clear_expired_and_optimize() {
        let mut cache = FragmentCache::new(&cfg(0, 10));
        for i in 0..3 {
            let f = Fragment::new(i, i, format!("text {i}"), FragmentTag::Narration);
            cache.put(&f, TargetFormat::Podcast, &[], &ok_result(&f, "y"));
        }
        assert_eq!(cache.clear_expired(), 3);
        assert_eq!(cache.optimize(), 0);
        assert_eq!(cache.stats().expirations, 3);
    }

    #[test]
    fn lru_eviction_keeps_recently_used() {
        let mut cache = FragmentCache::new(&cfg(3600, 2));
        let a = Fragment::new(0, 0, "alpha", FragmentTag::Narration);
        let b = Fragment::new(1, 10, "beta", FragmentTag::Narration);
        let c = Fragment::new(2, 20, "gamma", FragmentTag::Narration);
        let p = TargetFormat::Podcast;

        cache.put(&a, p, &[], &ok_result(&a, "A"));
        cache.put(&b, p, &[], &ok_result(&b, "B"));
        assert!(cache.get(&a, p, &[]).is_some());
        cache.put(&c, p, &[], &ok_result(&c, "C"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get(&b, p, &[]).is_none());
        assert!(cache.get(&a, p, &[]).is_some());
        assert!(cache.get(&c, p, &[]).is_some());
    }
}
