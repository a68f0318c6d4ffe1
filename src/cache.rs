//! Evaluation-path caches
//!
//! Two caches with very different lifetimes live here: the per-(event, rule)
//! scratch cache that collapses repeated field and raw-ref resolutions, and
//! the shared regex result cache bounded by an LRU policy.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;

use crate::event::Event;
use crate::field::FieldPath;

/// Default capacity of the shared regex result cache
pub const DEFAULT_REGEX_CACHE_CAPACITY: usize = 4096;

/// Per-event, per-rule memoisation of field and raw-ref resolutions
///
/// Keyed by the original path string, not the parsed form. The expected entry
/// count is tiny (one per distinct path a rule touches), so both maps are
/// flat vectors scanned linearly.
pub struct ScratchCache<'e> {
    event: &'e Event,
    fields: Vec<(String, (String, bool))>,
    raws: Vec<(String, String)>,
}

impl<'e> ScratchCache<'e> {
    /// Create a scratch cache for one event's pass through one rule
    pub fn new(event: &'e Event) -> Self {
        Self {
            event,
            fields: Vec::with_capacity(8),
            raws: Vec::with_capacity(4),
        }
    }

    /// The event under evaluation
    pub fn event(&self) -> &Event {
        self.event
    }

    /// Resolve a field path, memoised on the original path string
    pub fn field(&mut self, path: &FieldPath) -> (String, bool) {
        if let Some((_, cached)) = self.fields.iter().find(|(key, _)| key == path.raw()) {
            return cached.clone();
        }
        let resolved = self.event.resolve(path);
        self.fields
            .push((path.raw().to_string(), resolved.clone()));
        resolved
    }

    /// Resolve a raw-ref, memoised on the full marker-prefixed string
    ///
    /// An unresolvable raw-ref yields the empty string so the operator
    /// empty-value rules apply at the point of use.
    pub fn raw_ref(&mut self, marked: &str, path: &FieldPath) -> String {
        if let Some((_, cached)) = self.raws.iter().find(|(key, _)| key == marked) {
            return cached.clone();
        }
        let (value, _found) = self.field(path);
        self.raws.push((marked.to_string(), value.clone()));
        value
    }
}

/// Thread-safe bounded cache of `(pattern, input) -> matched`
///
/// Shared across evaluations of one ruleset instance. The mutex is held only
/// for the brief lookup/insert path; the actual regex match for a miss runs
/// outside it. Raw-ref patterns skip the cache entirely and compile-time
/// patterns against literal inputs bypass it, so only event-derived inputs
/// against static patterns are cached.
pub struct RegexCache {
    inner: Mutex<LruCache<(String, String), bool>>,
}

impl RegexCache {
    /// Create a cache with the given capacity (entries)
    pub fn new(capacity: usize) -> Self {
        let capacity =
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_REGEX_CACHE_CAPACITY).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Match `input` against `regex`, consulting the cache when `cacheable`
    pub fn is_match(&self, regex: &Regex, input: &str, cacheable: bool) -> bool {
        if !cacheable {
            return regex.is_match(input);
        }
        let key = (regex.as_str().to_string(), input.to_string());
        if let Some(hit) = self.inner.lock().get(&key) {
            return *hit;
        }
        let matched = regex.is_match(input);
        self.inner.lock().put(key, matched);
        matched
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(DEFAULT_REGEX_CACHE_CAPACITY)
    }
}
