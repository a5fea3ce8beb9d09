//! Valid-ticker set and ticker mention extraction.
//!
//! The set of valid security identifiers lives in the database; this cache
//! refreshes it in full through the executor, stores the list in the KV cache
//! under a TTL, and keeps the last successful snapshot in memory so a source
//! outage degrades to stale data instead of an error.
//!
//! Extraction degrades one step further: with no valid set at all (cold cache
//! and failing source) it falls back to the structural shape of a ticker —
//! four letters followed by two digits — so obvious mentions still match.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{info, warn};

use crate::cache::CacheBackend;
use crate::executor::QueryExecutor;

const CACHE_KEY: &str = "tickers:list:v1";

/// Raw-text token shape; extraction runs on the original question, not the
/// normalized form, because tickers are case-insensitive alphanumerics.
static RAW_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9]{2,}").expect("valid regex"));

/// Structural ticker shape: four letters, two digits (e.g. HGLG11).
static TICKER_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{4}\d{2}$").expect("valid regex"));

/// Process-wide ticker cache.
pub struct TickerCache {
    backend: Arc<dyn CacheBackend>,
    executor: Arc<dyn QueryExecutor>,
    source_sql: String,
    ttl: Duration,
    last_known: Mutex<HashSet<String>>,
}

impl TickerCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        executor: Arc<dyn QueryExecutor>,
        source_sql: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            executor,
            source_sql: source_sql.into(),
            ttl,
            last_known: Mutex::new(HashSet::new()),
        }
    }

    /// Current valid set. Serves the KV-cached list when fresh; otherwise
    /// refreshes in full. Never fails: a refresh error returns the last
    /// known set (possibly empty).
    pub fn load(&self, force: bool) -> HashSet<String> {
        if !force
            && let Some(raw) = self.backend.get(CACHE_KEY)
            && let Ok(list) = serde_json::from_str::<Vec<String>>(&raw)
        {
            let set: HashSet<String> = list.into_iter().collect();
            *self.last_known.lock() = set.clone();
            return set;
        }

        match self.refresh() {
            Ok(set) => set,
            Err(err) => {
                warn!(error = %err, "ticker refresh failed; serving last known set");
                self.last_known.lock().clone()
            }
        }
    }

    /// Force a refresh (startup warm-up, CLI).
    pub fn warm_up(&self) -> usize {
        self.load(true).len()
    }

    fn refresh(&self) -> anyhow::Result<HashSet<String>> {
        let rows = self.executor.run(&self.source_sql, &[], u32::MAX)?;
        let mut tickers: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("ticker").and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
            .collect();
        tickers.sort();
        tickers.dedup();

        match serde_json::to_string(&tickers) {
            Ok(payload) => self.backend.set(CACHE_KEY, &payload, Some(self.ttl)),
            Err(err) => warn!(error = %err, "could not serialize ticker list for cache"),
        }
        info!(count = tickers.len(), "ticker cache refreshed");

        let set: HashSet<String> = tickers.into_iter().collect();
        *self.last_known.lock() = set.clone();
        Ok(set)
    }

    /// Extract ticker mentions: deduplicated, first-seen order, uppercase.
    ///
    /// Exact matches first, then 4-letter tokens tried with an appended "11"
    /// (the common fund series). With an empty valid set both passes fall
    /// back to structural matching.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let valid = self.load(false);
        let has_valid = !valid.is_empty();

        let tokens: Vec<&str> = RAW_TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect();
        let mut found: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for token in &tokens {
            let candidate = token.to_uppercase();
            let hit = if has_valid {
                valid.contains(&candidate)
            } else {
                TICKER_SHAPE_RE.is_match(&candidate)
            };
            if hit && seen.insert(candidate.clone()) {
                found.push(candidate);
            }
        }

        for token in &tokens {
            if token.len() == 4 && token.chars().all(|c| c.is_ascii_alphabetic()) {
                let candidate = format!("{}11", token.to_uppercase());
                let hit = if has_valid {
                    valid.contains(&candidate)
                } else {
                    true
                };
                if hit && seen.insert(candidate.clone()) {
                    found.push(candidate);
                }
            }
        }

        found
    }
}
