//! Runtime settings.
//!
//! Every knob has a coded default and an optional `CASK_*` environment
//! override (read through `dotenvy`, so a local `.env` file works too).
//! Unparseable values fall back to the default silently; the pipeline never
//! fails because of a malformed tuning variable.

use std::path::PathBuf;

/// Tunables consumed by the ask pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum number of entities fanned out per question.
    pub ask_top_k: usize,
    /// Minimum score a candidate entity must reach to be selected.
    pub ask_min_score: f64,
    /// Row limit applied when the planner has no better idea.
    pub ask_default_limit: u32,
    /// Hard cap for any emitted LIMIT.
    pub ask_max_limit: u32,
    /// Ticker set freshness window, seconds.
    pub tickers_cache_ttl: u64,
    /// Vocabulary index freshness window, seconds.
    pub vocab_cache_ttl: u64,
    /// Whether relative date phrases ("últimos 2 meses") are parsed.
    pub nlp_relative_dates: bool,
    /// Query the ticker cache refreshes from, via the executor.
    pub tickers_source_sql: String,
    /// Catalog directory (CLI).
    pub catalog_dir: Option<PathBuf>,
    /// SQLite database path (CLI dev executor).
    pub db_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ask_top_k: 3,
            ask_min_score: 1.0,
            ask_default_limit: 100,
            ask_max_limit: 1000,
            tickers_cache_ttl: 300,
            vocab_cache_ttl: 60,
            nlp_relative_dates: true,
            tickers_source_sql: "SELECT ticker FROM view_fiis_info ORDER BY ticker".to_string(),
            catalog_dir: None,
            db_path: None,
        }
    }
}

impl Settings {
    /// Load settings from `CASK_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("CASK_ASK_TOP_K")
            && let Ok(v) = val.parse()
        {
            cfg.ask_top_k = v;
        }
        if let Ok(val) = dotenvy::var("CASK_ASK_MIN_SCORE")
            && let Ok(v) = val.parse()
        {
            cfg.ask_min_score = v;
        }
        if let Ok(val) = dotenvy::var("CASK_ASK_DEFAULT_LIMIT")
            && let Ok(v) = val.parse()
        {
            cfg.ask_default_limit = v;
        }
        if let Ok(val) = dotenvy::var("CASK_ASK_MAX_LIMIT")
            && let Ok(v) = val.parse()
        {
            cfg.ask_max_limit = v;
        }
        if let Ok(val) = dotenvy::var("CASK_TICKERS_CACHE_TTL")
            && let Ok(v) = val.parse()
        {
            cfg.tickers_cache_ttl = v;
        }
        if let Ok(val) = dotenvy::var("CASK_VOCAB_CACHE_TTL")
            && let Ok(v) = val.parse()
        {
            cfg.vocab_cache_ttl = v;
        }
        if let Ok(val) = dotenvy::var("CASK_NLP_RELATIVE_DATES")
            && let Ok(v) = val.parse()
        {
            cfg.nlp_relative_dates = v;
        }
        if let Ok(val) = dotenvy::var("CASK_TICKERS_SOURCE_SQL") {
            cfg.tickers_source_sql = val;
        }
        if let Ok(val) = dotenvy::var("CASK_CATALOG_DIR") {
            cfg.catalog_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = dotenvy::var("CASK_DB_PATH") {
            cfg.db_path = Some(PathBuf::from(val));
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Settings::default();
        assert_eq!(cfg.ask_top_k, 3);
        assert!(cfg.ask_default_limit <= cfg.ask_max_limit);
        assert!(cfg.nlp_relative_dates);
    }
}
