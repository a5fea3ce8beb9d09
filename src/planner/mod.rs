//! Date-range resolution and per-entity query planning.
//!
//! For a chosen entity the planner resolves ticker filters, date-range
//! filters, and ordering/limit into a [`RunRequest`]. Date precedence is
//! fixed: an explicit override wins over an "entre DD/MM/YYYY e DD/MM/YYYY"
//! phrase, which wins over relative phrases ("últimos 2 meses"); a source
//! earlier in that order is never overwritten by a later one.
//!
//! All functions that depend on the current date take `today` explicitly so
//! behavior is reproducible in tests.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::builder::{OrderBy, RunRequest};
use crate::catalog::Catalog;
use crate::config::Settings;
use crate::context::QuestionContext;
use crate::vocab::{AskVocabulary, VocabSnapshot};

static BETWEEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)entre\s+(\d{2}/\d{2}/\d{4})\s+e\s+(\d{2}/\d{2}/\d{4})").expect("valid regex")
});
static LAST_N_MONTHS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ultim[oa]s?\s+(\d+)\s+mes").expect("valid regex"));
static N_MONTHS_BEFORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+mes(?:es)?\s+antes").expect("valid regex"));

/// Explicit date-range override supplied with the request payload.
/// Accepts both `from`/`to` and `start`/`end` spellings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRangeOverride {
    #[serde(alias = "start")]
    pub from: Option<String>,
    #[serde(alias = "end")]
    pub to: Option<String>,
}

/// Resolved inclusive date range; either bound may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Fill absent bounds from `other` without overwriting present ones.
    fn set_defaults(&mut self, other: DateRange) {
        if self.from.is_none() {
            self.from = other.from;
        }
        if self.to.is_none() {
            self.to = other.to;
        }
    }
}

/// Plan for one `(entity, intent)` pair.
#[derive(Debug, Clone)]
pub struct Plan {
    pub run_request: RunRequest,
    /// Planner metadata echoed into the response envelope: raw ticker list,
    /// resolved date field and bounds, recorded even when not filterable.
    pub planner_filters: BTreeMap<String, Value>,
    pub tickers: Vec<String>,
}

/// Parse an ISO (`YYYY-MM-DD`) or BR (`DD/MM/YYYY`, `DD/MM/YY`) date.
pub fn parse_date_value(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    // chrono's %Y happily accepts a two-digit year, so the format is picked
    // by the length of the year segment instead of tried in sequence.
    let fmt = match value.rsplit('/').next().map(str::len) {
        Some(4) => "%d/%m/%Y",
        Some(2) => "%d/%m/%y",
        _ => return None,
    };
    NaiveDate::parse_from_str(value, fmt).ok()
}

fn relative_date_range(text_norm: &str, today: NaiveDate) -> DateRange {
    for re in [&*LAST_N_MONTHS_RE, &*N_MONTHS_BEFORE_RE] {
        if let Some(caps) = re.captures(text_norm)
            && let Ok(months) = caps[1].parse::<u32>()
        {
            let start = today
                .checked_sub_months(Months::new(months))
                .unwrap_or(today);
            return DateRange {
                from: Some(start),
                to: Some(today),
            };
        }
    }

    if text_norm.contains("mes anterior") {
        let first_this_month = today.with_day(1).unwrap_or(today);
        let last_prev_month = first_this_month
            .checked_sub_days(Days::new(1))
            .unwrap_or(first_this_month);
        let first_prev_month = last_prev_month.with_day(1).unwrap_or(last_prev_month);
        return DateRange {
            from: Some(first_prev_month),
            to: Some(last_prev_month),
        };
    }

    if text_norm.contains("ano atual") {
        return DateRange {
            from: NaiveDate::from_ymd_opt(today.year(), 1, 1),
            to: NaiveDate::from_ymd_opt(today.year(), 12, 31),
        };
    }

    DateRange::default()
}

fn extract_dates_range(question: &str, today: NaiveDate, relative_enabled: bool) -> DateRange {
    if question.is_empty() {
        return DateRange::default();
    }
    if let Some(caps) = BETWEEN_RE.captures(question) {
        let range = DateRange {
            from: parse_date_value(&caps[1]),
            to: parse_date_value(&caps[2]),
        };
        if !range.is_empty() {
            return range;
        }
    }
    if !relative_enabled {
        return DateRange::default();
    }
    relative_date_range(&crate::text::unaccent_lower(question), today)
}

/// Resolve the date range for a question: explicit override first, then
/// phrases found in the text.
pub fn resolve_date_range(
    question: &str,
    explicit: Option<&DateRangeOverride>,
    today: NaiveDate,
    relative_enabled: bool,
) -> DateRange {
    let mut resolved = DateRange::default();
    if let Some(explicit) = explicit {
        resolved.from = explicit.from.as_deref().and_then(parse_date_value);
        resolved.to = explicit.to.as_deref().and_then(parse_date_value);
    }
    resolved.set_defaults(extract_dates_range(question, today, relative_enabled));
    resolved
}

/// Date column used for the reserved `date_from`/`date_to` filters:
/// the declared `default_date_field` when it is a real column, else the
/// first `*_date` column, else `*_until`, else `*_at`.
pub fn default_date_field(catalog: &Catalog, entity: &str) -> Option<String> {
    let columns = catalog.columns(entity);
    if let Some(doc) = catalog.get(entity)
        && let Some(declared) = &doc.default_date_field
        && columns.iter().any(|c| c == declared)
    {
        return Some(declared.clone());
    }
    for suffix in ["_date", "_until"] {
        if let Some(col) = columns.iter().find(|c| c.ends_with(suffix)) {
            return Some(col.clone());
        }
    }
    columns.iter().find(|c| c.ends_with("_at")).cloned()
}

fn iso(date: NaiveDate) -> Value {
    Value::String(date.format("%Y-%m-%d").to_string())
}

/// Build the run request and planner metadata for one selected entity.
#[allow(clippy::too_many_arguments)]
pub fn plan_question(
    ctx: &QuestionContext,
    entity: &str,
    date_override: Option<&DateRangeOverride>,
    catalog: &Catalog,
    snapshot: &VocabSnapshot,
    settings: &Settings,
    today: NaiveDate,
) -> Plan {
    let columns = catalog.columns(entity);
    let mut filters: BTreeMap<String, Value> = BTreeMap::new();
    let mut planner_filters: BTreeMap<String, Value> = BTreeMap::new();

    let tickers = ctx.tickers.clone();
    if !tickers.is_empty() {
        planner_filters.insert(
            "tickers".to_string(),
            Value::Array(tickers.iter().cloned().map(Value::String).collect()),
        );
        let ticker_filterable = columns.iter().any(|c| c == "ticker")
            || catalog.identifiers(entity).iter().any(|c| c == "ticker");
        if ticker_filterable {
            let value = if tickers.len() > 1 {
                Value::Array(tickers.iter().cloned().map(Value::String).collect())
            } else {
                Value::String(tickers[0].clone())
            };
            filters.insert("ticker".to_string(), value);
        }
    }

    let resolved = resolve_date_range(
        &ctx.original,
        date_override,
        today,
        settings.nlp_relative_dates,
    );
    let date_field = default_date_field(catalog, entity);
    if let Some(field) = &date_field {
        planner_filters.insert("date_field".to_string(), Value::String(field.clone()));
    }
    if let Some(from) = resolved.from {
        filters.insert("date_from".to_string(), iso(from));
        planner_filters.insert("date_from".to_string(), iso(from));
    }
    if let Some(to) = resolved.to {
        filters.insert("date_to".to_string(), iso(to));
        planner_filters.insert("date_to".to_string(), iso(to));
    }

    // "most recent" queries: latest words (entity-declared, ontology default
    // otherwise) + a date field → newest row only.
    let meta = snapshot.entity_meta(entity);
    let latest_words = if meta.latest_words_normalized.is_empty() {
        AskVocabulary::latest_words_defaults()
    } else {
        meta.latest_words_normalized.clone()
    };
    let qnorm = &ctx.normalized;
    let mut order_by = None;
    let mut limit = settings.ask_default_limit;
    if latest_words.iter().any(|w| qnorm.contains(w.as_str())) && date_field.is_some() {
        order_by = Some(OrderBy {
            field: date_field.clone().unwrap_or_default(),
            dir: "DESC".to_string(),
        });
        limit = 1;
    } else if qnorm.contains("entre")
        && let Some(field) = &date_field
    {
        order_by = Some(OrderBy {
            field: field.clone(),
            dir: "ASC".to_string(),
        });
        limit = settings.ask_max_limit;
    }

    let run_request = RunRequest {
        entity: entity.to_string(),
        select: None,
        filters,
        order_by,
        limit: limit.min(settings.ask_max_limit),
    };

    Plan {
        run_request,
        planner_filters,
        tickers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::context::build_context;
    use crate::executor::{QueryExecutor, StaticExecutor};
    use crate::tickers::TickerCache;
    use std::sync::Arc;
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fixture() -> (Arc<Catalog>, AskVocabulary, TickerCache) {
        let doc: crate::catalog::ViewDoc = serde_yaml::from_str(
            r#"
entity: view_fiis_history_dividends
columns: [ticker, payment_date, amount]
identifiers: [ticker]
default_date_field: payment_date
ask:
  intents: [dividends]
  intent_tokens:
    dividends: [dividendo]
"#,
        )
        .unwrap();
        let catalog = Arc::new(Catalog::from_docs([doc]));
        let vocab = AskVocabulary::new(Arc::clone(&catalog), Duration::from_secs(60));
        let tickers = TickerCache::new(
            Arc::new(MemoryCache::new()),
            Arc::new(StaticExecutor::from_values("ticker", &["HGLG11", "XPML11"]))
                as Arc<dyn QueryExecutor>,
            "SELECT ticker FROM view_fiis_info ORDER BY ticker",
            Duration::from_secs(300),
        );
        (catalog, vocab, tickers)
    }

    #[test]
    fn parses_iso_and_br_dates() {
        assert_eq!(parse_date_value("2024-01-31"), Some(d(2024, 1, 31)));
        assert_eq!(parse_date_value("31/01/2024"), Some(d(2024, 1, 31)));
        assert_eq!(parse_date_value("31-01-2024"), None);
    }

    #[test]
    fn two_digit_years_resolve_to_the_current_century() {
        assert_eq!(parse_date_value("01/01/24"), Some(d(2024, 1, 1)));
        // A three-digit year matches neither BR form.
        assert_eq!(parse_date_value("01/01/024"), None);
    }

    #[test]
    fn between_phrase_resolves_both_bounds() {
        let range = resolve_date_range(
            "cotações entre 01/01/2024 e 30/06/2024",
            None,
            d(2025, 1, 1),
            true,
        );
        assert_eq!(range.from, Some(d(2024, 1, 1)));
        assert_eq!(range.to, Some(d(2024, 6, 30)));
    }

    #[test]
    fn relative_last_n_months() {
        let range = resolve_date_range("últimos 2 meses", None, d(2023, 5, 20), true);
        assert_eq!(range.from, Some(d(2023, 3, 20)));
        assert_eq!(range.to, Some(d(2023, 5, 20)));
    }

    #[test]
    fn relative_previous_month_is_the_full_calendar_month() {
        let range = resolve_date_range("dados do mês anterior", None, d(2023, 5, 20), true);
        assert_eq!(range.from, Some(d(2023, 4, 1)));
        assert_eq!(range.to, Some(d(2023, 4, 30)));
    }

    #[test]
    fn relative_current_year() {
        let range = resolve_date_range("no ano atual", None, d(2023, 5, 20), true);
        assert_eq!(range.from, Some(d(2023, 1, 1)));
        assert_eq!(range.to, Some(d(2023, 12, 31)));
    }

    #[test]
    fn relative_parsing_can_be_disabled() {
        let range = resolve_date_range("últimos 2 meses", None, d(2023, 5, 20), false);
        assert!(range.is_empty());
    }

    #[test]
    fn explicit_override_wins_over_text() {
        let explicit = DateRangeOverride {
            from: Some("2022-01-01".to_string()),
            to: None,
        };
        let range = resolve_date_range(
            "entre 01/01/2024 e 30/06/2024",
            Some(&explicit),
            d(2025, 1, 1),
            true,
        );
        assert_eq!(range.from, Some(d(2022, 1, 1)), "override kept");
        assert_eq!(range.to, Some(d(2024, 6, 30)), "missing bound filled from text");
    }

    #[test]
    fn date_field_prefers_declared_then_suffix_heuristics() {
        let docs = [
            "{entity: a, columns: [x, created_at, due_date], default_date_field: due_date}",
            "{entity: b, columns: [x, created_at, valid_until]}",
            "{entity: c, columns: [x, created_at]}",
            "{entity: d, columns: [x], default_date_field: missing_col}",
            "{entity: e, columns: [x]}",
        ];
        let cat = Catalog::from_docs(docs.iter().map(|y| serde_yaml::from_str(y).unwrap()));
        assert_eq!(default_date_field(&cat, "a").as_deref(), Some("due_date"));
        assert_eq!(default_date_field(&cat, "b").as_deref(), Some("valid_until"));
        assert_eq!(default_date_field(&cat, "c").as_deref(), Some("created_at"));
        assert_eq!(default_date_field(&cat, "d"), None);
        assert_eq!(default_date_field(&cat, "e"), None);
    }

    #[test]
    fn latest_question_orders_desc_with_limit_one() {
        let (catalog, vocab, tickers) = fixture();
        let snap = vocab.snapshot();
        let ctx = build_context("qual o último dividendo do HGLG11", &snap, &tickers);
        let plan = plan_question(
            &ctx,
            "view_fiis_history_dividends",
            None,
            &catalog,
            &snap,
            &Settings::default(),
            d(2023, 5, 20),
        );
        let req = &plan.run_request;
        assert_eq!(req.limit, 1);
        let order = req.order_by.as_ref().unwrap();
        assert_eq!(order.field, "payment_date");
        assert_eq!(order.dir, "DESC");
        assert_eq!(
            req.filters.get("ticker"),
            Some(&Value::String("HGLG11".into()))
        );
    }

    #[test]
    fn between_question_orders_asc_with_max_range_limit() {
        let (catalog, vocab, tickers) = fixture();
        let snap = vocab.snapshot();
        let ctx = build_context(
            "dividendos do HGLG11 entre 01/01/2024 e 30/06/2024",
            &snap,
            &tickers,
        );
        let plan = plan_question(
            &ctx,
            "view_fiis_history_dividends",
            None,
            &catalog,
            &snap,
            &Settings::default(),
            d(2024, 7, 1),
        );
        let req = &plan.run_request;
        assert_eq!(req.order_by.as_ref().unwrap().dir, "ASC");
        assert_eq!(req.limit, Settings::default().ask_max_limit);
        assert_eq!(
            req.filters.get("date_from"),
            Some(&Value::String("2024-01-01".into()))
        );
        assert_eq!(
            req.filters.get("date_to"),
            Some(&Value::String("2024-06-30".into()))
        );
    }

    #[test]
    fn multiple_tickers_become_a_list_filter() {
        let (catalog, vocab, tickers) = fixture();
        let snap = vocab.snapshot();
        let ctx = build_context("dividendos de HGLG11 e XPML11", &snap, &tickers);
        let plan = plan_question(
            &ctx,
            "view_fiis_history_dividends",
            None,
            &catalog,
            &snap,
            &Settings::default(),
            d(2024, 7, 1),
        );
        assert_eq!(
            plan.run_request.filters.get("ticker"),
            Some(&Value::Array(vec![
                Value::String("HGLG11".into()),
                Value::String("XPML11".into())
            ]))
        );
        assert_eq!(plan.tickers, vec!["HGLG11", "XPML11"]);
    }

    #[test]
    fn planner_metadata_records_tickers_even_without_ticker_column() {
        let doc: crate::catalog::ViewDoc =
            serde_yaml::from_str("{entity: view_macro_indicators, columns: [name, ref_date, value]}")
                .unwrap();
        let catalog = Arc::new(Catalog::from_docs([doc]));
        let (_, vocab, tickers) = fixture();
        let snap = vocab.snapshot();
        let ctx = build_context("taxa selic do HGLG11", &snap, &tickers);
        let plan = plan_question(
            &ctx,
            "view_macro_indicators",
            None,
            &catalog,
            &snap,
            &Settings::default(),
            d(2024, 7, 1),
        );
        assert!(plan.run_request.filters.get("ticker").is_none());
        assert!(plan.planner_filters.contains_key("tickers"));
    }
}
