//! Question routing: the end-to-end ask pipeline.
//!
//! One call turns a natural-language question into the shared response
//! envelope: build the question context, select entities, plan a query per
//! entity, build and run the SQL, format the rows. Off-domain questions and
//! questions no entity matched get the same envelope shape with an
//! `intent_unmatched` status, so clients handle exactly one schema.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::builder::{RunRequest, build_sql, normalize_request};
use crate::catalog::Catalog;
use crate::config::Settings;
use crate::context::build_context;
use crate::error::AskError;
use crate::executor::{QueryExecutor, Row};
use crate::formatter::RowFormatter;
use crate::planner::{DateRangeOverride, plan_question};
use crate::scoring::choose_entities;
use crate::tickers::TickerCache;
use crate::vocab::AskVocabulary;

/// One incoming question.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub question: String,
    /// Per-request override of the configured entity fan-out.
    pub top_k: Option<usize>,
    /// Explicit date range; wins over anything found in the text.
    pub date_range: Option<DateRangeOverride>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AskStatus {
    pub reason: String,
    pub message: String,
}

impl AskStatus {
    fn ok() -> Self {
        Self {
            reason: "ok".to_string(),
            message: "ok".to_string(),
        }
    }

    fn unmatched() -> Self {
        Self {
            reason: "intent_unmatched".to_string(),
            message: "Intenção não reconhecida.".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlannerEntity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub entity: String,
}

/// What the planner decided, echoed for observability.
#[derive(Debug, Default, Serialize)]
pub struct PlannerBlock {
    pub intents: Vec<String>,
    pub entities: Vec<PlannerEntity>,
    pub filters: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ResponseLimits {
    pub top_k: usize,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub elapsed_ms: u64,
    /// Row count of the primary (first-selected) result set.
    pub rows_total: usize,
    pub rows_by_intent: BTreeMap<String, usize>,
    pub limits: ResponseLimits,
}

/// Shared response envelope for matched and unmatched questions alike.
#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub request_id: String,
    pub original_question: String,
    pub status: AskStatus,
    pub planner: PlannerBlock,
    /// Result sets keyed by resolved intent, entity name on collision.
    pub results: BTreeMap<String, Vec<Row>>,
    pub meta: ResponseMeta,
}

/// The assembled pipeline.
pub struct AskService {
    catalog: Arc<Catalog>,
    vocab: AskVocabulary,
    tickers: TickerCache,
    executor: Arc<dyn QueryExecutor>,
    formatter: Box<dyn RowFormatter>,
    settings: Settings,
}

impl AskService {
    pub fn new(
        catalog: Arc<Catalog>,
        vocab: AskVocabulary,
        tickers: TickerCache,
        executor: Arc<dyn QueryExecutor>,
        formatter: Box<dyn RowFormatter>,
        settings: Settings,
    ) -> Self {
        Self {
            catalog,
            vocab,
            tickers,
            executor,
            formatter,
            settings,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn tickers(&self) -> &TickerCache {
        &self.tickers
    }

    /// Route a question using the wall-clock date.
    pub fn route_question(&self, request: &AskRequest) -> Result<AskResponse, AskError> {
        self.route_question_at(request, chrono::Local::now().date_naive())
    }

    /// Route a question against a fixed "today" (tests, replays).
    pub fn route_question_at(
        &self,
        request: &AskRequest,
        today: NaiveDate,
    ) -> Result<AskResponse, AskError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let top_k = request.top_k.unwrap_or(self.settings.ask_top_k);

        let snapshot = self.vocab.snapshot();
        let ctx = build_context(&request.question, &snapshot, &self.tickers);
        debug!(
            request_id = %request_id,
            tickers = ?ctx.tickers,
            guessed_intent = ?ctx.guessed_intent,
            "question context built"
        );

        if !ctx.has_domain_anchor {
            info!(request_id = %request_id, "question has no domain anchor");
            return Ok(self.unmatched(request, request_id, top_k, started));
        }

        let selected =
            choose_entities(&ctx, &self.catalog, &snapshot, self.settings.ask_min_score, top_k)?;
        if selected.is_empty() {
            info!(request_id = %request_id, "no entity cleared the score threshold");
            return Ok(self.unmatched(request, request_id, top_k, started));
        }

        let mut planner = PlannerBlock::default();
        let mut results: BTreeMap<String, Vec<Row>> = BTreeMap::new();
        let mut rows_by_intent: BTreeMap<String, usize> = BTreeMap::new();
        let mut primary_key: Option<String> = None;

        for scored in &selected {
            let plan = plan_question(
                &ctx,
                &scored.entity,
                request.date_range.as_ref(),
                &self.catalog,
                &snapshot,
                &self.settings,
                today,
            );
            let normalized = normalize_request(
                &self.catalog,
                plan.run_request,
                self.settings.ask_max_limit,
            )?;
            let (sql, params) = build_sql(&self.catalog, &normalized)?;
            debug!(request_id = %request_id, entity = %scored.entity, sql = %sql, "query built");

            let rows = self.executor.run(&sql, &params, normalized.limit)?;
            let rows = self.formatter.to_human(rows)?;

            let mut key = scored
                .intent
                .clone()
                .unwrap_or_else(|| scored.entity.clone());
            if results.contains_key(&key) {
                key = scored.entity.clone();
            }
            if primary_key.is_none() {
                primary_key = Some(key.clone());
            }
            rows_by_intent.insert(key.clone(), rows.len());
            results.insert(key, rows);

            if let Some(intent) = &scored.intent {
                planner.intents.push(intent.clone());
            }
            planner.entities.push(PlannerEntity {
                intent: scored.intent.clone(),
                entity: scored.entity.clone(),
            });
            for (k, v) in plan.planner_filters {
                planner.filters.entry(k).or_insert(v);
            }
        }

        let rows_total = primary_key
            .as_deref()
            .and_then(|k| rows_by_intent.get(k))
            .copied()
            .unwrap_or(0);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            entities = planner.entities.len(),
            rows_total,
            elapsed_ms,
            "question routed"
        );

        Ok(AskResponse {
            request_id,
            original_question: request.question.clone(),
            status: AskStatus::ok(),
            planner,
            results,
            meta: ResponseMeta {
                elapsed_ms,
                rows_total,
                rows_by_intent,
                limits: ResponseLimits { top_k },
            },
        })
    }

    /// Run one explicit request (CLI, API): validate, build, execute, format.
    pub fn run_request(&self, request: RunRequest) -> Result<Vec<Row>, AskError> {
        let normalized = normalize_request(&self.catalog, request, self.settings.ask_max_limit)?;
        let (sql, params) = build_sql(&self.catalog, &normalized)?;
        let rows = self.executor.run(&sql, &params, normalized.limit)?;
        Ok(self.formatter.to_human(rows)?)
    }

    fn unmatched(
        &self,
        request: &AskRequest,
        request_id: String,
        top_k: usize,
        started: Instant,
    ) -> AskResponse {
        AskResponse {
            request_id,
            original_question: request.question.clone(),
            status: AskStatus::unmatched(),
            planner: PlannerBlock::default(),
            results: BTreeMap::new(),
            meta: ResponseMeta {
                elapsed_ms: started.elapsed().as_millis() as u64,
                rows_total: 0,
                rows_by_intent: BTreeMap::new(),
                limits: ResponseLimits { top_k },
            },
        }
    }
}
