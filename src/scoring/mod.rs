//! Multi-signal entity scoring and ranking.
//!
//! Every catalog entity gets a relevance score for the question context:
//! keyword hits, weighted synonym/intent hits, description overlap, bonuses
//! for agreeing with the guessed intent, family/domain boosts, and a few
//! cross-family disambiguation rules. The magnitudes below are tuning
//! parameters, not invariants — they were calibrated against the live
//! catalog and are safe to adjust together.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::catalog::Catalog;
use crate::context::QuestionContext;
use crate::error::ValidationError;
use crate::text::tokenize;
use crate::vocab::VocabSnapshot;

const DESCRIPTION_WEIGHT: f64 = 0.5;
/// Bonus when the entity's best synonym intent equals the guessed intent.
const GUESSED_BEST_INTENT_BONUS: f64 = 3.0;
/// Additional bonus when the guessed intent is among the declared intents.
const GUESSED_DECLARED_INTENT_BONUS: f64 = 2.0;
const FAMILY_SEQ_HIT_WEIGHT: f64 = 1.5;
const FAMILY_UNIQ_HIT_WEIGHT: f64 = 2.0;
const FAMILY_GUESSED_BONUS: f64 = 2.0;
const DIVIDENDS_BOOST: f64 = 2.5;
const DIVIDENDS_PRICES_PENALTY: f64 = 1.5;
const INDICATOR_BOOST: f64 = 3.0;
const INDICATOR_PENALTY: f64 = 1.2;
const JUDICIAL_BOOST: f64 = 2.0;
const JUDICIAL_PENALTY: f64 = 1.0;
const IMOVEIS_BOOST: f64 = 1.5;
/// An asset-portfolio entity with zero asset vocabulary overlap is very
/// unlikely to be the target; its whole score is scaled down.
const IMOVEIS_MISS_SCALE: f64 = 0.4;
const IMOVEIS_CADASTRO_BOOST: f64 = 0.5;
const PROC_ATIVOS_JUDICIAL_BONUS: f64 = 5.0;
const PROC_ATIVOS_PROCESSOS_BONUS: f64 = 2.0;
const PROC_ATIVOS_ATIVOS_PENALTY: f64 = 4.0;
/// Top candidate must outscore the runner-up by this ratio to stand alone.
const LEADER_MARGIN: f64 = 1.5;

/// Coarse entity family, detected from structural naming conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityFamily {
    Precos,
    Dividends,
    Judicial,
    Cadastro,
    Imoveis,
    Indicadores,
}

/// Ordered substring → family dispatch table. First match wins; adding a
/// family is one enum case plus entries here.
const FAMILY_MAP: &[(&str, EntityFamily)] = &[
    ("prices", EntityFamily::Precos),
    ("dividends", EntityFamily::Dividends),
    ("judicial", EntityFamily::Judicial),
    ("info", EntityFamily::Cadastro),
    ("cadastro", EntityFamily::Cadastro),
    ("assets", EntityFamily::Imoveis),
    ("properties", EntityFamily::Imoveis),
    ("imoveis", EntityFamily::Imoveis),
    ("indicator", EntityFamily::Indicadores),
    ("macro", EntityFamily::Indicadores),
    ("tax", EntityFamily::Indicadores),
];

impl EntityFamily {
    pub fn detect(entity: &str) -> Option<Self> {
        let name = entity.to_lowercase();
        FAMILY_MAP
            .iter()
            .find(|(needle, _)| name.contains(needle))
            .map(|(_, family)| *family)
    }

    /// The intent label this family resolves to.
    pub fn intent_label(self) -> &'static str {
        match self {
            EntityFamily::Precos => "precos",
            EntityFamily::Dividends => "dividends",
            EntityFamily::Judicial => "judicial",
            EntityFamily::Cadastro => "cadastro",
            EntityFamily::Imoveis => "imoveis",
            EntityFamily::Indicadores => "indicadores",
        }
    }
}

/// Score and best-fit intent for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityScore {
    pub entity: String,
    pub intent: Option<String>,
    pub score: f64,
}

/// Coarse intent guess: the single intent whose vocabulary overlaps the most
/// distinct tokens. Ties yield `None` so they cannot bias ranking.
pub fn guess_intent(tokens: &[String], snapshot: &VocabSnapshot) -> Option<String> {
    if tokens.is_empty() {
        return None;
    }
    let tset: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (intent, words) in snapshot.global_intent_tokens() {
        let hits = tset.iter().filter(|t| words.contains(**t)).count();
        if hits > 0 {
            counts.insert(intent, hits);
        }
    }
    let best = counts.values().copied().max()?;
    let winners: Vec<&str> = counts
        .iter()
        .filter(|(_, v)| **v == best)
        .map(|(k, _)| *k)
        .collect();
    match winners.as_slice() {
        [only] => Some((*only).to_string()),
        _ => None,
    }
}

/// Score one entity against the context. Returns the total score and the
/// resolved best-fit intent.
pub fn score_entity(
    ctx: &QuestionContext,
    entity: &str,
    catalog: &Catalog,
    snapshot: &VocabSnapshot,
) -> (f64, Option<String>) {
    let tokens = &ctx.tokens;
    let tset: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
    let guessed = ctx.guessed_intent.as_deref();
    let meta = snapshot.entity_meta(entity);

    // Signal 1: keyword hits (repeats count), scaled by the keyword weight.
    let kwset: BTreeSet<&str> = meta.keywords_normalized.iter().map(String::as_str).collect();
    let keyword_hits = tokens.iter().filter(|t| kwset.contains(t.as_str())).count();
    let score_keywords = keyword_hits as f64 * meta.keyword_weight();

    // Signal 2: weighted synonym hits accumulated per intent; the strongest
    // intent becomes the provisional best fit (first seen wins ties).
    let mut intent_scores: Vec<(String, f64)> = Vec::new();
    for source in &meta.synonym_sources {
        if source.intent.is_empty() || source.tokens.is_empty() {
            continue;
        }
        let hits = tset.iter().filter(|t| source.tokens.contains(**t)).count();
        if hits == 0 {
            continue;
        }
        let contribution = hits as f64 * source.weight;
        match intent_scores.iter_mut().find(|(i, _)| *i == source.intent) {
            Some((_, acc)) => *acc += contribution,
            None => intent_scores.push((source.intent.clone(), contribution)),
        }
    }
    let mut best_intent: Option<String> = None;
    let mut best_intent_score = 0.0;
    for (intent, score) in &intent_scores {
        if *score > best_intent_score {
            best_intent_score = *score;
            best_intent = Some(intent.clone());
        }
    }

    // Signal 3: description overlap.
    let description = catalog
        .get(entity)
        .and_then(|d| d.description.as_deref())
        .unwrap_or_default();
    let desc_tokens: BTreeSet<String> = tokenize(description).into_iter().collect();
    let score_desc = tokens
        .iter()
        .filter(|t| desc_tokens.contains(t.as_str()))
        .count() as f64
        * DESCRIPTION_WEIGHT;

    // Signal 4: agreement with the guessed intent.
    let mut bonus = 0.0;
    if let Some(guessed) = guessed {
        if best_intent.as_deref() == Some(guessed) {
            bonus += GUESSED_BEST_INTENT_BONUS;
        }
        if meta.intents.iter().any(|i| i == guessed) {
            bonus += GUESSED_DECLARED_INTENT_BONUS;
        }
    }

    let mut total = score_keywords + best_intent_score + score_desc + bonus;

    // Signal 5: boosts for every intent in (declared ∪ family).
    let family = EntityFamily::detect(entity);
    let global = snapshot.global_intent_tokens();
    let mut boost_targets: BTreeSet<String> = meta.intents.iter().cloned().collect();
    if let Some(family) = family {
        boost_targets.insert(family.intent_label().to_string());
    }
    for intent in &boost_targets {
        let Some(words) = global.get(intent) else { continue };
        let seq_hits = tokens.iter().filter(|t| words.contains(t.as_str())).count();
        let uniq_hits = tset.iter().filter(|t| words.contains(**t)).count();
        total += seq_hits as f64 * FAMILY_SEQ_HIT_WEIGHT;
        total += uniq_hits as f64 * FAMILY_UNIQ_HIT_WEIGHT;
        if guessed == Some(intent.as_str()) {
            total += FAMILY_GUESSED_BONUS;
        }
    }

    // Signal 6: cross-family disambiguation.
    let overlap = |intent: &str| -> usize {
        global
            .get(intent)
            .map(|words| tset.iter().filter(|t| words.contains(**t)).count())
            .unwrap_or(0)
    };

    let dividends_hits = overlap("dividends");
    if dividends_hits > 0 {
        match family {
            Some(EntityFamily::Dividends) => total += dividends_hits as f64 * DIVIDENDS_BOOST,
            Some(EntityFamily::Precos) => total -= dividends_hits as f64 * DIVIDENDS_PRICES_PENALTY,
            _ => {}
        }
    }

    let indicator_hits = overlap("indicadores");
    if indicator_hits > 0 {
        let declared_indicator = meta
            .intents
            .iter()
            .any(|i| matches!(i.as_str(), "indicadores" | "mercado" | "taxas"));
        if family == Some(EntityFamily::Indicadores) || declared_indicator {
            total += indicator_hits as f64 * INDICATOR_BOOST;
        } else {
            total -= indicator_hits as f64 * INDICATOR_PENALTY;
        }
    }

    let judicial_hits = overlap("judicial");
    if judicial_hits > 0 {
        if family == Some(EntityFamily::Judicial) || meta.intents.iter().any(|i| i == "judicial") {
            total += judicial_hits as f64 * JUDICIAL_BOOST;
        } else {
            total -= judicial_hits as f64 * JUDICIAL_PENALTY;
        }
    }

    let imoveis_hits = overlap("imoveis");
    if family == Some(EntityFamily::Imoveis) {
        if imoveis_hits > 0 {
            total += imoveis_hits as f64 * IMOVEIS_BOOST;
        } else {
            total *= IMOVEIS_MISS_SCALE;
        }
    } else if imoveis_hits > 0 && family == Some(EntityFamily::Cadastro) {
        total += imoveis_hits as f64 * IMOVEIS_CADASTRO_BOOST;
    }

    // Signal 7: "processos ativos" (lawsuits) vs "ativos" (assets).
    if mentions_processos_ativos(tokens) {
        if meta.intents.iter().any(|i| i == "judicial") {
            total += PROC_ATIVOS_JUDICIAL_BONUS;
        }
        if meta.intents.iter().any(|i| i == "processos") {
            total += PROC_ATIVOS_PROCESSOS_BONUS;
        }
        if meta.intents.iter().any(|i| i == "ativos") {
            total -= PROC_ATIVOS_ATIVOS_PENALTY;
        }
    }

    // Signal 8: intent fallback when nothing emerged above.
    if best_intent.is_none() {
        best_intent = family.map(|f| f.intent_label().to_string());
    }
    if best_intent.is_none() {
        best_intent = meta.intents.first().cloned();
    }
    if let Some(family) = family
        && (best_intent.is_none() || best_intent.as_deref() == Some("historico"))
    {
        best_intent = Some(family.intent_label().to_string());
    }

    (total, best_intent)
}

/// Token sequence contains "process…" within three tokens of "ativo…"
/// in either order.
fn mentions_processos_ativos(tokens: &[String]) -> bool {
    for (idx, token) in tokens.iter().enumerate() {
        if token.starts_with("process") {
            let window = &tokens[(idx + 1)..tokens.len().min(idx + 4)];
            if window.iter().any(|w| w.starts_with("ativo")) {
                return true;
            }
        }
        if token.starts_with("ativo") {
            let window = &tokens[idx.saturating_sub(3)..idx];
            if window.iter().any(|w| w.starts_with("process")) {
                return true;
            }
        }
    }
    false
}

/// Score every catalog entity, keeping positive scores only.
pub fn rank_entities(
    ctx: &QuestionContext,
    catalog: &Catalog,
    snapshot: &VocabSnapshot,
) -> Result<Vec<EntityScore>, ValidationError> {
    if catalog.is_empty() {
        return Err(ValidationError::EmptyCatalog);
    }
    let mut results = Vec::new();
    for entity in catalog.entities() {
        let (score, intent) = score_entity(ctx, entity, catalog, snapshot);
        if score > 0.0 {
            results.push(EntityScore {
                entity: entity.to_string(),
                intent,
                score,
            });
        }
    }
    Ok(results)
}

/// Collapse the ranked list to its leader when it decisively dominates:
/// top ≥ margin × second, or second ≤ 0.
fn apply_leader_margin(scores: &mut Vec<EntityScore>) {
    if scores.len() >= 2 {
        let first = scores[0].score;
        let second = scores[1].score;
        if second <= 0.0 || first >= LEADER_MARGIN * second {
            scores.truncate(1);
        }
    }
}

/// Rank, prefer the guessed-intent partition, truncate to a dominant leader,
/// then apply the minimum score and top-K cut.
pub fn choose_entities(
    ctx: &QuestionContext,
    catalog: &Catalog,
    snapshot: &VocabSnapshot,
    min_score: f64,
    top_k: usize,
) -> Result<Vec<EntityScore>, ValidationError> {
    let scores = rank_entities(ctx, catalog, snapshot)?;

    let mut scores = if let Some(guessed) = ctx.guessed_intent.as_deref() {
        let (compat, incompat): (Vec<EntityScore>, Vec<EntityScore>) = scores
            .into_iter()
            .partition(|item| item.intent.as_deref() == Some(guessed));
        if compat.is_empty() { incompat } else { compat }
    } else {
        scores
    };

    scores = scores
        .into_iter()
        .sorted_by(|a, b| b.score.total_cmp(&a.score))
        .collect();

    apply_leader_margin(&mut scores);

    Ok(scores
        .into_iter()
        .filter(|item| item.score >= min_score)
        .take(top_k)
        .collect())
}
