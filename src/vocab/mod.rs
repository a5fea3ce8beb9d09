//! TTL-cached vocabulary index built from catalog ask metadata.
//!
//! Scoring needs fast token-set lookups, so the per-entity ask blocks are
//! materialized into [`EntityAskMeta`] and a global intent→token union. The
//! whole structure is rebuilt as one immutable [`VocabSnapshot`] no more often
//! than the TTL; readers clone an `Arc` to the current generation, writers
//! build the next generation off to the side and swap it in under the write
//! lock. A reader can never observe a half-built index.
//!
//! Catalog views carry sparse metadata in practice, so a small built-in
//! ontology seeds the global vocabulary and supplies default "latest" words
//! for entities that declare none.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::catalog::{AskBlock, Catalog, ViewDoc};
use crate::text::{tokenize_all, unaccent_lower};

/// Default weight applied to keyword hits when the catalog declares none.
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 1.0;
/// Default weight applied to synonym hits when the catalog declares none.
pub const DEFAULT_SYNONYM_WEIGHT: f64 = 2.0;

/// Built-in intent vocabulary merged under the per-view `intent_tokens`.
/// Keeps routing functional for catalogs with sparse ask metadata.
const ONTOLOGY_INTENT_TOKENS: &[(&str, &[&str])] = &[
    (
        "dividends",
        &[
            "dividendo",
            "dividendos",
            "rendimento",
            "rendimentos",
            "provento",
            "proventos",
            "pagamento",
        ],
    ),
    (
        "precos",
        &[
            "preco", "precos", "cotacao", "cotacoes", "fechamento", "abertura",
        ],
    ),
    (
        "cadastro",
        &[
            "cadastro",
            "informacoes",
            "dados",
            "cnpj",
            "administrador",
            "gestor",
            "segmento",
        ],
    ),
    (
        "judicial",
        &["processo", "processos", "judicial", "judiciais", "liminar"],
    ),
    (
        "imoveis",
        &[
            "imovel",
            "imoveis",
            "propriedade",
            "propriedades",
            "endereco",
            "inquilino",
            "vacancia",
        ],
    ),
    (
        "indicadores",
        &[
            "indicador",
            "indicadores",
            "taxa",
            "taxas",
            "selic",
            "ipca",
            "cdi",
            "inflacao",
        ],
    ),
];

/// Ontology fallback for "most recent" phrasing, already normalized.
const DEFAULT_LATEST_WORDS: &[&str] = &["ultimo", "ultima", "mais recente", "recente"];

/// One weighted synonym token set, attributed to an intent.
#[derive(Debug, Clone, PartialEq)]
pub struct SynonymSource {
    pub intent: String,
    pub tokens: BTreeSet<String>,
    pub weight: f64,
}

/// Normalized, tokenized ask metadata for one entity.
#[derive(Debug, Clone)]
pub struct EntityAskMeta {
    /// Declared intents, entity-level first, column contributions appended.
    pub intents: Vec<String>,
    /// Deduplicated normalized keyword tokens, declaration order kept.
    pub keywords_normalized: Vec<String>,
    /// Normalized latest-words phrases (not tokenized; matched as substrings).
    pub latest_words_normalized: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    pub synonym_sources: Vec<SynonymSource>,
    /// Entity-declared intent→token seeds for the global vocabulary.
    pub intent_tokens: BTreeMap<String, BTreeSet<String>>,
}

impl Default for EntityAskMeta {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert("keywords".to_string(), DEFAULT_KEYWORD_WEIGHT);
        weights.insert("synonyms".to_string(), DEFAULT_SYNONYM_WEIGHT);
        Self {
            intents: Vec::new(),
            keywords_normalized: Vec::new(),
            latest_words_normalized: Vec::new(),
            weights,
            synonym_sources: Vec::new(),
            intent_tokens: BTreeMap::new(),
        }
    }
}

impl EntityAskMeta {
    pub fn keyword_weight(&self) -> f64 {
        self.weights
            .get("keywords")
            .copied()
            .unwrap_or(DEFAULT_KEYWORD_WEIGHT)
    }

    pub fn synonym_weight(&self) -> f64 {
        self.weights
            .get("synonyms")
            .copied()
            .unwrap_or(DEFAULT_SYNONYM_WEIGHT)
    }
}

/// One fully-built vocabulary generation.
#[derive(Debug, Default)]
pub struct VocabSnapshot {
    entity_meta: BTreeMap<String, EntityAskMeta>,
    global_tokens: BTreeMap<String, BTreeSet<String>>,
}

impl VocabSnapshot {
    /// Cached metadata, or an all-empty default for unknown entities.
    pub fn entity_meta(&self, entity: &str) -> EntityAskMeta {
        self.entity_meta.get(entity).cloned().unwrap_or_default()
    }

    /// Union of every entity's `intent_tokens` plus the built-in ontology.
    pub fn global_intent_tokens(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.global_tokens
    }

    pub fn intent_tokens(&self, intent: &str) -> Option<&BTreeSet<String>> {
        self.global_tokens.get(intent)
    }

    /// Every token in every intent vocabulary (domain-anchor check).
    pub fn all_domain_tokens(&self) -> BTreeSet<String> {
        self.global_tokens.values().flatten().cloned().collect()
    }
}

struct State {
    snapshot: Arc<VocabSnapshot>,
    expires_at: Option<Instant>,
}

/// Process-wide vocabulary cache with lazy TTL rebuild.
pub struct AskVocabulary {
    catalog: Arc<Catalog>,
    ttl: Duration,
    state: RwLock<State>,
}

impl AskVocabulary {
    pub fn new(catalog: Arc<Catalog>, ttl: Duration) -> Self {
        Self {
            catalog,
            ttl,
            state: RwLock::new(State {
                snapshot: Arc::new(VocabSnapshot::default()),
                expires_at: None,
            }),
        }
    }

    /// Current generation, rebuilding first if the TTL elapsed.
    pub fn snapshot(&self) -> Arc<VocabSnapshot> {
        {
            let state = self.state.read();
            if let Some(expires_at) = state.expires_at
                && Instant::now() < expires_at
            {
                return Arc::clone(&state.snapshot);
            }
        }

        let mut state = self.state.write();
        // Another thread may have rebuilt while we waited for the lock.
        if let Some(expires_at) = state.expires_at
            && Instant::now() < expires_at
        {
            return Arc::clone(&state.snapshot);
        }
        let next = Arc::new(build_snapshot(&self.catalog));
        state.snapshot = Arc::clone(&next);
        state.expires_at = Some(Instant::now() + self.ttl);
        next
    }

    /// Force the next access to rebuild.
    pub fn invalidate(&self) {
        self.state.write().expires_at = None;
    }

    /// Ontology fallback used when an entity declares no `latest_words`.
    pub fn latest_words_defaults() -> Vec<String> {
        DEFAULT_LATEST_WORDS.iter().map(|w| w.to_string()).collect()
    }
}

fn build_snapshot(catalog: &Catalog) -> VocabSnapshot {
    let mut entity_meta = BTreeMap::new();
    let mut global_tokens: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (intent, words) in ONTOLOGY_INTENT_TOKENS {
        global_tokens
            .entry(intent.to_string())
            .or_default()
            .extend(words.iter().map(|w| w.to_string()));
    }

    for (entity, doc) in catalog.iter_documents() {
        let meta = build_entity_meta(doc);
        for (intent, tokens) in &meta.intent_tokens {
            if !tokens.is_empty() {
                global_tokens
                    .entry(intent.clone())
                    .or_default()
                    .extend(tokens.iter().cloned());
            }
        }
        entity_meta.insert(entity.to_string(), meta);
    }

    debug!(
        entities = entity_meta.len(),
        intents = global_tokens.len(),
        "vocabulary snapshot rebuilt"
    );

    VocabSnapshot {
        entity_meta,
        global_tokens,
    }
}

fn build_entity_meta(doc: &ViewDoc) -> EntityAskMeta {
    let empty = AskBlock::default();
    let ask = doc.ask.as_ref().unwrap_or(&empty);

    let mut intents = unique(ask.intents.iter().cloned());

    let keywords_normalized = unique(tokenize_all(&ask.keywords));

    let latest_words_normalized: Vec<String> = ask
        .latest_words
        .iter()
        .map(|w| unaccent_lower(w))
        .filter(|w| !w.is_empty())
        .collect();

    let weights = merge_weights(&ask.weights, None);
    let base_syn_weight = weights
        .get("synonyms")
        .copied()
        .unwrap_or(DEFAULT_SYNONYM_WEIGHT);

    let mut synonym_sources = Vec::new();
    for (intent, words) in &ask.synonyms {
        let tokens = normalize_token_set(words);
        if !tokens.is_empty() {
            synonym_sources.push(SynonymSource {
                intent: intent.clone(),
                tokens,
                weight: base_syn_weight,
            });
        }
    }

    for col in &doc.columns {
        let Some(col_ask) = col.ask() else { continue };
        for intent in unique(col_ask.intents.iter().cloned()) {
            if !intent.is_empty() && !intents.contains(&intent) {
                intents.push(intent);
            }
        }
        let col_weights = merge_weights(&col_ask.weights, Some(&weights));
        let syn_weight = col_weights
            .get("synonyms")
            .copied()
            .unwrap_or(base_syn_weight);
        for (intent, words) in &col_ask.synonyms {
            let tokens = normalize_token_set(words);
            if !tokens.is_empty() {
                synonym_sources.push(SynonymSource {
                    intent: intent.clone(),
                    tokens,
                    weight: syn_weight,
                });
            }
        }
    }

    let intent_tokens = ask
        .intent_tokens
        .iter()
        .map(|(intent, words)| {
            let normalized: BTreeSet<String> = words
                .iter()
                .map(|w| unaccent_lower(w))
                .filter(|w| !w.is_empty())
                .collect();
            (intent.clone(), normalized)
        })
        .filter(|(_, tokens)| !tokens.is_empty())
        .collect();

    EntityAskMeta {
        intents,
        keywords_normalized,
        latest_words_normalized,
        weights,
        synonym_sources,
        intent_tokens,
    }
}

/// Tokenize a synonym word list; if tokenization eats everything (e.g. all
/// single-character words), fall back to whole-phrase normalization.
fn normalize_token_set(words: &[String]) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = tokenize_all(words).into_iter().collect();
    if tokens.is_empty() {
        tokens = words
            .iter()
            .map(|w| unaccent_lower(w))
            .filter(|w| !w.is_empty())
            .collect();
    }
    tokens
}

fn merge_weights(
    raw: &BTreeMap<String, f64>,
    base: Option<&BTreeMap<String, f64>>,
) -> BTreeMap<String, f64> {
    let mut weights = base.cloned().unwrap_or_default();
    for (k, v) in raw {
        weights.insert(k.clone(), *v);
    }
    weights
        .entry("keywords".to_string())
        .or_insert(DEFAULT_KEYWORD_WEIGHT);
    weights
        .entry("synonyms".to_string())
        .or_insert(DEFAULT_SYNONYM_WEIGHT);
    weights
}

fn unique(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for v in values {
        if !v.is_empty() && seen.insert(v.clone()) {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> ViewDoc {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn vocab_for(yamls: &[&str]) -> AskVocabulary {
        let catalog = Catalog::from_docs(yamls.iter().map(|y| doc(y)));
        AskVocabulary::new(Arc::new(catalog), Duration::from_secs(60))
    }

    #[test]
    fn entity_meta_normalizes_and_dedupes_keywords() {
        let vocab = vocab_for(&[r#"
entity: v
ask:
  keywords: ["Últimos Preços", "preços"]
"#]);
        let meta = vocab.snapshot().entity_meta("v");
        assert_eq!(meta.keywords_normalized, vec!["ultimos", "precos"]);
    }

    #[test]
    fn unknown_entity_yields_empty_default() {
        let vocab = vocab_for(&[]);
        let meta = vocab.snapshot().entity_meta("missing");
        assert!(meta.intents.is_empty());
        assert_eq!(meta.synonym_weight(), DEFAULT_SYNONYM_WEIGHT);
    }

    #[test]
    fn column_ask_blocks_merge_intents_and_synonyms() {
        let vocab = vocab_for(&[r#"
entity: v
columns:
  - name: payment_date
    ask:
      intents: [dividends, historico]
      synonyms:
        dividends: [provento, rendimento]
      weights:
        synonyms: 4.0
ask:
  intents: [dividends]
  synonyms:
    dividends: [dividendo]
"#]);
        let meta = vocab.snapshot().entity_meta("v");
        assert_eq!(meta.intents, vec!["dividends", "historico"]);
        assert_eq!(meta.synonym_sources.len(), 2);
        let col_source = &meta.synonym_sources[1];
        assert_eq!(col_source.weight, 4.0);
        assert!(col_source.tokens.contains("provento"));
        let entity_source = &meta.synonym_sources[0];
        assert_eq!(entity_source.weight, DEFAULT_SYNONYM_WEIGHT);
    }

    #[test]
    fn global_tokens_merge_ontology_and_views() {
        let vocab = vocab_for(&[r#"
entity: v
ask:
  intent_tokens:
    dividends: [distribuição]
"#]);
        let snap = vocab.snapshot();
        let dividends = snap.intent_tokens("dividends").unwrap();
        assert!(dividends.contains("dividendo"), "ontology seed");
        assert!(dividends.contains("distribuicao"), "view contribution, normalized");
    }

    #[test]
    fn latest_words_defaults_expose_ontology_tokens() {
        let defaults = AskVocabulary::latest_words_defaults();
        assert!(defaults.iter().any(|w| w == "ultimo"));
        assert!(defaults.iter().any(|w| w == "recente"));
    }

    #[test]
    fn snapshot_is_stable_within_ttl_and_rebuilds_on_invalidate() {
        let vocab = vocab_for(&[r#"{entity: v, ask: {keywords: [fundo]}}"#]);
        let a = vocab.snapshot();
        let b = vocab.snapshot();
        assert!(Arc::ptr_eq(&a, &b), "same generation inside the TTL");

        vocab.invalidate();
        let c = vocab.snapshot();
        assert!(!Arc::ptr_eq(&a, &c), "invalidate forces a new generation");
    }

    #[test]
    fn empty_token_sets_are_dropped() {
        let vocab = vocab_for(&[r#"
entity: v
ask:
  synonyms:
    dividends: []
  intent_tokens:
    precos: []
"#]);
        let meta = vocab.snapshot().entity_meta("v");
        assert!(meta.synonym_sources.is_empty());
        assert!(meta.intent_tokens.is_empty());
    }
}
