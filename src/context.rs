//! Question context: the immutable per-request view of the input text.

use crate::scoring::guess_intent;
use crate::text::{tokenize, unaccent_lower};
use crate::tickers::TickerCache;
use crate::vocab::VocabSnapshot;

/// Everything scoring and planning need to know about one question.
/// Built once per request; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct QuestionContext {
    pub original: String,
    pub normalized: String,
    /// Ordered normalized tokens, repeats kept.
    pub tokens: Vec<String>,
    /// Ticker mentions, deduplicated, first-seen order, uppercase.
    pub tickers: Vec<String>,
    /// Single best coarse intent, `None` on ties or no hits.
    pub guessed_intent: Option<String>,
    /// Evidence the question belongs to this domain at all.
    pub has_domain_anchor: bool,
}

/// Build the context for a question against the current vocabulary and
/// ticker snapshot.
pub fn build_context(
    question: &str,
    snapshot: &VocabSnapshot,
    ticker_cache: &TickerCache,
) -> QuestionContext {
    let tokens = tokenize(question);
    let tickers = ticker_cache.extract(question);
    let guessed_intent = guess_intent(&tokens, snapshot);
    let has_domain_anchor = !tickers.is_empty() || intersects_domain(&tokens, snapshot);

    QuestionContext {
        original: question.to_string(),
        normalized: unaccent_lower(question),
        tokens,
        tickers,
        guessed_intent,
        has_domain_anchor,
    }
}

fn intersects_domain(tokens: &[String], snapshot: &VocabSnapshot) -> bool {
    if tokens.is_empty() {
        return false;
    }
    let domain = snapshot.all_domain_tokens();
    tokens.iter().any(|t| domain.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::catalog::Catalog;
    use crate::executor::{QueryExecutor, StaticExecutor};
    use crate::vocab::AskVocabulary;
    use std::sync::Arc;
    use std::time::Duration;

    fn fixture() -> (AskVocabulary, TickerCache) {
        let doc: crate::catalog::ViewDoc = serde_yaml::from_str(
            r#"
entity: view_fiis_history_dividends
columns: [ticker, payment_date, amount]
ask:
  intents: [dividends]
  intent_tokens:
    dividends: [dividendo, provento]
"#,
        )
        .unwrap();
        let vocab = AskVocabulary::new(
            Arc::new(Catalog::from_docs([doc])),
            Duration::from_secs(60),
        );
        let tickers = TickerCache::new(
            Arc::new(MemoryCache::new()),
            Arc::new(StaticExecutor::from_values("ticker", &["HGLG11"])) as Arc<dyn QueryExecutor>,
            "SELECT ticker FROM view_fiis_info ORDER BY ticker",
            Duration::from_secs(300),
        );
        (vocab, tickers)
    }

    #[test]
    fn domain_question_builds_full_context() {
        let (vocab, tickers) = fixture();
        let ctx = build_context("qual o último dividendo do HGLG11", &vocab.snapshot(), &tickers);
        assert_eq!(ctx.tickers, vec!["HGLG11"]);
        assert_eq!(ctx.guessed_intent.as_deref(), Some("dividends"));
        assert!(ctx.has_domain_anchor);
        assert_eq!(ctx.normalized, "qual o ultimo dividendo do hglg11");
    }

    #[test]
    fn off_domain_question_has_no_anchor() {
        let (vocab, tickers) = fixture();
        let ctx = build_context("quem descobriu o brasil", &vocab.snapshot(), &tickers);
        assert!(ctx.tickers.is_empty());
        assert!(!ctx.has_domain_anchor);
        assert_eq!(ctx.guessed_intent, None);
    }

    #[test]
    fn domain_token_without_ticker_is_an_anchor() {
        let (vocab, tickers) = fixture();
        let ctx = build_context("quanto pagaram de provento", &vocab.snapshot(), &tickers);
        assert!(ctx.tickers.is_empty());
        assert!(ctx.has_domain_anchor);
    }

    #[test]
    fn ticker_alone_is_a_domain_anchor() {
        let (vocab, tickers) = fixture();
        let ctx = build_context("HGLG11", &vocab.snapshot(), &tickers);
        assert!(ctx.has_domain_anchor);
        assert_eq!(ctx.guessed_intent, None);
    }
}
