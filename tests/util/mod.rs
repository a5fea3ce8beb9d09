//! Shared fixtures for integration tests: a small catalog on disk and a
//! SQLite database with matching views.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use catalog_ask::cache::MemoryCache;
use catalog_ask::catalog::Catalog;
use catalog_ask::config::Settings;
use catalog_ask::executor::{QueryExecutor, SqliteExecutor};
use catalog_ask::formatter::PassthroughFormatter;
use catalog_ask::routing::AskService;
use catalog_ask::tickers::TickerCache;
use catalog_ask::vocab::AskVocabulary;

pub const DIVIDENDS_DOC: &str = r#"
entity: view_fiis_history_dividends
description: Historical dividend payments per fund
columns: [ticker, payment_date, amount]
identifiers: [ticker]
default_date_field: payment_date
ask:
  intents: [dividends]
  keywords: [dividendo, provento, rendimento]
  synonyms:
    dividends: [dividendo, provento, rendimento, pagamento]
"#;

pub const PRICES_DOC: &str = r#"
entity: view_fiis_prices
description: Daily closing prices per fund
columns: [ticker, trade_date, close_price]
identifiers: [ticker]
default_date_field: trade_date
ask:
  intents: [precos]
  keywords: [preco, cotacao, fechamento]
  synonyms:
    precos: [preco, cotacao, fechamento]
"#;

pub const INFO_DOC: &str = r#"
entity: view_fiis_info
description: Fund registry data
columns: [ticker, fund_name, cnpj, segment]
identifiers: [ticker]
ask:
  intents: [cadastro]
  keywords: [cadastro, nome, cnpj, segmento]
  synonyms:
    cadastro: [cadastro, nome, cnpj, segmento]
"#;

/// Write the fixture catalog documents into a fresh directory.
pub fn write_catalog_dir() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    for (name, doc) in [
        ("view_fiis_history_dividends.yaml", DIVIDENDS_DOC),
        ("view_fiis_prices.yaml", PRICES_DOC),
        ("view_fiis_info.yaml", INFO_DOC),
    ] {
        std::fs::write(dir.path().join(name), doc).expect("write doc");
    }
    dir
}

/// In-memory SQLite populated with rows matching the fixture catalog.
pub fn fixture_executor() -> Arc<SqliteExecutor> {
    let exec = SqliteExecutor::in_memory().expect("sqlite");
    exec.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TABLE view_fiis_info (ticker TEXT, fund_name TEXT, cnpj TEXT, segment TEXT);
             INSERT INTO view_fiis_info VALUES
               ('HGLG11', 'CSHG Logística', '11.222.333/0001-44', 'logistics'),
               ('XPML11', 'XP Malls', '22.333.444/0001-55', 'malls');

             CREATE TABLE view_fiis_history_dividends (ticker TEXT, payment_date TEXT, amount REAL);
             INSERT INTO view_fiis_history_dividends VALUES
               ('HGLG11', '2024-05-15', 1.10),
               ('HGLG11', '2024-06-14', 1.20),
               ('HGLG11', '2024-07-15', 1.25),
               ('XPML11', '2024-07-10', 0.80);

             CREATE TABLE view_fiis_prices (ticker TEXT, trade_date TEXT, close_price REAL);
             INSERT INTO view_fiis_prices VALUES
               ('HGLG11', '2024-07-12', 162.50),
               ('HGLG11', '2024-07-15', 163.10),
               ('XPML11', '2024-07-15', 115.40);",
        )
        .expect("seed db");
    });
    Arc::new(exec)
}

/// Assemble the full pipeline on top of the fixtures. The returned `TempDir`
/// keeps the catalog directory alive for the test's duration.
pub fn fixture_service() -> (TempDir, AskService) {
    let dir = write_catalog_dir();
    let catalog = Arc::new(Catalog::load_dir(dir.path()).expect("load catalog"));
    let executor = fixture_executor() as Arc<dyn QueryExecutor>;
    let settings = Settings::default();
    let vocab = AskVocabulary::new(Arc::clone(&catalog), Duration::from_secs(60));
    let tickers = TickerCache::new(
        Arc::new(MemoryCache::new()),
        Arc::clone(&executor),
        settings.tickers_source_sql.clone(),
        Duration::from_secs(300),
    );
    let service = AskService::new(
        catalog,
        vocab,
        tickers,
        executor,
        Box::new(PassthroughFormatter),
        settings,
    );
    (dir, service)
}
