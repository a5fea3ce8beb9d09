pub mod builder;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod planner;
pub mod routing;
pub mod scoring;
pub mod text;
pub mod tickers;
pub mod vocab;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};

use crate::cache::MemoryCache;
use crate::catalog::Catalog;
use crate::config::Settings;
use crate::executor::{QueryExecutor, SqliteExecutor};
use crate::formatter::PassthroughFormatter;
use crate::planner::DateRangeOverride;
use crate::routing::{AskRequest, AskService};
use crate::tickers::TickerCache;
use crate::vocab::AskVocabulary;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "cask",
    version,
    about = "Natural-language questions over a declared view catalog"
)]
pub struct Cli {
    /// Catalog directory (defaults to CASK_CATALOG_DIR)
    #[arg(long)]
    pub catalog_dir: Option<PathBuf>,

    /// Path to the SQLite database (defaults to platform data dir)
    #[arg(long)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Route a question and print the response envelope as JSON
    Ask {
        /// Question text (words are joined with spaces)
        question: Vec<String>,

        /// Override the configured entity fan-out
        #[arg(long)]
        top_k: Option<usize>,

        /// Explicit range start (YYYY-MM-DD or DD/MM/YYYY)
        #[arg(long)]
        date_from: Option<String>,

        /// Explicit range end (YYYY-MM-DD or DD/MM/YYYY)
        #[arg(long)]
        date_to: Option<String>,
    },
    /// Inspect the loaded catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Manage the valid-ticker cache
    Tickers {
        #[command(subcommand)]
        command: TickerCommands,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// List declared entities
    List,
    /// Show one entity's declaration
    Show { entity: String },
    /// Compare declared columns against the database views
    Check,
}

#[derive(Subcommand, Debug)]
pub enum TickerCommands {
    /// Refresh the valid-ticker set from the database
    Refresh,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Ask {
            question,
            top_k,
            date_from,
            date_to,
        } => cmd_ask(&cli, question, *top_k, date_from.clone(), date_to.clone()),
        Commands::Catalog { command } => cmd_catalog(&cli, command),
        Commands::Tickers {
            command: TickerCommands::Refresh,
        } => cmd_tickers_refresh(&cli),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "cask", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_ask(
    cli: &Cli,
    question: &[String],
    top_k: Option<usize>,
    date_from: Option<String>,
    date_to: Option<String>,
) -> Result<()> {
    let question = question.join(" ");
    if question.trim().is_empty() {
        bail!("empty question");
    }
    let service = build_service(cli)?;
    service.tickers().warm_up();

    let date_range = if date_from.is_some() || date_to.is_some() {
        Some(DateRangeOverride {
            from: date_from,
            to: date_to,
        })
    } else {
        None
    };
    let request = AskRequest {
        question,
        top_k,
        date_range,
    };
    let response = service.route_question(&request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn cmd_catalog(cli: &Cli, command: &CatalogCommands) -> Result<()> {
    let settings = settings_for(cli);
    let catalog = load_catalog(&settings)?;

    match command {
        CatalogCommands::List => {
            for entity in catalog.entities() {
                let cols = catalog.columns(entity).len();
                println!("{entity}  ({cols} columns)");
            }
            Ok(())
        }
        CatalogCommands::Show { entity } => {
            let doc = catalog
                .get(entity)
                .with_context(|| format!("unknown entity '{entity}'"))?;
            println!("entity: {}", doc.entity);
            if let Some(desc) = &doc.description {
                println!("description: {desc}");
            }
            println!("columns: {}", doc.column_names().join(", "));
            if !doc.identifiers.is_empty() {
                println!("identifiers: {}", doc.identifiers.join(", "));
            }
            if let Some(field) = &doc.default_date_field {
                println!("default_date_field: {field}");
            }
            println!("order_by: {}", doc.order_by_names().join(", "));
            Ok(())
        }
        CatalogCommands::Check => {
            let executor = open_executor(&settings)?;
            let mut drift = 0usize;
            for entity in catalog.entities() {
                let declared = catalog.columns(entity);
                match executor.columns_for(entity) {
                    Ok(actual) => {
                        let missing = missing_columns(&declared, &actual);
                        if missing.is_empty() {
                            println!("{entity}: ok");
                        } else {
                            drift += 1;
                            println!(
                                "{entity}: declared but absent in database: {}",
                                missing.join(", ")
                            );
                        }
                    }
                    Err(err) => {
                        drift += 1;
                        println!("{entity}: {err}");
                    }
                }
            }
            if drift > 0 {
                bail!("{drift} entities drifted from the database");
            }
            Ok(())
        }
    }
}

fn cmd_tickers_refresh(cli: &Cli) -> Result<()> {
    let service = build_service(cli)?;
    let count = service.tickers().warm_up();
    println!("{count} tickers cached");
    Ok(())
}

/// Declared columns absent from the database view, declared order kept.
pub fn missing_columns(declared: &[String], actual: &[String]) -> Vec<String> {
    declared
        .iter()
        .filter(|c| !actual.contains(*c))
        .cloned()
        .collect()
}

fn settings_for(cli: &Cli) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(dir) = &cli.catalog_dir {
        settings.catalog_dir = Some(dir.clone());
    }
    if let Some(db) = &cli.db {
        settings.db_path = Some(db.clone());
    }
    settings
}

fn load_catalog(settings: &Settings) -> Result<Arc<Catalog>> {
    let dir = settings
        .catalog_dir
        .as_ref()
        .context("no catalog directory configured (set CASK_CATALOG_DIR or pass --catalog-dir)")?;
    Ok(Arc::new(Catalog::load_dir(dir)?))
}

fn open_executor(settings: &Settings) -> Result<Arc<dyn QueryExecutor>> {
    let db_path = settings.db_path.clone().unwrap_or_else(default_db_path);
    Ok(Arc::new(SqliteExecutor::open(&db_path)?))
}

fn build_service(cli: &Cli) -> Result<AskService> {
    let settings = settings_for(cli);
    let catalog = load_catalog(&settings)?;
    let executor = open_executor(&settings)?;
    let vocab = AskVocabulary::new(
        Arc::clone(&catalog),
        Duration::from_secs(settings.vocab_cache_ttl),
    );
    let tickers = TickerCache::new(
        Arc::new(MemoryCache::new()),
        Arc::clone(&executor),
        settings.tickers_source_sql.clone(),
        Duration::from_secs(settings.tickers_cache_ttl),
    );
    Ok(AskService::new(
        catalog,
        vocab,
        tickers,
        executor,
        Box::new(PassthroughFormatter),
        settings,
    ))
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("catalog_ask.db")
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "catalog-ask", "catalog-ask")
        .expect("project dirs available")
        .data_dir()
        .to_path_buf()
}
