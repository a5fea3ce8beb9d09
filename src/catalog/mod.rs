//! Catalog accessor: the declared set of queryable views.
//!
//! The catalog is the single source of truth for what can be selected,
//! filtered, and ordered. Everything downstream (vocabulary, planner, query
//! builder) validates against it rather than trusting request input.

mod types;

pub use types::{AskBlock, ColumnDef, ColumnSpec, ViewDoc};

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

/// Failure while loading catalog documents from disk.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog dir {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog document {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate entity '{entity}' (second definition in {file})")]
    DuplicateEntity { entity: String, file: String },
}

/// In-memory catalog, keyed by entity name.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    docs: BTreeMap<String, ViewDoc>,
}

impl Catalog {
    /// Build a catalog from already-parsed documents (tests, embedding).
    pub fn from_docs(docs: impl IntoIterator<Item = ViewDoc>) -> Self {
        let mut map = BTreeMap::new();
        for doc in docs {
            map.insert(doc.entity.clone(), doc);
        }
        Self { docs: map }
    }

    /// Load every `*.yaml`/`*.yml` under `dir`. A document without an
    /// `entity` field takes the file stem as its name.
    pub fn load_dir(dir: &Path) -> Result<Self, CatalogError> {
        let entries = std::fs::read_dir(dir).map_err(|source| CatalogError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut docs: BTreeMap<String, ViewDoc> = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|source| CatalogError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            let file = path.display().to_string();
            let raw = std::fs::read_to_string(&path).map_err(|source| CatalogError::Io {
                path: file.clone(),
                source,
            })?;
            let mut doc: ViewDoc = serde_yaml::from_str(&raw)
                .map_err(|source| CatalogError::Parse { file: file.clone(), source })?;
            if doc.entity.is_empty() {
                doc.entity = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
            }
            if docs.contains_key(&doc.entity) {
                return Err(CatalogError::DuplicateEntity {
                    entity: doc.entity,
                    file,
                });
            }
            if doc.columns.is_empty() {
                warn!(entity = %doc.entity, file = %file, "catalog document declares no columns");
            }
            docs.insert(doc.entity.clone(), doc);
        }

        info!(views = docs.len(), dir = %dir.display(), "catalog loaded");
        Ok(Self { docs })
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Entity names in sorted order.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.docs.keys().map(String::as_str)
    }

    pub fn get(&self, entity: &str) -> Option<&ViewDoc> {
        self.docs.get(entity)
    }

    /// Real column names for an entity (empty when unknown).
    pub fn columns(&self, entity: &str) -> Vec<String> {
        self.docs
            .get(entity)
            .map(ViewDoc::column_names)
            .unwrap_or_default()
    }

    pub fn identifiers(&self, entity: &str) -> Vec<String> {
        self.docs
            .get(entity)
            .map(|d| d.identifiers.clone())
            .unwrap_or_default()
    }

    /// ORDER BY whitelist: declared subset, or all columns when undeclared.
    pub fn order_by_whitelist(&self, entity: &str) -> Vec<String> {
        self.docs
            .get(entity)
            .map(ViewDoc::order_by_names)
            .unwrap_or_default()
    }

    /// All documents, for vocabulary builds.
    pub fn iter_documents(&self) -> impl Iterator<Item = (&str, &ViewDoc)> {
        self.docs.iter().map(|(k, v)| (k.as_str(), v))
    }
}
