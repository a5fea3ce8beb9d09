//! Whitelisted SQL builder.
//!
//! Turns a validated [`RunRequest`] into a `SELECT` with `:name` placeholders
//! and a parameter list. Identifier positions (entity, columns, ORDER BY) are
//! only ever filled from the catalog whitelist; every value travels as a bound
//! parameter. The one literal is `LIMIT`, emitted from a clamped integer.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Catalog;
use crate::error::ValidationError;
use crate::planner::{default_date_field, parse_date_value};

static TICKER_BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{4}$").expect("valid regex"));

const DATE_KEY_SUFFIXES: [&str; 5] = ["date", "data", "_from", "_to", "_until"];

/// Requested ordering. The direction is kept as free text on purpose: an
/// unrecognized direction falls back to ascending instead of erroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub dir: String,
}

/// One query against one catalog entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub entity: String,
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

/// Named bind parameters, in the order they appear in the SQL text.
pub type Params = Vec<(String, Value)>;

/// `hglg` → `HGLG11`; everything else is just uppercased.
fn normalize_ticker_value(value: &str) -> String {
    let trimmed = value.trim();
    if TICKER_BARE_RE.is_match(trimmed) {
        format!("{}11", trimmed.to_uppercase())
    } else {
        trimmed.to_uppercase()
    }
}

/// BR-format dates (`DD/MM/YYYY`, `DD/MM/YY`) become ISO; anything else is
/// passed through untouched.
fn normalize_date_value(value: &str) -> String {
    match parse_date_value(value) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => value.to_string(),
    }
}

fn is_date_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.ends_with("_at") || DATE_KEY_SUFFIXES.iter().any(|s| key.ends_with(s))
}

/// Normalize a request in place: entity existence, ticker spellings
/// (`hglg` → `HGLG11`), BR dates in date-like filters, limit clamped to
/// `1..=max_limit`.
pub fn normalize_request(
    catalog: &Catalog,
    mut request: RunRequest,
    max_limit: u32,
) -> Result<RunRequest, ValidationError> {
    if catalog.get(&request.entity).is_none() {
        return Err(ValidationError::UnknownEntity(request.entity));
    }

    for (key, value) in request.filters.iter_mut() {
        if key == "ticker" {
            match value {
                Value::String(s) => *value = Value::String(normalize_ticker_value(s)),
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if let Value::String(s) = item {
                            *item = Value::String(normalize_ticker_value(s));
                        }
                    }
                }
                _ => {}
            }
        } else if is_date_key(key)
            && let Value::String(s) = value
        {
            *value = Value::String(normalize_date_value(s));
        }
    }

    request.limit = request.limit.clamp(1, max_limit.max(1));
    Ok(request)
}

/// Build the SQL text and bind parameters for a normalized request.
pub fn build_sql(catalog: &Catalog, request: &RunRequest) -> Result<(String, Params), ValidationError> {
    let entity = &request.entity;
    if catalog.get(entity).is_none() {
        return Err(ValidationError::UnknownEntity(entity.clone()));
    }
    let columns = catalog.columns(entity);
    let column_set: BTreeSet<&str> = columns.iter().map(String::as_str).collect();
    let mut filterable: BTreeSet<&str> = column_set.clone();
    let identifiers = catalog.identifiers(entity);
    filterable.extend(identifiers.iter().map(String::as_str));

    // Explicit projection defaults to the declared column list, so a view
    // that grew extra columns in the database never leaks them.
    let select_clause = match &request.select {
        Some(fields) if !fields.is_empty() => {
            for field in fields {
                if !column_set.contains(field.as_str()) {
                    return Err(ValidationError::ColumnNotAllowed {
                        entity: entity.clone(),
                        column: field.clone(),
                    });
                }
            }
            fields.join(", ")
        }
        _ if !columns.is_empty() => columns.join(", "),
        _ => "*".to_string(),
    };

    let mut conditions: Vec<String> = Vec::new();
    let mut params: Params = Vec::new();

    for (key, value) in &request.filters {
        // Reserved range keys bind against the entity's date column.
        if key == "date_from" || key == "date_to" {
            let field = default_date_field(catalog, entity).ok_or_else(|| {
                ValidationError::NoDateColumn {
                    entity: entity.clone(),
                }
            })?;
            let op = if key == "date_from" { ">=" } else { "<=" };
            conditions.push(format!("{field} {op} :{key}"));
            params.push((key.clone(), value.clone()));
            continue;
        }

        // Per-column ranges: `<column>_from` / `<column>_to`. A range suffix
        // always means a range, so a key whose base is not a declared column
        // is rejected even when a column with the full key name exists.
        if let Some(base) = key.strip_suffix("_from").or_else(|| key.strip_suffix("_to")) {
            if base.is_empty() || !column_set.contains(base) {
                return Err(ValidationError::RangeFieldNotAllowed {
                    entity: entity.clone(),
                    column: key.clone(),
                });
            }
            let op = if key.ends_with("_from") { ">=" } else { "<=" };
            conditions.push(format!("{base} {op} :{key}"));
            params.push((key.clone(), value.clone()));
            continue;
        }

        if !filterable.contains(key.as_str()) {
            return Err(ValidationError::FilterNotAllowed {
                entity: entity.clone(),
                column: key.clone(),
            });
        }

        match value {
            Value::Array(items) => {
                // Empty lists match nothing useful; skip the condition.
                if items.is_empty() {
                    continue;
                }
                let mut names = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    let name = format!("{key}_{idx}");
                    names.push(format!(":{name}"));
                    params.push((name, item.clone()));
                }
                conditions.push(format!("{key} IN ({})", names.join(", ")));
            }
            _ => {
                conditions.push(format!("{key} = :{key}"));
                params.push((key.clone(), value.clone()));
            }
        }
    }

    let mut sql = format!("SELECT {select_clause} FROM {entity}");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if let Some(order) = &request.order_by {
        let allowed = catalog.order_by_whitelist(entity);
        if !allowed.iter().any(|c| c == &order.field) {
            return Err(ValidationError::OrderByNotAllowed {
                entity: entity.clone(),
                column: order.field.clone(),
            });
        }
        let dir = if order.dir.eq_ignore_ascii_case("desc") {
            "DESC"
        } else {
            "ASC"
        };
        sql.push_str(&format!(" ORDER BY {} {dir}", order.field));
    }

    sql.push_str(&format!(" LIMIT {}", request.limit));
    Ok((sql, params))
}
