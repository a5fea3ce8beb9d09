//! Query execution seam.
//!
//! The pipeline only builds SQL; running it belongs to a collaborator behind
//! [`QueryExecutor`]. [`SqliteExecutor`] is the bundled dev/test backend: it
//! binds the builder's named parameters against SQLite so the whole pipeline
//! can be exercised without a production database.

use std::path::Path;

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::Value;

/// One result row, column name → JSON value.
pub type Row = serde_json::Map<String, Value>;

/// External executor contract. `run` receives SQL with `:name` placeholders
/// and the corresponding parameter values (names without the colon).
pub trait QueryExecutor: Send + Sync {
    fn run(&self, sql: &str, params: &[(String, Value)], row_limit: u32) -> Result<Vec<Row>>;

    /// Real columns of a view, for catalog drift audits.
    fn columns_for(&self, entity: &str) -> Result<Vec<String>>;
}

/// SQLite-backed executor (dev and tests).
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite database {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Direct access for fixture setup in tests.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.conn.lock())
    }
}

impl QueryExecutor for SqliteExecutor {
    fn run(&self, sql: &str, params: &[(String, Value)], row_limit: u32) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .with_context(|| format!("prepare: {sql}"))?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let owned: Vec<(String, rusqlite::types::Value)> = params
            .iter()
            .map(|(name, value)| (format!(":{name}"), json_to_sql(value)))
            .collect();
        let bound: Vec<(&str, &dyn rusqlite::ToSql)> = owned
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
            .collect();

        let mut rows = stmt.query(&bound[..])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            if out.len() >= row_limit as usize {
                break;
            }
            let mut map = Row::new();
            for (idx, name) in column_names.iter().enumerate() {
                map.insert(name.clone(), sql_to_json(row.get_ref(idx)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn columns_for(&self, entity: &str) -> Result<Vec<String>> {
        if entity.is_empty()
            || !entity
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("invalid entity name '{entity}'");
        }
        let conn = self.conn.lock();
        let stmt = conn.prepare(&format!("SELECT * FROM {entity} LIMIT 0"))?;
        Ok(stmt.column_names().iter().map(|s| s.to_string()).collect())
    }
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Static executor for tests: always returns the same rows.
pub struct StaticExecutor {
    rows: Vec<Row>,
    /// When set, `run` fails — simulates an unreachable source.
    pub fail: std::sync::atomic::AtomicBool,
}

impl StaticExecutor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn from_values(column: &str, values: &[&str]) -> Self {
        let rows = values
            .iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert(column.to_string(), Value::String((*v).to_string()));
                row
            })
            .collect();
        Self::new(rows)
    }
}

impl QueryExecutor for StaticExecutor {
    fn run(&self, _sql: &str, _params: &[(String, Value)], row_limit: u32) -> Result<Vec<Row>> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            bail!("row source unreachable");
        }
        Ok(self.rows.iter().take(row_limit as usize).cloned().collect())
    }

    fn columns_for(&self, _entity: &str) -> Result<Vec<String>> {
        let mut cols: Vec<String> = Vec::new();
        if let Some(first) = self.rows.first() {
            cols.extend(first.keys().cloned());
        }
        Ok(cols)
    }
}
