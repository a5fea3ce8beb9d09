//! Row presentation seam.
//!
//! Result rows pass through a [`RowFormatter`] before entering the response
//! envelope. The default implementation returns rows untouched; deployments
//! that want localized currency or date rendering plug in their own.

use anyhow::Result;

use crate::executor::Row;

pub trait RowFormatter: Send + Sync {
    fn to_human(&self, rows: Vec<Row>) -> Result<Vec<Row>>;
}

/// Identity formatter.
#[derive(Debug, Default)]
pub struct PassthroughFormatter;

impl RowFormatter for PassthroughFormatter {
    fn to_human(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn passthrough_keeps_rows_intact() {
        let mut row = Row::new();
        row.insert("amount".to_string(), json!(1.1));
        let rows = PassthroughFormatter.to_human(vec![row.clone()]).unwrap();
        assert_eq!(rows, vec![row]);
    }
}
