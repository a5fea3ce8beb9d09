//! Typed schema for catalog view documents.
//!
//! Catalog authors write one YAML document per view. Historically the `ask`
//! block was parsed as an untyped map and tolerated "dotted" key spellings
//! (`weights.synonyms: 3.0` next to `weights: {synonyms: 3.0}`). Both forms
//! are accepted here, but they are canonicalized into one nested structure at
//! load time and any key that matches neither shape fails deserialization
//! with the offending key named.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// One catalog document: a queryable view plus its ask metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewDoc {
    /// Entity name; the loader falls back to the file stem when absent.
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub default_date_field: Option<String>,
    /// Subset of columns allowed in ORDER BY; `None` means "all columns".
    #[serde(default)]
    pub order_by_whitelist: Option<Vec<ColumnSpec>>,
    #[serde(default)]
    pub ask: Option<AskBlock>,
}

impl ViewDoc {
    /// Real column names, in declared order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    /// ORDER BY whitelist: the declared subset, or every column.
    pub fn order_by_names(&self) -> Vec<String> {
        match &self.order_by_whitelist {
            Some(wl) if !wl.is_empty() => wl.iter().map(|c| c.name().to_string()).collect(),
            _ => self.column_names(),
        }
    }
}

/// Column entry: either a bare name or a descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    Name(String),
    Def(ColumnDef),
}

impl ColumnSpec {
    pub fn name(&self) -> &str {
        match self {
            ColumnSpec::Name(n) => n,
            ColumnSpec::Def(d) => &d.name,
        }
    }

    pub fn ask(&self) -> Option<&AskBlock> {
        match self {
            ColumnSpec::Name(_) => None,
            ColumnSpec::Def(d) => d.ask.as_ref(),
        }
    }
}

/// Full column descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ask: Option<AskBlock>,
}

/// Canonicalized ask metadata (entity- or column-level).
///
/// Absent keys mean "no contribution". Word lists accept a bare string where
/// a list is expected; weight values accept numbers, numeric strings, or a
/// one-element list of either.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "AskBlockRaw")]
pub struct AskBlock {
    pub intents: Vec<String>,
    pub keywords: Vec<String>,
    pub latest_words: Vec<String>,
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub weights: BTreeMap<String, f64>,
    pub intent_tokens: BTreeMap<String, Vec<String>>,
}

/// Wire form of an ask block, before dotted keys are folded in.
#[derive(Debug, Default, Deserialize)]
struct AskBlockRaw {
    #[serde(default, deserialize_with = "one_or_many")]
    intents: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    keywords: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    latest_words: Vec<String>,
    #[serde(default)]
    synonyms: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    weights: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    intent_tokens: BTreeMap<String, serde_yaml::Value>,
    /// Dotted spellings land here; anything else is an authoring error.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl TryFrom<AskBlockRaw> for AskBlock {
    type Error = String;

    fn try_from(mut raw: AskBlockRaw) -> Result<Self, Self::Error> {
        // Fold dotted keys into their nested maps before conversion.
        for (key, value) in std::mem::take(&mut raw.extra) {
            if let Some(intent) = key.strip_prefix("synonyms.") {
                raw.synonyms.insert(intent.to_string(), value);
            } else if let Some(name) = key.strip_prefix("weights.") {
                raw.weights.insert(name.to_string(), value);
            } else if let Some(intent) = key.strip_prefix("intent_tokens.") {
                raw.intent_tokens.insert(intent.to_string(), value);
            } else {
                return Err(format!("unknown ask key '{key}'"));
            }
        }

        let synonyms = raw
            .synonyms
            .into_iter()
            .map(|(intent, v)| (intent, string_list(&v)))
            .filter(|(_, words)| !words.is_empty())
            .collect();

        let intent_tokens = raw
            .intent_tokens
            .into_iter()
            .map(|(intent, v)| (intent, string_list(&v)))
            .filter(|(_, words)| !words.is_empty())
            .collect();

        let weights = raw
            .weights
            .into_iter()
            .map(|(name, v)| {
                let w = parse_weight(&v, 1.0);
                (name, w)
            })
            .collect();

        Ok(AskBlock {
            intents: raw.intents,
            keywords: raw.keywords,
            latest_words: raw.latest_words,
            synonyms,
            weights,
            intent_tokens,
        })
    }
}

/// Accept `x` or `[x, y]`; non-string elements are dropped, not errors.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(string_list(&value))
}

fn string_list(value: &serde_yaml::Value) -> Vec<String> {
    match value {
        serde_yaml::Value::String(s) => vec![s.clone()],
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Lenient weight parse: number, numeric string, or first element of a list.
pub(crate) fn parse_weight(value: &serde_yaml::Value, default: f64) -> f64 {
    match value {
        serde_yaml::Value::Number(n) => n.as_f64().unwrap_or(default),
        serde_yaml::Value::String(s) => s.trim().parse().unwrap_or(default),
        serde_yaml::Value::Sequence(seq) => seq
            .first()
            .map(|v| parse_weight(v, default))
            .unwrap_or(default),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_doc(yaml: &str) -> ViewDoc {
        serde_yaml::from_str(yaml).expect("valid doc")
    }

    #[test]
    fn bare_and_descriptor_columns_mix() {
        let doc = parse_doc(
            r#"
entity: view_fiis_prices
columns:
  - ticker
  - name: trade_date
    alias: data
  - name: close_price
    description: closing quote
identifiers: [ticker]
"#,
        );
        assert_eq!(doc.column_names(), vec!["ticker", "trade_date", "close_price"]);
        assert_eq!(doc.identifiers, vec!["ticker"]);
    }

    #[test]
    fn dotted_and_nested_ask_forms_are_equivalent() {
        let nested = parse_doc(
            r#"
entity: v
ask:
  weights:
    synonyms: 3.0
  synonyms:
    dividends: [provento]
"#,
        );
        let dotted = parse_doc(
            r#"
entity: v
ask:
  weights.synonyms: 3.0
  synonyms.dividends: [provento]
"#,
        );
        let a = nested.ask.unwrap();
        let b = dotted.ask.unwrap();
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.synonyms, b.synonyms);
    }

    #[test]
    fn unknown_ask_key_is_rejected_loudly() {
        let err = serde_yaml::from_str::<ViewDoc>(
            r#"
entity: v
ask:
  keywords: [fundo]
  sinonimos: [errado]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sinonimos"), "got: {err}");
    }

    #[test]
    fn scalar_where_list_expected_is_accepted() {
        let doc = parse_doc(
            r#"
entity: v
ask:
  keywords: fundo
  latest_words: último
"#,
        );
        let ask = doc.ask.unwrap();
        assert_eq!(ask.keywords, vec!["fundo"]);
        assert_eq!(ask.latest_words, vec!["último"]);
    }

    #[test]
    fn weight_values_parse_leniently() {
        let doc = parse_doc(
            r#"
entity: v
ask:
  weights:
    keywords: "2.5"
    synonyms: [4.0]
    broken: {}
"#,
        );
        let w = doc.ask.unwrap().weights;
        assert_eq!(w.get("keywords"), Some(&2.5));
        assert_eq!(w.get("synonyms"), Some(&4.0));
        assert_eq!(w.get("broken"), Some(&1.0));
    }

    #[test]
    fn order_by_whitelist_defaults_to_all_columns() {
        let doc = parse_doc(
            r#"
entity: v
columns: [a, b, c]
"#,
        );
        assert_eq!(doc.order_by_names(), vec!["a", "b", "c"]);

        let doc = parse_doc(
            r#"
entity: v
columns: [a, b, c]
order_by_whitelist:
  - b
"#,
        );
        assert_eq!(doc.order_by_names(), vec!["b"]);
    }
}
