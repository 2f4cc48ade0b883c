//! SPARQL JSON results format.

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level response body (`application/sparql-results+json`).
#[derive(Debug, Clone, Deserialize)]
pub struct SparqlResponse {
    #[serde(default)]
    pub head: SparqlHead,
    pub results: SparqlResults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlHead {
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// One solution row, keyed by variable name. Unbound variables are absent.
pub type Binding = HashMap<String, BindingValue>;

/// A bound RDF term.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BindingValue {
    /// `uri`, `literal`, `typed-literal` or `bnode`.
    #[serde(rename = "type")]
    pub term_type: String,
    pub value: String,
    #[serde(rename = "xml:lang", default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
}

impl SparqlResults {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Value of `var` in the first row that binds it.
    pub fn first(&self, var: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find_map(|row| row.get(var))
            .map(|v| v.value.as_str())
    }

    /// Every bound value of `var`, in row order, duplicates removed.
    pub fn distinct(&self, var: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for value in self.bindings.iter().filter_map(|row| row.get(var)) {
            if !out.contains(&value.value) {
                out.push(value.value.clone());
            }
        }
        out
    }
}

/// Value of `var` in a single row.
pub fn value<'a>(row: &'a Binding, var: &str) -> Option<&'a str> {
    row.get(var).map(|v| v.value.as_str())
}
