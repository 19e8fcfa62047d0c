//! XCCDF variable (Value) resolution.

use crate::document::{ContentDocument, XCCDF_NS};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Prefix carried by every variable id in the benchmark content.
pub const VALUE_PREFIX: &str = "xccdf_org.ssgproject.content_value_";

/// Resolved variable values keyed by unprefixed id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VariableTable(BTreeMap<String, String>);

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect defaults and `set-value` overrides from `docs`, in order.
    ///
    /// For each document, every `Value` contributes its non-hidden `value`
    /// children without a `selector` attribute (defaults, not enum choices),
    /// then every `set-value` is applied. Later entries win.
    pub fn collect(docs: &[&ContentDocument]) -> Self {
        let mut table = Self::new();
        for doc in docs {
            for variable in doc.xccdf_elements("Value") {
                let Some(id) = strip_value_prefix(variable.attr_or_empty("id")) else {
                    continue;
                };
                for value in variable.children().iter().filter(|c| c.is(XCCDF_NS, "value")) {
                    // hidden values back content functions, not variables
                    if value.attr("hidden") == Some("true") {
                        continue;
                    }
                    if value.attr_or_empty("selector").is_empty() {
                        table.insert(id, value.text());
                    }
                }
            }

            for set_value in doc.xccdf_elements("set-value") {
                if let Some(id) = strip_value_prefix(set_value.attr_or_empty("idref")) {
                    table.insert(id, set_value.text());
                }
            }
        }
        debug!("Collected {} variables", table.len());
        table
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn insert(&mut self, id: impl Into<String>, value: impl Into<String>) {
        self.0.insert(id.into(), value.into());
    }

    /// Overwrite values for ids already present with those from `overrides`.
    ///
    /// Ids only present in `overrides` are never added. Returns how many
    /// entries were overwritten.
    pub fn overwrite_from(&mut self, overrides: &VariableTable) -> usize {
        let mut overwritten = 0;
        for (id, value) in &overrides.0 {
            if let Some(existing) = self.0.get_mut(id) {
                existing.clone_from(value);
                overwritten += 1;
            }
        }
        overwritten
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

fn strip_value_prefix(id: &str) -> Option<&str> {
    id.strip_prefix(VALUE_PREFIX)
}
