//! XCCDF profile lookup.

use crate::document::{ContentDocument, XCCDF_NS};
use tracing::debug;

/// A profile's selections and the profile it extends, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    /// Selected rule ids in document order.
    pub selected: Vec<String>,
    pub extends: Option<String>,
}

impl Profile {
    /// Find profile `id` in `doc`.
    ///
    /// If the id occurs more than once, selections of every occurrence are
    /// concatenated in document order and the first non-empty `extends` wins.
    pub fn find(doc: &ContentDocument, id: &str) -> Option<Profile> {
        let mut found: Option<Profile> = None;
        for node in doc.xccdf_elements("Profile") {
            if node.attr_or_empty("id") != id {
                continue;
            }
            let profile = found.get_or_insert_with(|| Profile {
                id: id.to_string(),
                selected: Vec::new(),
                extends: None,
            });

            for check in node.find_all(XCCDF_NS, "select") {
                if check.attr("selected") != Some("true") {
                    continue;
                }
                let idref = check.attr_or_empty("idref");
                if !idref.is_empty() {
                    debug!("selected: {}", idref);
                    profile.selected.push(idref.to_string());
                }
            }

            if profile.extends.is_none() {
                profile.extends = node
                    .attr("extends")
                    .filter(|e| !e.is_empty())
                    .map(str::to_string);
            }
        }

        if found.is_none() {
            debug!("Profile {} not found in {}", id, doc.origin().display());
        }
        found
    }
}
