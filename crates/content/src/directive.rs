//! Path directives embedded in rule annotations.
//!
//! A rule names the API objects it needs inside one of its `warning`
//! elements:
//!
//! ```xml
//! <warning category="general">
//!   <code class="ocp-api-endpoint" id="abc">/apis/config.openshift.io/v1/oauths/cluster</code>
//!   <code id="filter-abc">.spec</code>
//!   <code id="dump-abc">/oauth-spec</code>
//! </warning>
//! ```
//!
//! The `filter-` and `dump-` companions are optional but only apply as a pair.
//! Directive text may reference variables as `${name}`.

use crate::document::{Element, XCCDF_NS};
use crate::variables::VariableTable;
use apicollect_common::ResourcePath;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Class marking a `code` element as an API endpoint.
pub const API_ENDPOINT_CLASS: &str = "ocp-api-endpoint";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("unknown variable '{0}' referenced in path directive")]
    UnknownVariable(String),
}

/// Pattern for `${name}` variable references.
pub static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\s*([A-Za-z0-9_.\-]+)\s*\}").unwrap());

/// Replace `${name}` references with values from `variables`.
pub fn render(template: &str, variables: &VariableTable) -> Result<String, DirectiveError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in VARIABLE_PATTERN.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = variables
            .get(name.as_str())
            .ok_or_else(|| DirectiveError::UnknownVariable(name.as_str().to_string()))?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Resource paths declared by a single annotation.
pub fn paths_from_annotation(
    annotation: &Element,
    variables: &VariableTable,
) -> Result<Vec<ResourcePath>, DirectiveError> {
    let mut paths = Vec::new();
    for code in annotation.descendants().filter(|e| is_endpoint(e)) {
        let obj_path = render(code.text().trim(), variables)?;
        if obj_path.is_empty() {
            continue;
        }

        let mut path = ResourcePath::new(obj_path);
        if let Some(id) = code.attr("id").filter(|id| !id.is_empty()) {
            let filter = annotation.find_by_id(&format!("filter-{}", id));
            let dump = annotation.find_by_id(&format!("dump-{}", id));
            if let (Some(filter), Some(dump)) = (filter, dump) {
                path = path
                    .with_filter(render(filter.text().trim(), variables)?)
                    .with_dump_path(render(dump.text().trim(), variables)?);
            }
        }
        paths.push(path);
    }
    Ok(paths)
}

/// Resource paths for a rule, taken from the first annotation that declares any.
pub fn paths_from_rule(rule: &Element, variables: &VariableTable) -> Vec<ResourcePath> {
    for warning in rule.find_all(XCCDF_NS, "warning") {
        match paths_from_annotation(warning, variables) {
            Ok(paths) if !paths.is_empty() => return paths,
            Ok(_) => {}
            Err(e) => warn!(
                "Error parsing path directive of {}: {}",
                rule.attr_or_empty("id"),
                e
            ),
        }
    }
    debug!("Couldn't find a path directive in {}", rule.attr_or_empty("id"));
    Vec::new()
}

fn is_endpoint(element: &Element) -> bool {
    element.name() == "code"
        && element
            .attr_or_empty("class")
            .split_whitespace()
            .any(|c| c == API_ENDPOINT_CLASS)
}
