//! Resolving which resources a profile needs.

use crate::directive::paths_from_rule;
use crate::document::{ContentDocument, Element};
use crate::profile::Profile;
use crate::variables::VariableTable;
use apicollect_common::ResourcePath;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Outcome of resolving a profile against the content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Paths declared by the selected rules, in selection order.
    pub paths: Vec<ResourcePath>,
    /// Selected rule ids, tailoring selections first.
    pub selected: Vec<String>,
    /// Effective variable table used to render path directives.
    pub variables: VariableTable,
    /// Benchmark profile the tailoring extends, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
}

/// Resolves a profile, optionally tailored, to resource paths.
pub struct ProfileResolver<'a> {
    benchmark: &'a ContentDocument,
    tailoring: Option<&'a ContentDocument>,
}

impl<'a> ProfileResolver<'a> {
    pub fn new(benchmark: &'a ContentDocument) -> Self {
        Self {
            benchmark,
            tailoring: None,
        }
    }

    pub fn with_tailoring(mut self, tailoring: Option<&'a ContentDocument>) -> Self {
        self.tailoring = tailoring;
        self
    }

    /// The variable table: benchmark defaults and `set-value`s, overwritten
    /// (never extended) by the tailoring's values.
    pub fn variables(&self) -> VariableTable {
        let mut variables = VariableTable::collect(&[self.benchmark]);
        if let Some(tailoring) = self.tailoring {
            let overrides = VariableTable::collect(&[tailoring]);
            if overrides.is_empty() {
                debug!("Tailoring sets no variables");
            } else {
                let overwritten = variables.overwrite_from(&overrides);
                debug!("Tailoring overwrote {} variables", overwritten);
            }
        }
        variables
    }

    /// Resolve `profile` to the paths its selected rules need.
    ///
    /// With a tailoring document, `profile` names the tailored profile. Its
    /// selections are resolved first; if it extends a benchmark profile, that
    /// profile's selections follow. Only one level of `extends` is followed.
    pub fn resolve(&self, profile: &str) -> Resolution {
        let variables = self.variables();
        let rules = RuleIndex::new(self.benchmark);
        let mut resolution = Resolution {
            variables,
            ..Default::default()
        };

        let mut effective = profile.to_string();
        if let Some(tailoring) = self.tailoring {
            let tailored = Profile::find(tailoring, profile);
            let selected = tailored
                .as_ref()
                .map(|p| p.selected.clone())
                .unwrap_or_default();
            let before = resolution.paths.len();
            self.append_selected(&mut resolution, &rules, selected);
            if resolution.paths.len() == before {
                info!("no valid checks found in tailoring");
            }

            match tailored.and_then(|p| p.extends) {
                Some(extends) => {
                    debug!("Tailored profile {} extends {}", profile, extends);
                    resolution.extends = Some(extends.clone());
                    effective = extends;
                }
                None => return resolution,
            }
        }

        let Some(base) = Profile::find(self.benchmark, &effective) else {
            info!("no valid checks found in profile");
            return resolution;
        };
        if let Some(parent) = &base.extends {
            debug!(
                "Profile {} extends {}, which is not followed",
                base.id, parent
            );
        }
        let before = resolution.paths.len();
        self.append_selected(&mut resolution, &rules, base.selected);
        if resolution.paths.len() == before {
            info!("no valid checks found in profile");
        }
        resolution
    }

    fn append_selected(
        &self,
        resolution: &mut Resolution,
        rules: &RuleIndex<'_>,
        selected: Vec<String>,
    ) {
        if rules.is_empty() {
            debug!("No rules to query (invalid datastream)");
        }
        for check_id in selected {
            match rules.get(&check_id) {
                Some(rule) => {
                    let paths = paths_from_rule(rule, &resolution.variables);
                    resolution.paths.extend(paths);
                }
                None => debug!("Couldn't find a check for id {}", check_id),
            }
            resolution.selected.push(check_id);
        }
    }
}

/// Rules by id; the first definition of an id wins.
struct RuleIndex<'a> {
    rules: HashMap<&'a str, &'a Element>,
}

impl<'a> RuleIndex<'a> {
    fn new(doc: &'a ContentDocument) -> Self {
        let mut rules = HashMap::new();
        for rule in doc.xccdf_elements("Rule") {
            rules.entry(rule.attr_or_empty("id")).or_insert(rule);
        }
        Self { rules }
    }

    fn get(&self, id: &str) -> Option<&'a Element> {
        self.rules.get(id).copied()
    }

    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BENCHMARK: &str = r#"<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.2" xmlns:html="http://www.w3.org/1999/xhtml" id="xccdf_org.ssgproject.content_benchmark_OCP">
  <Value id="xccdf_org.ssgproject.content_value_A"><value>1</value></Value>
  <Value id="xccdf_org.ssgproject.content_value_ns"><value>openshift-apiserver</value></Value>
  <Profile id="base">
    <select idref="rule_ns" selected="true"/>
    <select idref="rule_oauth" selected="true"/>
    <select idref="rule_unknown" selected="true"/>
    <select idref="rule_plain" selected="true"/>
  </Profile>
  <Profile id="child" extends="base">
    <select idref="rule_plain" selected="true"/>
  </Profile>
  <Group id="g">
    <Rule id="rule_oauth">
      <warning><html:code class="ocp-api-endpoint">/apis/config.openshift.io/v1/oauths/cluster</html:code></warning>
    </Rule>
    <Rule id="rule_ns">
      <warning><html:code class="ocp-api-endpoint">/api/v1/namespaces/${ns}</html:code></warning>
    </Rule>
    <Rule id="rule_plain"><title>Needs nothing from the API</title></Rule>
  </Group>
</Benchmark>"#;

    fn benchmark() -> ContentDocument {
        ContentDocument::parse(BENCHMARK, "ds.xml").unwrap()
    }

    fn tailoring(body: &str) -> ContentDocument {
        ContentDocument::parse(
            &format!(
                r#"<Tailoring xmlns="http://checklists.nist.gov/xccdf/1.2" id="t">{body}</Tailoring>"#
            ),
            "tailoring.xml",
        )
        .unwrap()
    }

    #[test]
    fn test_profile_paths_in_selection_order() {
        let ds = benchmark();
        let resolution = ProfileResolver::new(&ds).resolve("base");
        assert_eq!(
            resolution.paths,
            vec![
                ResourcePath::new("/api/v1/namespaces/openshift-apiserver"),
                ResourcePath::new("/apis/config.openshift.io/v1/oauths/cluster"),
            ]
        );
        assert_eq!(
            resolution.selected,
            vec!["rule_ns", "rule_oauth", "rule_unknown", "rule_plain"]
        );
        assert_eq!(resolution.extends, None);
    }

    #[test]
    fn test_benchmark_extends_is_not_followed() {
        let ds = benchmark();
        let resolution = ProfileResolver::new(&ds).resolve("child");
        assert!(resolution.paths.is_empty());
        assert_eq!(resolution.selected, vec!["rule_plain"]);
    }

    #[test]
    fn test_missing_profile_yields_nothing() {
        let ds = benchmark();
        let resolution = ProfileResolver::new(&ds).resolve("absent");
        assert!(resolution.paths.is_empty());
        assert!(resolution.selected.is_empty());
        assert_eq!(resolution.variables.get("A"), Some("1"));
    }

    #[test]
    fn test_tailoring_overrides_but_never_inserts() {
        let ds = benchmark();
        let t = tailoring(
            r#"<Profile id="tailored" extends="base">
                 <set-value idref="xccdf_org.ssgproject.content_value_A">2</set-value>
                 <set-value idref="xccdf_org.ssgproject.content_value_B">3</set-value>
               </Profile>"#,
        );
        let resolution = ProfileResolver::new(&ds)
            .with_tailoring(Some(&t))
            .resolve("tailored");

        assert_eq!(resolution.variables.get("A"), Some("2"));
        assert_eq!(resolution.variables.get("B"), None);
        assert_eq!(resolution.variables.len(), 2);
    }

    #[test]
    fn test_extension_fallback_uses_base_selection() {
        let ds = benchmark();
        let t = tailoring(
            r#"<Profile id="tailored" extends="base">
                 <set-value idref="xccdf_org.ssgproject.content_value_ns">openshift-etcd</set-value>
               </Profile>"#,
        );
        let resolution = ProfileResolver::new(&ds)
            .with_tailoring(Some(&t))
            .resolve("tailored");

        let base = ProfileResolver::new(&ds).resolve("base");
        assert_eq!(resolution.selected, base.selected);
        assert_eq!(resolution.extends.as_deref(), Some("base"));
        assert_eq!(
            resolution.paths[0],
            ResourcePath::new("/api/v1/namespaces/openshift-etcd")
        );
        assert_eq!(resolution.variables.get("ns"), Some("openshift-etcd"));
    }

    #[test]
    fn test_tailoring_without_extends_stops() {
        let ds = benchmark();
        let t = tailoring(
            r#"<Profile id="tailored"><select idref="rule_oauth" selected="true"/></Profile>"#,
        );
        let resolution = ProfileResolver::new(&ds)
            .with_tailoring(Some(&t))
            .resolve("tailored");

        assert_eq!(resolution.selected, vec!["rule_oauth"]);
        assert_eq!(
            resolution.paths,
            vec![ResourcePath::new(
                "/apis/config.openshift.io/v1/oauths/cluster"
            )]
        );
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let ds = benchmark();
        let resolver = ProfileResolver::new(&ds);
        assert_eq!(resolver.resolve("base"), resolver.resolve("base"));
    }
}
