//! Folding per-node kubelet configs into one config per role.

use crate::fetcher::{is_error_marker, FetchOutcome};
use crate::nodes::{kubelet_config_role_path, role_node_from_dump_path};
use apicollect_common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One difference between two JSON documents, JSON Patch style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

/// Differences turning `from` into `to`. Object key order is ignored;
/// arrays are compared as a whole.
pub fn structural_diff(from: &Value, to: &Value) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    diff_into(from, to, String::new(), &mut ops);
    ops
}

fn diff_into(from: &Value, to: &Value, path: String, ops: &mut Vec<DiffOp>) {
    match (from, to) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let child = format!("{}/{}", path, escape_pointer(key));
                match b.get(key) {
                    Some(new) => diff_into(old, new, child, ops),
                    None => ops.push(DiffOp::Remove { path: child }),
                }
            }
            for (key, new) in b.iter().filter(|(key, _)| !a.contains_key(*key)) {
                ops.push(DiffOp::Add {
                    path: format!("{}/{}", path, escape_pointer(key)),
                    value: new.clone(),
                });
            }
        }
        _ if from == to => {}
        _ => ops.push(DiffOp::Replace {
            path,
            value: to.clone(),
        }),
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Members present and equal in both documents. Objects are intersected
/// recursively; anything else is kept only when identical.
pub fn intersection(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            let common: Map<String, Value> = a
                .iter()
                .filter_map(|(key, left)| {
                    let right = b.get(key)?;
                    intersection(left, right).map(|value| (key.clone(), value))
                })
                .collect();
            Some(Value::Object(common))
        }
        _ if a == b => Some(a.clone()),
        _ => None,
    }
}

struct Baseline {
    value: Value,
    /// Bytes of the first entry while every node agrees with it.
    original: Option<Vec<u8>>,
}

/// Store one kubelet config per role under `/kubeletconfig/role/<role>`.
///
/// Node entries of a role are folded in node order. A node that differs
/// from the running baseline produces a warning and shrinks the baseline to
/// the intersection of both. Not-found markers are skipped, and a role with
/// nothing left is dropped. Node-level entries stay in the result.
pub fn reconcile_kubelet_configs(outcome: &mut FetchOutcome) -> Result<()> {
    let mut by_role: BTreeMap<String, Vec<(String, &[u8])>> = BTreeMap::new();
    for (dump_path, body) in &outcome.results {
        if let Some((role, node)) = role_node_from_dump_path(dump_path) {
            if role.is_empty() {
                continue;
            }
            by_role
                .entry(role.to_string())
                .or_default()
                .push((node.to_string(), body.as_slice()));
        }
    }

    let mut role_configs = Vec::new();
    let mut warnings = Vec::new();
    for (role, mut entries) in by_role {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut baseline: Option<Baseline> = None;
        for (node, body) in entries {
            if is_error_marker(body) {
                debug!("Skipping kubelet config of {} which couldn't be fetched", node);
                continue;
            }
            let value = parse_config(&node, body)?;

            let Some(current) = baseline.as_mut() else {
                baseline = Some(Baseline {
                    value,
                    original: Some(body.to_vec()),
                });
                continue;
            };

            let diff = structural_diff(&current.value, &value);
            if diff.is_empty() {
                continue;
            }
            let why = format!(
                "Kubelet configs for {} are not consistent with role {}, diff: {}; only the intersection of {} KubeletConfigs will be saved.",
                node,
                role,
                serde_json::to_string(&diff)?,
                role
            );
            warn!("{}", why);
            warnings.push(why);

            current.value = intersection(&current.value, &value).unwrap_or_default();
            current.original = None;
        }

        if let Some(baseline) = baseline {
            let body = match baseline.original {
                Some(original) => original,
                None => serde_json::to_vec(&baseline.value)?,
            };
            role_configs.push((kubelet_config_role_path(&role), body));
        }
    }

    outcome.results.extend(role_configs);
    outcome.warnings.extend(warnings);
    Ok(())
}

fn parse_config(node: &str, body: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(body).map_err(|e| Error::Reconcile {
        node: node.to_string(),
        reason: e.to_string(),
    })?;
    if !value.is_object() {
        return Err(Error::Reconcile {
            node: node.to_string(),
            reason: "kubelet config is not a JSON object".to_string(),
        });
    }
    Ok(value)
}
