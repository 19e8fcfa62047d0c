//! Node roles and per-node kubelet configuration paths.

use crate::client::{ClusterClient, NodeInfo};
use apicollect_common::{Error, ResourcePath, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Label prefix marking a node's role, e.g. `node-role.kubernetes.io/worker`.
pub const NODE_ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Key prefix of node-level kubelet configs: `/kubeletconfig/<role>/<node>`.
pub const KUBELET_CONFIG_PATH_PREFIX: &str = "/kubeletconfig/";

/// Key prefix of role-level kubelet configs: `/kubeletconfig/role/<role>`.
pub const KUBELET_CONFIG_ROLE_PATH_PREFIX: &str = "/kubeletconfig/role/";

/// Segment after [`KUBELET_CONFIG_PATH_PREFIX`] reserved for role-level keys.
///
/// A node role with this name produces node-level keys that look role-level;
/// those entries are left out of reconciliation.
pub const ROLE_KEY_SEGMENT: &str = "role";

/// Turns the `configz` payload into a standalone KubeletConfiguration.
pub const KUBELET_CONFIG_FILTER: &str =
    r#".kubeletconfig|.kind="KubeletConfiguration"|.apiVersion="kubelet.config.k8s.io/v1beta1""#;

/// Roles found in a node's labels.
pub fn node_roles(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .keys()
        .filter_map(|key| key.strip_prefix(NODE_ROLE_LABEL_PREFIX))
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

/// Node names grouped by role, both in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeRoleIndex(BTreeMap<String, BTreeSet<String>>);

impl NodeRoleIndex {
    pub fn from_nodes(nodes: &[NodeInfo]) -> Self {
        let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in nodes {
            for role in node_roles(&node.labels) {
                if role == ROLE_KEY_SEGMENT {
                    warn!(
                        "Node {} has role '{}'; its kubelet config shares keys with role-level configs",
                        node.name, role
                    );
                }
                index.entry(role).or_default().insert(node.name.clone());
            }
        }
        Self(index)
    }

    /// Build the index from the cluster's live nodes.
    pub async fn fetch(client: &dyn ClusterClient) -> Result<Self> {
        let nodes = client.list_nodes().await.map_err(|source| Error::Fetch {
            uri: "/api/v1/nodes".to_string(),
            source,
        })?;
        let index = Self::from_nodes(&nodes);
        if index.is_empty() {
            info!("No node carries a role label, no kubelet configs will be fetched");
        }
        debug!(
            "Found {} nodes in {} roles",
            nodes.len(),
            index.0.len()
        );
        Ok(index)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn nodes(&self, role: &str) -> impl Iterator<Item = &str> {
        self.0.get(role).into_iter().flatten().map(String::as_str)
    }

    /// Number of (role, node) pairs.
    pub fn pair_count(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One `configz` path per (role, node) pair.
    pub fn kubelet_config_paths(&self) -> Vec<ResourcePath> {
        self.0
            .iter()
            .flat_map(|(role, nodes)| {
                nodes.iter().map(move |node| {
                    ResourcePath::new(format!("/api/v1/nodes/{}/proxy/configz", node))
                        .with_dump_path(kubelet_config_dump_path(role, node))
                        .with_filter(KUBELET_CONFIG_FILTER)
                })
            })
            .collect()
    }
}

pub fn kubelet_config_dump_path(role: &str, node: &str) -> String {
    format!("{}{}/{}", KUBELET_CONFIG_PATH_PREFIX, role, node)
}

pub fn kubelet_config_role_path(role: &str) -> String {
    format!("{}{}", KUBELET_CONFIG_ROLE_PATH_PREFIX, role)
}

/// Role and node of a node-level kubelet config key.
///
/// Role-level keys and anything else return `None`.
pub fn role_node_from_dump_path(dump_path: &str) -> Option<(&str, &str)> {
    if dump_path.starts_with(KUBELET_CONFIG_ROLE_PATH_PREFIX) {
        return None;
    }
    let rest = dump_path.strip_prefix(KUBELET_CONFIG_PATH_PREFIX)?;
    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(role), Some(node), None) => Some((role, node)),
        _ => None,
    }
}
