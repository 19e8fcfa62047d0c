//! Working out every resource a collection run fetches.

use crate::client::ClusterClient;
use crate::nodes::NodeRoleIndex;
use apicollect_common::{ResourcePath, Result};
use apicollect_content::{ContentDocument, ProfileResolver, Resolution, VariableTable};
use serde::Serialize;
use tracing::info;

/// Fetched on every run regardless of the profile.
pub const FIXED_PATHS: [&str; 2] = [
    "/version",
    "/apis/config.openshift.io/v1/clusteroperators/openshift-apiserver",
];

/// Everything a run will fetch, and what it was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Discovery {
    pub paths: Vec<ResourcePath>,
    pub variables: VariableTable,
    pub selected: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    pub roles: NodeRoleIndex,
}

impl Discovery {
    /// Fixed paths, then `extra_paths`, then one kubelet config per
    /// (role, node) pair, then the profile's paths in selection order.
    pub fn assemble(roles: NodeRoleIndex, resolution: Resolution, extra_paths: &[String]) -> Self {
        let mut paths: Vec<ResourcePath> = FIXED_PATHS
            .iter()
            .copied()
            .chain(extra_paths.iter().map(String::as_str))
            .map(ResourcePath::new)
            .collect();
        paths.extend(roles.kubelet_config_paths());
        paths.extend(resolution.paths);

        Self {
            paths,
            variables: resolution.variables,
            selected: resolution.selected,
            extends: resolution.extends,
            roles,
        }
    }
}

/// Discover the resources `profile` needs on the cluster behind `client`.
pub async fn figure_resources(
    client: &dyn ClusterClient,
    benchmark: &ContentDocument,
    tailoring: Option<&ContentDocument>,
    profile: &str,
    extra_paths: &[String],
) -> Result<Discovery> {
    let roles = NodeRoleIndex::fetch(client).await?;
    let resolution = ProfileResolver::new(benchmark)
        .with_tailoring(tailoring)
        .resolve(profile);

    let discovery = Discovery::assemble(roles, resolution, extra_paths);
    info!(
        "Discovered {} resources for profile {} ({} rules selected)",
        discovery.paths.len(),
        profile,
        discovery.selected.len()
    );
    Ok(discovery)
}
