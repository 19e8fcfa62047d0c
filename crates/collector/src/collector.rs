//! The collection pipeline: load, discover, fetch, reconcile, persist.

use crate::client::{ApiServerClient, ClusterClient};
use crate::config::CollectorConfig;
use crate::discovery::{figure_resources, Discovery};
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::persist::{save_resources, save_warnings};
use crate::reconcile::reconcile_kubelet_configs;
use apicollect_common::{Error, Result};
use apicollect_content::{ContentDocument, ContentLoader};
use tracing::{debug, info};

/// Benchmark and optional tailoring, parsed.
pub struct LoadedContent {
    pub benchmark: ContentDocument,
    pub tailoring: Option<ContentDocument>,
}

/// Result of a collection run before it is written out.
#[derive(Debug, Clone)]
pub struct Collection {
    pub discovery: Discovery,
    pub outcome: FetchOutcome,
}

/// The main collector.
pub struct Collector {
    config: CollectorConfig,
    client: Box<dyn ClusterClient>,
}

impl Collector {
    pub fn new(config: CollectorConfig, client: Box<dyn ClusterClient>) -> Self {
        Self { config, client }
    }

    /// Create a collector talking to the API server named in `config`.
    pub fn connect(config: CollectorConfig) -> Result<Self> {
        let client = ApiServerClient::from_config(&config.cluster)?;
        Ok(Self::new(config, Box::new(client)))
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Wait for and parse the content files.
    pub async fn load_content(&self) -> Result<LoadedContent> {
        let content = self
            .config
            .content
            .as_deref()
            .ok_or_else(|| Error::Config("no content file given".to_string()))?;
        let loader = ContentLoader::new().with_timeout(self.config.content_timeout());

        let benchmark = loader.load_source(content).await?;
        let tailoring = match self.config.tailoring.as_deref() {
            Some(path) => Some(loader.load_tailoring(path).await?),
            None => None,
        };
        Ok(LoadedContent {
            benchmark,
            tailoring,
        })
    }

    pub async fn discover(&self, content: &LoadedContent) -> Result<Discovery> {
        figure_resources(
            self.client.as_ref(),
            &content.benchmark,
            content.tailoring.as_ref(),
            &self.config.profile,
            &self.config.extra_paths,
        )
        .await
    }

    /// Load content, discover, fetch and reconcile; nothing is written.
    pub async fn collect(&self) -> Result<Collection> {
        let content = self.load_content().await?;
        let discovery = self.discover(&content).await?;

        let mut outcome = Fetcher::new(self.client.as_ref())
            .fetch(&discovery.paths)
            .await?;
        reconcile_kubelet_configs(&mut outcome)?;
        info!(
            "Fetched {} resources with {} warnings",
            outcome.results.len(),
            outcome.warnings.len()
        );

        Ok(Collection { discovery, outcome })
    }

    /// Write results under the result directory and warnings, if any, to
    /// the warnings file.
    pub fn persist(&self, collection: &Collection) -> Result<()> {
        save_resources(&self.config.result_dir, &collection.outcome.results)?;
        if save_warnings(&collection.outcome.warnings, &self.config.warnings_file)? {
            debug!(
                "Wrote warnings to {}",
                self.config.warnings_file.display()
            );
        }
        Ok(())
    }

    /// Collect and persist.
    pub async fn run(&self) -> Result<Collection> {
        let collection = self.collect().await?;
        self.persist(&collection)?;
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeCluster;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;

    const BENCHMARK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Benchmark xmlns="http://checklists.nist.gov/xccdf/1.2" xmlns:html="http://www.w3.org/1999/xhtml" id="b">
  <Profile id="cis">
    <select idref="rule_oauth" selected="true"/>
  </Profile>
  <Rule id="rule_oauth">
    <warning><html:code class="ocp-api-endpoint">/apis/config.openshift.io/v1/oauths/cluster</html:code></warning>
  </Rule>
</Benchmark>"#;

    fn config(dir: &Path) -> CollectorConfig {
        let content = dir.join("ds.xml");
        std::fs::write(&content, BENCHMARK).unwrap();
        CollectorConfig {
            content: Some(content),
            profile: "cis".to_string(),
            result_dir: dir.join("results"),
            warnings_file: dir.join("warnings.out"),
            content_timeout_seconds: 1,
            ..Default::default()
        }
    }

    fn cluster() -> FakeCluster {
        let configz = |max_pods: u64| json!({"kubeletconfig": {"maxPods": max_pods}});
        FakeCluster::new()
            .with_node("w0", &["worker"])
            .with_node("w1", &["worker"])
            .with_node("w2", &["worker"])
            .with_json("/version", json!({"gitVersion": "v1.27.4"}))
            .with_json(
                "/apis/config.openshift.io/v1/clusteroperators/openshift-apiserver",
                json!({"kind": "ClusterOperator"}),
            )
            .with_json("/api/v1/nodes/w0/proxy/configz", configz(250))
            .with_json("/api/v1/nodes/w1/proxy/configz", configz(250))
            .with_json("/api/v1/nodes/w2/proxy/configz", configz(500))
    }

    #[tokio::test]
    async fn test_run_writes_results_and_warnings() {
        let dir = tempdir().unwrap();
        let collector = Collector::new(config(dir.path()), Box::new(cluster()));

        let collection = collector.run().await.unwrap();

        let results = dir.path().join("results");
        assert!(results.join("version").exists());
        assert!(results.join("kubeletconfig/worker/w2").exists());
        assert_eq!(
            std::fs::read_to_string(results.join("apis/config.openshift.io/v1/oauths/cluster"))
                .unwrap(),
            "# kube-api-error=NotFound"
        );

        let role: serde_json::Value =
            serde_json::from_slice(&std::fs::read(results.join("kubeletconfig/role/worker")).unwrap())
                .unwrap();
        assert_eq!(
            role,
            json!({"kind": "KubeletConfiguration", "apiVersion": "kubelet.config.k8s.io/v1beta1"})
        );

        // one missing object, one divergent node
        assert_eq!(collection.outcome.warnings.len(), 2);
        let warnings = std::fs::read_to_string(dir.path().join("warnings.out")).unwrap();
        assert_eq!(warnings.lines().count(), 2);
        assert!(warnings.contains("Kubelet configs for w2 are not consistent with role worker"));
    }

    #[tokio::test]
    async fn test_no_warnings_file_without_warnings() {
        let dir = tempdir().unwrap();
        let cluster = FakeCluster::new()
            .with_json("/version", json!({}))
            .with_json(
                "/apis/config.openshift.io/v1/clusteroperators/openshift-apiserver",
                json!({}),
            )
            .with_json("/apis/config.openshift.io/v1/oauths/cluster", json!({}));
        let collector = Collector::new(config(dir.path()), Box::new(cluster));

        let collection = collector.run().await.unwrap();

        assert!(collection.outcome.warnings.is_empty());
        assert_eq!(collection.outcome.results.len(), 3);
        assert!(!dir.path().join("warnings.out").exists());
    }

    #[tokio::test]
    async fn test_missing_content_times_out() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.content = Some(dir.path().join("never.xml"));
        let collector = Collector::new(config, Box::new(FakeCluster::new()));

        let err = collector.collect().await.unwrap_err();
        assert!(err.is_timeout());
    }
}
