//! Cluster API clients.

use crate::config::ClusterConfig;
use anyhow::{Context, Result};
use apicollect_common::ApiError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Service account files mounted into every pod.
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// A node's name and labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl NodeInfo {
    pub fn new<I, K, V>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One page of a paginated list.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<serde_json::Value>,
    /// Token for the next page; `None` once the list is exhausted.
    pub continue_token: Option<String>,
}

/// The cluster API surface the collector needs.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List all nodes.
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ApiError>;

    /// GET a raw API URI and return the response body.
    async fn get_raw(&self, uri: &str) -> Result<Vec<u8>, ApiError>;

    /// List one page of the collection at `uri`.
    async fn list_page(
        &self,
        uri: &str,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<ListPage, ApiError>;
}

/// Client for the Kubernetes API server over HTTPS.
pub struct ApiServerClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiServerClient {
    /// Create a client for `base_url`, e.g. `https://10.0.0.1:443`.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        ca_pem: Option<&[u8]>,
        insecure_skip_tls_verify: bool,
    ) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(insecure_skip_tls_verify);
        if let Some(pem) = ca_pem {
            let cert = reqwest::Certificate::from_pem(pem).context("Invalid CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    /// Create a client from configuration, falling back to the in-cluster
    /// service account and `KUBERNETES_SERVICE_HOST`/`_PORT`.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let base_url = match &config.api_server {
            Some(url) => url.clone(),
            None => in_cluster_url()?,
        };

        let token = match &config.token_file {
            Some(path) => Some(read_token(path)?),
            None if Path::new(SERVICE_ACCOUNT_TOKEN).exists() => {
                Some(read_token(Path::new(SERVICE_ACCOUNT_TOKEN))?)
            }
            None => None,
        };

        let ca_pem = match &config.ca_file {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("Failed to read CA file {}", path.display()))?,
            ),
            None if Path::new(SERVICE_ACCOUNT_CA).exists() => Some(
                std::fs::read(SERVICE_ACCOUNT_CA).context("Failed to read service account CA")?,
            ),
            None => None,
        };

        Self::new(
            base_url,
            token,
            ca_pem.as_deref(),
            config.insecure_skip_tls_verify,
        )
    }

    async fn get(&self, uri: &str, query: &[(&str, String)]) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}{}", self.base_url, uri);
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(status_error(status.as_u16(), &body))
        }
    }
}

#[async_trait]
impl ClusterClient for ApiServerClient {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ApiError> {
        let body = self.get("/api/v1/nodes", &[]).await?;
        parse_node_list(&body)
    }

    async fn get_raw(&self, uri: &str) -> Result<Vec<u8>, ApiError> {
        self.get(uri, &[]).await
    }

    async fn list_page(
        &self,
        uri: &str,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<ListPage, ApiError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(token) = continue_token {
            query.push(("continue", token.to_string()));
        }

        // a collection only 404s when the cluster doesn't serve its kind
        let body = match self.get(uri, &query).await {
            Err(ApiError::NotFound { message, .. }) => return Err(ApiError::NoKindMatch(message)),
            other => other?,
        };
        parse_list_page(&body)
    }
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Map an unsuccessful response to an [`ApiError`] using the `Status` body.
fn status_error(code: u16, body: &[u8]) -> ApiError {
    let status: Option<StatusBody> = serde_json::from_slice(body).ok();
    let message = match &status {
        Some(s) if !s.message.is_empty() => s.message.clone(),
        _ => String::from_utf8_lossy(body).trim().to_string(),
    };

    match code {
        404 => ApiError::NotFound {
            reason: status
                .map(|s| s.reason)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "NotFound".to_string()),
            message,
        },
        403 => ApiError::Forbidden(message),
        _ => ApiError::Status { code, message },
    }
}

#[derive(Deserialize)]
struct ObjectList {
    #[serde(default)]
    metadata: ListMeta,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct ListMeta {
    #[serde(default, rename = "continue")]
    continue_token: Option<String>,
}

#[derive(Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<NodeItem>,
}

#[derive(Deserialize)]
struct NodeItem {
    metadata: NodeMeta,
}

#[derive(Deserialize)]
struct NodeMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

fn parse_node_list(body: &[u8]) -> Result<Vec<NodeInfo>, ApiError> {
    let list: NodeList =
        serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(list
        .items
        .into_iter()
        .map(|item| NodeInfo {
            name: item.metadata.name,
            labels: item.metadata.labels,
        })
        .collect())
}

fn parse_list_page(body: &[u8]) -> Result<ListPage, ApiError> {
    let list: ObjectList =
        serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(ListPage {
        items: list.items,
        continue_token: list.metadata.continue_token.filter(|t| !t.is_empty()),
    })
}

fn in_cluster_url() -> Result<String> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST")
        .context("No API server configured and KUBERNETES_SERVICE_HOST is not set")?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    if host.contains(':') {
        Ok(format!("https://[{}]:{}", host, port))
    } else {
        Ok(format!("https://{}:{}", host, port))
    }
}

fn read_token(path: &Path) -> Result<String> {
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file {}", path.display()))?;
    Ok(token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer::MACHINE_CONFIGS_URI;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn status_json(code: u16, reason: &str, message: &str) -> String {
        serde_json::json!({
            "kind": "Status",
            "status": "Failure",
            "reason": reason,
            "message": message,
            "code": code,
        })
        .to_string()
    }

    fn canned(target: &str) -> (&'static str, String) {
        let path = target.split('?').next().unwrap_or(target);
        match path {
            "/version" => ("200 OK", r#"{"major":"1","minor":"27"}"#.to_string()),
            "/api/v1/nodes" => (
                "200 OK",
                r#"{"items":[{"metadata":{"name":"w0","labels":{"node-role.kubernetes.io/worker":""}}}]}"#
                    .to_string(),
            ),
            "/api/v1/namespaces/openshift-etcd/configmaps/gone" => (
                "404 Not Found",
                status_json(404, "NotFound", "configmaps \"gone\" not found"),
            ),
            "/apis/config.openshift.io/v1/oauths/cluster" => (
                "403 Forbidden",
                status_json(403, "Forbidden", "oauths is forbidden"),
            ),
            _ => ("404 Not Found", "404 page not found".to_string()),
        }
    }

    /// Serve canned API responses on a loopback port and record each
    /// request head.
    async fn serve_canned() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let heads = Arc::new(Mutex::new(Vec::new()));
        let recorded = heads.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let target = head.split_whitespace().nth(1).unwrap_or("").to_string();
                recorded.lock().unwrap().push(head);

                let (status, body) = canned(&target);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{}", addr), heads)
    }

    #[tokio::test]
    async fn test_api_server_client_over_http() {
        let (base_url, heads) = serve_canned().await;
        let client = ApiServerClient::new(base_url, Some("secret".to_string()), None, false).unwrap();

        assert_eq!(client.get_raw("/version").await.unwrap(), br#"{"major":"1","minor":"27"}"#);

        let nodes = client.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "w0");

        match client
            .get_raw("/api/v1/namespaces/openshift-etcd/configmaps/gone")
            .await
        {
            Err(ApiError::NotFound { reason, message }) => {
                assert_eq!(reason, "NotFound");
                assert_eq!(message, "configmaps \"gone\" not found");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let forbidden = client
            .get_raw("/apis/config.openshift.io/v1/oauths/cluster")
            .await
            .unwrap_err();
        assert!(forbidden.is_forbidden());

        let unserved = client
            .list_page(MACHINE_CONFIGS_URI, 5, Some("abc"))
            .await
            .unwrap_err();
        assert!(
            matches!(unserved, ApiError::NoKindMatch(_)),
            "unexpected error: {unserved}"
        );

        let heads = heads.lock().unwrap().clone();
        assert_eq!(heads.len(), 5);
        for head in &heads {
            let lower = head.to_ascii_lowercase();
            assert!(lower.contains("authorization: bearer secret"), "{head}");
            assert!(lower.contains("accept: application/json"), "{head}");
        }
        let request_line = heads[4].lines().next().unwrap();
        assert_eq!(
            request_line,
            format!("GET {}?limit=5&continue=abc HTTP/1.1", MACHINE_CONFIGS_URI)
        );
    }

    #[tokio::test]
    async fn test_api_server_client_without_token() {
        let (base_url, heads) = serve_canned().await;
        let client = ApiServerClient::new(format!("{}/", base_url), None, None, false).unwrap();

        let first = client.list_page("/api/v1/nodes", 2, None).await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.continue_token, None);

        let heads = heads.lock().unwrap().clone();
        assert!(heads[0].starts_with("GET /api/v1/nodes?limit=2 HTTP/1.1"));
        assert!(!heads[0].to_ascii_lowercase().contains("authorization:"));
    }

    #[test]
    fn test_status_error_not_found_uses_reason() {
        let body = br#"{"kind":"Status","status":"Failure","message":"nodes \"x\" not found","reason":"NotFound","code":404}"#;
        match status_error(404, body) {
            ApiError::NotFound { reason, message } => {
                assert_eq!(reason, "NotFound");
                assert_eq!(message, "nodes \"x\" not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_status_error_classification() {
        assert!(status_error(403, b"denied").is_forbidden());
        assert!(status_error(404, b"404 page not found").is_not_found());
        assert!(!status_error(500, b"{}").is_tolerated());
    }

    #[test]
    fn test_parse_node_list() {
        let body = br#"{"kind":"NodeList","items":[
            {"metadata":{"name":"m0","labels":{"node-role.kubernetes.io/master":""}}},
            {"metadata":{"name":"w0"}}
        ]}"#;
        let nodes = parse_node_list(body).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "m0");
        assert!(nodes[0].labels.contains_key("node-role.kubernetes.io/master"));
        assert!(nodes[1].labels.is_empty());
    }

    #[test]
    fn test_parse_list_page_continue() {
        let page = parse_list_page(br#"{"metadata":{"continue":"abc"},"items":[{},{}]}"#).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.continue_token.as_deref(), Some("abc"));

        let last = parse_list_page(br#"{"metadata":{"continue":""},"items":[]}"#).unwrap();
        assert_eq!(last.continue_token, None);
    }
}
