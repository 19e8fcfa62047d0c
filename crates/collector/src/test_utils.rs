//! In-memory cluster for tests.

use crate::client::{ClusterClient, ListPage, NodeInfo};
use crate::streamer::MACHINE_CONFIGS_URI;
use apicollect_common::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone)]
enum Response {
    Body(Vec<u8>),
    Forbidden,
    Status(u16),
}

/// A fake cluster answering from fixed responses. Unknown URIs are 404s.
#[derive(Default)]
pub struct FakeCluster {
    nodes: Vec<NodeInfo>,
    responses: HashMap<String, Response>,
    machine_configs: Option<Vec<Value>>,
    requests: Mutex<Vec<String>>,
    page_requests: Mutex<Vec<(Option<String>, u32)>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            machine_configs: Some(Vec::new()),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, name: &str, roles: &[&str]) -> Self {
        let labels = roles
            .iter()
            .map(|role| (format!("node-role.kubernetes.io/{}", role), String::new()));
        self.nodes.push(NodeInfo::new(name, labels));
        self
    }

    pub fn with_response(mut self, uri: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses
            .insert(uri.to_string(), Response::Body(body.into()));
        self
    }

    pub fn with_json(self, uri: &str, body: Value) -> Self {
        self.with_response(uri, body.to_string())
    }

    pub fn with_forbidden(mut self, uri: &str) -> Self {
        self.responses.insert(uri.to_string(), Response::Forbidden);
        self
    }

    pub fn with_status(mut self, uri: &str, code: u16) -> Self {
        self.responses.insert(uri.to_string(), Response::Status(code));
        self
    }

    pub fn with_machine_configs(mut self, items: Vec<Value>) -> Self {
        self.machine_configs = Some(items);
        self
    }

    /// A cluster that doesn't serve the MachineConfig API.
    pub fn without_machine_configs(mut self) -> Self {
        self.machine_configs = None;
        self
    }

    /// URIs requested through `get_raw`, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// `(continue token, limit)` of every page requested.
    pub fn page_requests(&self) -> Vec<(Option<String>, u32)> {
        self.page_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ApiError> {
        Ok(self.nodes.clone())
    }

    async fn get_raw(&self, uri: &str) -> Result<Vec<u8>, ApiError> {
        self.requests.lock().unwrap().push(uri.to_string());
        match self.responses.get(uri) {
            Some(Response::Body(body)) => Ok(body.clone()),
            Some(Response::Forbidden) => Err(ApiError::Forbidden(format!(
                "cannot get resource at {}",
                uri
            ))),
            Some(Response::Status(code)) => Err(ApiError::Status {
                code: *code,
                message: "injected failure".to_string(),
            }),
            None => Err(ApiError::not_found(format!("{} not found", uri))),
        }
    }

    async fn list_page(
        &self,
        uri: &str,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<ListPage, ApiError> {
        self.page_requests
            .lock()
            .unwrap()
            .push((continue_token.map(str::to_string), limit));

        let items = match (&self.machine_configs, uri) {
            (Some(items), MACHINE_CONFIGS_URI) => items,
            _ => return Err(ApiError::NoKindMatch(uri.to_string())),
        };

        let start: usize = match continue_token {
            Some(token) => token
                .parse()
                .map_err(|_| ApiError::Decode(format!("bad continue token {}", token)))?,
            None => 0,
        };
        let end = (start + limit as usize).min(items.len());
        Ok(ListPage {
            items: items[start..end].to_vec(),
            continue_token: (end < items.len()).then(|| end.to_string()),
        })
    }
}
