//! Per-URI strategies for reading a resource from the cluster.

use crate::client::ClusterClient;
use apicollect_common::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// The MachineConfig collection, fetched page by page with file contents stripped.
pub const MACHINE_CONFIGS_URI: &str = "/apis/machineconfiguration.openshift.io/v1/machineconfigs";

/// MachineConfigs requested per page.
pub const MACHINE_CONFIG_PAGE_SIZE: u32 = 5;

/// Reads one resource and returns its serialized body.
#[async_trait]
pub trait ResourceStreamer: Send + Sync {
    /// Cluster API failures come back as [`Error::Fetch`].
    async fn stream(&self, client: &dyn ClusterClient) -> Result<Vec<u8>>;
}

/// Picks the streamer for a URI.
pub type StreamerDispatch = fn(&str) -> Box<dyn ResourceStreamer>;

pub fn streamer_for(uri: &str) -> Box<dyn ResourceStreamer> {
    if uri == MACHINE_CONFIGS_URI {
        Box::new(MachineConfigStreamer::default())
    } else {
        Box::new(UriStreamer::new(uri))
    }
}

/// A plain GET of the URI.
#[derive(Debug, Clone)]
pub struct UriStreamer {
    uri: String,
}

impl UriStreamer {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl ResourceStreamer for UriStreamer {
    async fn stream(&self, client: &dyn ClusterClient) -> Result<Vec<u8>> {
        client.get_raw(&self.uri).await.map_err(|source| Error::Fetch {
            uri: self.uri.clone(),
            source,
        })
    }
}

/// Lists MachineConfigs in pages, dropping `storage.files` from each
/// embedded Ignition config, and returns one pretty-printed list.
#[derive(Debug, Clone)]
pub struct MachineConfigStreamer {
    page_size: u32,
}

impl Default for MachineConfigStreamer {
    fn default() -> Self {
        Self {
            page_size: MACHINE_CONFIG_PAGE_SIZE,
        }
    }
}

#[async_trait]
impl ResourceStreamer for MachineConfigStreamer {
    async fn stream(&self, client: &dyn ClusterClient) -> Result<Vec<u8>> {
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = client
                .list_page(MACHINE_CONFIGS_URI, self.page_size, continue_token.as_deref())
                .await
                .map_err(|source| Error::Fetch {
                    uri: MACHINE_CONFIGS_URI.to_string(),
                    source,
                })?;
            pages += 1;

            for mut item in page.items {
                trim_machine_config(&mut item)?;
                items.push(item);
            }

            match page.continue_token {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }
        debug!("Listed {} MachineConfigs in {} pages", items.len(), pages);

        let list = json!({
            "apiVersion": "machineconfiguration.openshift.io/v1",
            "kind": "MachineConfigList",
            "metadata": {},
            "items": items,
        });
        Ok(serde_json::to_vec_pretty(&list)?)
    }
}

/// Remove `storage.files` from a MachineConfig's Ignition config.
///
/// `spec.config` is normally an object, but older objects carry it as a
/// JSON string; both are handled and keep their shape.
pub fn trim_machine_config(machine_config: &mut Value) -> Result<()> {
    let name = machine_config
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(config) = machine_config.pointer_mut("/spec/config") else {
        return Ok(());
    };

    if config.is_object() {
        return strip_files(config, &name);
    }
    match config {
        Value::Null => Ok(()),
        Value::String(raw) if raw.trim().is_empty() => Ok(()),
        Value::String(raw) => {
            let mut ignition: Value =
                serde_json::from_str(raw).map_err(|e| Error::MachineConfig {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            strip_files(&mut ignition, &name)?;
            *raw = serde_json::to_string(&ignition)?;
            Ok(())
        }
        other => Err(Error::MachineConfig {
            name,
            reason: format!("unexpected Ignition config: {}", other),
        }),
    }
}

fn strip_files(ignition: &mut Value, name: &str) -> Result<()> {
    let Some(ignition) = ignition.as_object_mut() else {
        return Err(Error::MachineConfig {
            name: name.to_string(),
            reason: "Ignition config is not an object".to_string(),
        });
    };
    if let Some(Value::Object(storage)) = ignition.get_mut("storage") {
        storage.remove("files");
    }
    Ok(())
}
