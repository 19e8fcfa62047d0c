//! Fetching discovered resources from the cluster.

use crate::client::ClusterClient;
use crate::filter::{apply_filter, extra_results_warning};
use crate::streamer::{streamer_for, StreamerDispatch};
use apicollect_common::{Error, ResourcePath, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Payload prefix stored in place of an object the API server reported missing.
pub const NOT_FOUND_MARKER_PREFIX: &str = "# kube-api-error=";

/// Fetched bodies keyed by dump path, plus the warnings collected on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub results: BTreeMap<String, Vec<u8>>,
    pub warnings: Vec<String>,
}

/// Whether `body` is a not-found marker rather than a fetched object.
pub fn is_error_marker(body: &[u8]) -> bool {
    body.starts_with(NOT_FOUND_MARKER_PREFIX.as_bytes())
}

pub fn not_found_marker(reason: &str) -> Vec<u8> {
    format!("{}{}", NOT_FOUND_MARKER_PREFIX, reason).into_bytes()
}

/// Fetches resource paths one at a time.
pub struct Fetcher<'a> {
    client: &'a dyn ClusterClient,
    dispatch: StreamerDispatch,
}

impl<'a> Fetcher<'a> {
    pub fn new(client: &'a dyn ClusterClient) -> Self {
        Self {
            client,
            dispatch: streamer_for,
        }
    }

    pub fn with_dispatch(mut self, dispatch: StreamerDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Fetch every path in order.
    ///
    /// Missing objects, RBAC denials and unserved kinds become warnings (a
    /// missing object also leaves a marker at its dump path); any other
    /// failure aborts the run.
    pub async fn fetch(&self, paths: &[ResourcePath]) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::default();
        for path in paths {
            self.fetch_one(path, &mut outcome).await?;
        }
        Ok(outcome)
    }

    async fn fetch_one(&self, path: &ResourcePath, outcome: &mut FetchOutcome) -> Result<()> {
        let uri = &path.obj_path;
        info!("Fetching URI: '{}'", uri);

        let body = match (self.dispatch)(uri).stream(self.client).await {
            Ok(body) => body,
            Err(Error::Fetch { uri, source }) if source.is_tolerated() => {
                debug!("Non-fatal error fetching {}: {}", uri, source);
                outcome
                    .warnings
                    .push(format!("could not fetch {}: {}", uri, source));
                if source.is_not_found() {
                    outcome
                        .results
                        .insert(path.dump_path.clone(), not_found_marker(source.reason()));
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if body.is_empty() {
            debug!("No data in response body for {}", uri);
            return Ok(());
        }

        if !path.has_filter() {
            outcome.results.insert(path.dump_path.clone(), body);
            return Ok(());
        }

        debug!("Applying filter '{}' to path '{}'", path.filter, uri);
        let filtered = apply_filter(&body, &path.filter)?;
        if filtered.extra_results {
            debug!("More than one result from filter '{}'", path.filter);
            outcome.warnings.push(extra_results_warning(&path.filter));
        }
        outcome.results.insert(path.dump_path.clone(), filtered.body);
        Ok(())
    }
}
