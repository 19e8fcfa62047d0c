//! apicollect collector - fetches the cluster resources a compliance profile needs.

pub mod client;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod fetcher;
pub mod filter;
pub mod nodes;
pub mod persist;
pub mod reconcile;
pub mod streamer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{ApiServerClient, ClusterClient, ListPage, NodeInfo};
pub use collector::{Collection, Collector, LoadedContent};
pub use config::{ClusterConfig, CollectorConfig};
pub use discovery::{figure_resources, Discovery, FIXED_PATHS};
pub use fetcher::{FetchOutcome, Fetcher};
