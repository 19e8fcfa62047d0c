//! Resource paths: what to fetch and where to put it.

use serde::{Deserialize, Serialize};

/// A cluster object to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePath {
    /// URI requested from the API server.
    pub obj_path: String,
    /// Key the fetched content is stored under.
    pub dump_path: String,
    /// Optional filter applied to the fetched JSON. Empty means pass-through.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
}

impl ResourcePath {
    /// A path stored under its own URI, without a filter.
    pub fn new(obj_path: impl Into<String>) -> Self {
        let obj_path = obj_path.into();
        Self {
            dump_path: obj_path.clone(),
            obj_path,
            filter: String::new(),
        }
    }

    pub fn with_dump_path(mut self, dump_path: impl Into<String>) -> Self {
        self.dump_path = dump_path.into();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn has_filter(&self) -> bool {
        !self.filter.is_empty()
    }
}
