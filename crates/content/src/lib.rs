//! Benchmark content handling for apicollect.
//!
//! This crate loads XCCDF benchmark and tailoring documents and works out
//! which cluster resources the selected profile needs.

pub mod directive;
pub mod document;
pub mod loader;
pub mod profile;
pub mod resolver;
pub mod variables;

pub use document::{ContentDocument, Element, XCCDF_NS};
pub use loader::{ContentLoader, CONTENT_FILE_TIMEOUT};
pub use profile::Profile;
pub use resolver::{ProfileResolver, Resolution};
pub use variables::VariableTable;
