//! Common types shared across apicollect crates.

pub mod api;
pub mod error;
pub mod resource;

pub use api::ApiError;
pub use error::{Error, Result};
pub use resource::ResourcePath;
