//! Criterion matching and the in-memory resource catalog.

pub mod matcher;
mod memory;

pub use job_types::{CatalogError, ResourceCatalog};
pub use memory::{CatalogSnapshot, InMemoryResourceCatalog};
