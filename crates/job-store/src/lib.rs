//! Job persistence gateway implementations.

mod apply;
mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use job_types::{JobStore, StoreError};
pub use memory::InMemoryJobStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;
