//! Job orchestration server: configuration, component wiring, and background sweeps.

pub mod config;
mod orchestrator;
pub mod shutdown;

pub use config::{ConfigError, ServerConfig};
pub use orchestrator::{launcher_from_config, Orchestrator};

use job_types::{CatalogError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Setup(String),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}
