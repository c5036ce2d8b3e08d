//! Agent launchers.

mod http;
mod local;

#[cfg(feature = "test-util")]
pub mod mock;

pub use http::HttpAgentLauncher;
pub use job_types::{AgentHandle, AgentLauncher, LaunchError, LaunchReceipt};
pub use local::{LocalAgentHandle, LocalAgentLauncher, SPECIFICATION_ENV_VAR};

#[cfg(feature = "test-util")]
pub use mock::{RecordingHandle, RecordingLauncher};
