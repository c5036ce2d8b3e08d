//! Job lifecycle coordination: the CAS-guarded state machine, zombie reaping, retention,
//! and the launch and kill services built on them.

mod error;
mod events;
mod kill;
mod launch;
mod reaper;
mod registry;
mod retention;
pub mod retry;
mod state_machine;
mod task;

pub use error::JobError;
pub use events::{BroadcastEventPublisher, NoopEventPublisher};
pub use kill::{JobKillService, KillOutcome};
pub use launch::{JobLaunchService, LaunchedJob};
pub use reaper::{ReapReport, ReaperSettings, ZombieReaper};
pub use registry::AgentRegistry;
pub use retention::{RetentionReport, RetentionSettings, RetentionSweeper};
pub use retry::{with_backoff, RetryPolicy};
pub use state_machine::{JobStateMachine, DEFAULT_MAX_STATUS_MESSAGE_LEN};
pub use task::PeriodicTask;
