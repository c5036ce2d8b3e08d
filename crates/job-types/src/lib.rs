//! Core types and traits for the job orchestration kernel.
//!
//! The job model, criteria, catalog resources, and the collaborator traits
//! (catalog, job store, launcher, load balancer, event publisher, clock) that
//! the resolver and scheduler crates are written against.

mod criterion;
mod job;
mod lifecycle;
mod resource;
mod traits;

#[cfg(feature = "test-util")]
pub mod mock;

pub use criterion::*;
pub use job::*;
pub use lifecycle::*;
pub use resource::*;
pub use traits::*;

#[cfg(feature = "test-util")]
pub use mock::ManualClock;
