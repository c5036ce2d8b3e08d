//! Periodic background tasks with jitter and cooperative cancellation.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs a job every `interval ± jitter` until cancelled.
///
/// Jitter keeps several server nodes from sweeping the same store in lockstep.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    jitter: Duration,
}

impl PeriodicTask {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delay before the next run, never shorter than one millisecond.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as i64;
        let offset = if jitter_ms > 0 {
            rand::thread_rng().gen_range(-jitter_ms..=jitter_ms)
        } else {
            0
        };
        let base = self.interval.as_millis() as i64;
        Duration::from_millis((base + offset).max(1) as u64)
    }

    /// Run `tick` after each delay until `token` is cancelled. A tick in progress is allowed
    /// to finish.
    pub async fn run<F, Fut>(self, token: CancellationToken, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::info!(
            task = %self.name,
            interval_ms = self.interval.as_millis() as u64,
            jitter_ms = self.jitter.as_millis() as u64,
            "periodic task started"
        );
        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            tick().await;
        }
        tracing::info!(task = %self.name, "periodic task stopped");
    }

    pub fn spawn<F, Fut>(self, token: CancellationToken, tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run(token, tick))
    }
}
