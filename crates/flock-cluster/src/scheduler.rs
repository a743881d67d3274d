//! Scheduling substrate for election loops
//!
//! One [`ClusterScheduler`] per running service. Every scheduled task gets its
//! own loop on the injected runtime: loops run in parallel, ticks of one task
//! never overlap, and a tick in progress is never cut short by shutdown.

use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

/// Periodic work driven by the scheduler
#[async_trait]
pub trait ScheduledTask: Send + 'static {
    /// One tick. Errors are the task's own business: log and carry on.
    async fn run(&mut self);

    /// Called once when the scheduler stops the loop gracefully
    async fn shutdown(&mut self);
}

pub struct ClusterScheduler {
    handle: Handle,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl ClusterScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: watch::Sender::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Scheduler on the runtime the caller is running in
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| ClusterError::runtime(format!("No tokio runtime available: {}", e)))?;
        Ok(Self::new(handle))
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run `task` every `interval`, first after `initial_delay`.
    pub fn schedule<T: ScheduledTask>(
        &self,
        name: &str,
        mut task: T,
        initial_delay: Duration,
        interval: Duration,
    ) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(ClusterError::runtime("Scheduler has been shut down"));
        }

        let span = tracing::info_span!("cluster_task", task = %name);

        let join = self.handle.spawn(
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(initial_delay) => {}
                    _ = shutdown.changed() => {
                        task.shutdown().await;
                        return;
                    }
                }

                let mut ticker = tokio::time::interval_at(Instant::now(), interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => task.run().await,
                    }
                }

                task.shutdown().await;
                tracing::debug!("Scheduled task stopped");
            }
            .instrument(span),
        );

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), join));
        Ok(())
    }

    /// Number of loops started and not yet shut down
    pub fn task_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop every loop gracefully, aborting those still running after `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = Instant::now() + grace;

        for (name, mut join) in tasks {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => tracing::error!(task = %name, error = %e, "Scheduled task panicked"),
                Err(_) => {
                    tracing::warn!(task = %name, "Scheduled task did not stop in time, aborting");
                    join.abort();
                }
            }
        }
    }

    /// Abort every loop immediately, skipping graceful shutdown hooks.
    pub fn abort(&self) {
        for (_, join) in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            join.abort();
        }
    }
}

impl Drop for ClusterScheduler {
    fn drop(&mut self) {
        self.abort();
    }
}
