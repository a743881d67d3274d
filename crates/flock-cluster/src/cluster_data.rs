//! Bounded execution of data file I/O
//!
//! The coordination directory may live on a network share that hangs instead
//! of failing. Every data file access runs on the blocking pool under a
//! timeout, with a bounded number of attempts, so a stuck filesystem delays a
//! tick but never wedges the election loop or shutdown.

use crate::error::{ClusterError, Result};
use crate::leader_info::{self, LeaderInfo};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Data file I/O runner with a timeout and bounded attempts.
///
/// An attempt that times out keeps running on the blocking pool. It is kept
/// as the in-flight attempt: no further attempt starts until it finishes, and
/// whoever releases the namespace lock must wait for it first (see
/// [`ClusterDataTasks::take_in_flight`]).
#[derive(Debug)]
pub struct ClusterDataTasks {
    timeout: Duration,
    max_attempts: u32,
    in_flight: Option<JoinHandle<()>>,
}

impl ClusterDataTasks {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            in_flight: None,
        }
    }

    /// Run `op` on the blocking pool until it succeeds or attempts run out.
    pub async fn run<T, F>(&mut self, what: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> io::Result<T> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let error = if !self.settle(self.timeout).await {
                ClusterError::timeout(format!(
                    "{}: an earlier attempt is still running after {:?}",
                    what, self.timeout
                ))
            } else {
                match self.attempt(Arc::clone(&op)).await {
                    Ok(value) => return Ok(value),
                    Err(AttemptError::Failed(e)) => ClusterError::Io(e),
                    Err(AttemptError::Panicked) => {
                        ClusterError::data_task(format!("{}: blocking task panicked", what))
                    }
                    Err(AttemptError::TimedOut) => ClusterError::timeout(format!(
                        "{} did not complete within {:?}",
                        what, self.timeout
                    )),
                }
            };
            tracing::debug!(
                task = what,
                attempt,
                max_attempts = self.max_attempts,
                error = %error,
                "Cluster data task attempt failed"
            );
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| ClusterError::data_task(format!("{}: no attempts made", what))))
    }

    async fn attempt<T, F>(&mut self, op: Arc<F>) -> std::result::Result<T, AttemptError>
    where
        T: Send + 'static,
        F: Fn() -> io::Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::task::spawn_blocking(move || {
            let _ = tx.send((*op)());
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(AttemptError::Failed(e)),
            // sender dropped without a result: the closure panicked
            Ok(Err(_)) => Err(AttemptError::Panicked),
            Err(_) => {
                self.in_flight = Some(handle);
                Err(AttemptError::TimedOut)
            }
        }
    }

    /// Wait up to `limit` for a timed-out attempt to finish. True when none
    /// is left running.
    pub async fn settle(&mut self, limit: Duration) -> bool {
        let Some(handle) = self.in_flight.as_mut() else {
            return true;
        };
        if tokio::time::timeout(limit, handle).await.is_err() {
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Whether a timed-out attempt is still running
    pub fn has_in_flight(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Hand over the timed-out attempt that is still running, if any.
    pub fn take_in_flight(&mut self) -> Option<JoinHandle<()>> {
        self.in_flight.take().filter(|handle| !handle.is_finished())
    }

    pub async fn read_leader(&mut self, path: &Path) -> Result<Option<LeaderInfo>> {
        let path = path.to_path_buf();
        self.run("read leader record", move || leader_info::read(&path))
            .await
    }

    pub async fn write_leader(&mut self, path: &Path, info: LeaderInfo, sync: bool) -> Result<()> {
        let path: PathBuf = path.to_path_buf();
        self.run("write leader record", move || leader_info::write(&path, &info, sync))
            .await
    }

    pub async fn clear_leader(&mut self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.run("clear leader record", move || leader_info::write_empty(&path, true))
            .await
    }
}

enum AttemptError {
    Failed(io::Error),
    Panicked,
    TimedOut,
}
