//! File-lock cluster service: node identity, lifecycle and views by namespace

use crate::config::{ClusterServiceConfig, ElectionSettings};
use crate::error::{ClusterError, Result};
use crate::leader_election::LeaderElection;
use crate::membership::{ClusterView, FileLockClusterView, MembershipState};
use crate::node::NodeId;
use crate::scheduler::ClusterScheduler;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;

/// Lookup of membership views by namespace, with a start/stop lifecycle
#[async_trait]
pub trait ClusterService: Send + Sync {
    fn node_id(&self) -> NodeId;

    async fn start(&self) -> Result<()>;

    /// Stop every election, relinquishing held leaderships.
    async fn stop(&self) -> Result<()>;

    /// View of `namespace`, created on first use. Views created while the
    /// service runs start electing immediately.
    fn view(&self, namespace: &str) -> Result<Arc<dyn ClusterView>>;
}

/// Cluster service electing leaders through lock files in a shared directory
pub struct FileLockClusterService {
    node_id: NodeId,
    config: ClusterServiceConfig,
    settings: ElectionSettings,
    runtime: Option<Handle>,
    views: DashMap<String, Arc<FileLockClusterView>>,
    running: Mutex<Option<Running>>,
}

/// Scheduler of a started service and the namespaces it already drives
struct Running {
    scheduler: ClusterScheduler,
    scheduled: HashSet<String>,
}

impl FileLockClusterService {
    /// Create a service with a fresh node identity.
    ///
    /// Invalid configuration is fatal and reported here.
    pub fn new(config: ClusterServiceConfig) -> Result<Self> {
        Self::with_node_id(config, NodeId::new())
    }

    pub fn with_node_id(config: ClusterServiceConfig, node_id: NodeId) -> Result<Self> {
        let settings = config.validate()?;
        Ok(Self {
            node_id,
            config,
            settings,
            runtime: None,
            views: DashMap::new(),
            running: Mutex::new(None),
        })
    }

    /// Run election loops on `handle` instead of the runtime calling `start`
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn config(&self) -> &ClusterServiceConfig {
        &self.config
    }

    pub fn settings(&self) -> &ElectionSettings {
        &self.settings
    }

    pub fn is_started(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Concrete view of `namespace`, created on first use
    pub fn namespace_view(&self, namespace: &str) -> Result<Arc<FileLockClusterView>> {
        if let Some(view) = self.views.get(namespace) {
            return Ok(Arc::clone(view.value()));
        }

        let paths = self.config.paths_for(namespace)?;
        let view = {
            let entry = self.views.entry(namespace.to_string()).or_insert_with(|| {
                Arc::new(FileLockClusterView::new(
                    paths,
                    MembershipState::new(namespace, self.node_id),
                ))
            });
            Arc::clone(entry.value())
        };

        if let Some(running) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            self.schedule_view(running, &view)?;
        }
        Ok(view)
    }

    /// Namespaces with a view, in no particular order
    pub fn namespaces(&self) -> Vec<String> {
        self.views.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Start the election loop of `view` unless it already runs.
    fn schedule_view(&self, running: &mut Running, view: &FileLockClusterView) -> Result<()> {
        let namespace = view.namespace();
        if running.scheduled.contains(namespace) {
            return Ok(());
        }

        let election = LeaderElection::new(view.paths(), &self.settings, view.shared_state());
        tracing::debug!(namespace = %namespace, node_id = %self.node_id, "Scheduling election");
        running.scheduler.schedule(
            namespace,
            election,
            self.settings.acquire_lock_delay,
            self.settings.acquire_lock_interval,
        )?;
        running.scheduled.insert(namespace.to_string());
        Ok(())
    }

    /// Longest a graceful stop waits for every loop to relinquish
    fn stop_grace(&self) -> Duration {
        // a tick in flight plus the relinquish write, both bounded by data task limits
        self.settings
            .relinquish_budget()
            .saturating_mul(2)
    }
}

#[async_trait]
impl ClusterService for FileLockClusterService {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn start(&self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }

        prepare_root(&self.config.root)?;

        let scheduler = match &self.runtime {
            Some(handle) => ClusterScheduler::new(handle.clone()),
            None => ClusterScheduler::current()?,
        };

        {
            let mut slot = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Ok(());
            }
            let running = slot.insert(Running {
                scheduler,
                scheduled: HashSet::new(),
            });

            let views: Vec<_> = self.views.iter().map(|entry| Arc::clone(entry.value())).collect();
            for view in views {
                self.schedule_view(running, &view)?;
            }
        }

        tracing::info!(
            node_id = %self.node_id,
            root = %self.config.root.display(),
            namespaces = self.views.len(),
            "File lock cluster service started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(running) = running {
            tracing::info!(node_id = %self.node_id, "Stopping file lock cluster service");
            running.scheduler.shutdown(self.stop_grace()).await;
        }
        Ok(())
    }

    fn view(&self, namespace: &str) -> Result<Arc<dyn ClusterView>> {
        let view: Arc<dyn ClusterView> = self.namespace_view(namespace)?;
        Ok(view)
    }
}

impl Drop for FileLockClusterService {
    fn drop(&mut self) {
        // dropping without stop behaves like a crash: loops die, locks are
        // released by the OS, records are left to go stale
        if let Some(running) = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            running.scheduler.abort();
        }
    }
}

/// Ensure the coordination directory exists and is readable.
fn prepare_root(root: &Path) -> Result<()> {
    match fs::metadata(root) {
        Ok(metadata) if !metadata.is_dir() => {
            return Err(ClusterError::configuration(format!(
                "root {} is not a directory",
                root.display()
            )));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(root).map_err(|e| {
                ClusterError::configuration(format!(
                    "unable to create root {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }
        Err(e) => {
            return Err(ClusterError::configuration(format!(
                "unable to access root {}: {}",
                root.display(),
                e
            )));
        }
    }

    fs::read_dir(root).map_err(|e| {
        ClusterError::configuration(format!("root {} is not readable: {}", root.display(), e))
    })?;
    Ok(())
}
