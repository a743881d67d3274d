//! Leader election state machine for one namespace
//!
//! Every tick a follower tries the lock file. Holding the lock is necessary
//! but not sufficient: the data file decides. A follower that gets the lock
//! claims leadership only if no live record of another node is present, which
//! covers the lock file having been deleted or recreated under a running
//! leader. A leader re-checks both the lock and its own record on every tick
//! and steps down as soon as either is gone.

use crate::cluster_data::ClusterDataTasks;
use crate::config::{ElectionSettings, NamespacePaths};
use crate::error::Result;
use crate::heartbeat::{self, StalenessDetector};
use crate::leader_info::LeaderInfo;
use crate::lock_file::LockFile;
use crate::membership::MembershipState;
use crate::node::{ElectionState, NodeId};
use crate::scheduler::ScheduledTask;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a single election tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// This node claimed leadership during the tick
    BecameLeader,
    /// This node led before the tick and still does
    StillLeader,
    /// This node led before the tick and stepped down
    LostLeadership,
    /// The lock is held elsewhere, or a live leader is recorded
    Follower,
    /// Acquisition skipped while the post-loss backoff runs
    BackingOff,
    /// Transient I/O failure; retried next tick
    Failed,
}

/// Per-namespace election driven by the scheduler
pub struct LeaderElection {
    node_id: NodeId,
    lock: LockFile,
    data_file: PathBuf,
    heartbeat_interval_millis: i64,
    staleness: StalenessDetector,
    backoff: Duration,
    backoff_until: Option<Instant>,
    sync_writes: bool,
    data: ClusterDataTasks,
    membership: Arc<MembershipState>,
}

impl LeaderElection {
    pub(crate) fn new(
        paths: &NamespacePaths,
        settings: &ElectionSettings,
        membership: Arc<MembershipState>,
    ) -> Self {
        Self {
            node_id: membership.node_id(),
            lock: LockFile::new(&paths.lock_file),
            data_file: paths.data_file.clone(),
            heartbeat_interval_millis: settings.heartbeat_interval_millis(),
            staleness: settings.staleness,
            backoff: settings.acquire_leadership_backoff,
            backoff_until: None,
            sync_writes: settings.sync_writes,
            data: ClusterDataTasks::new(settings.data_task_timeout, settings.data_task_max_attempts),
            membership,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn state(&self) -> ElectionState {
        self.membership.state()
    }

    pub fn is_leader(&self) -> bool {
        self.membership.is_leader()
    }

    /// Run one election step.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.is_leader() {
            self.maintain_leadership().await
        } else {
            self.try_acquire_leadership().await
        }
    }

    async fn try_acquire_leadership(&mut self) -> TickOutcome {
        if let Some(until) = self.backoff_until {
            if Instant::now() < until {
                tracing::trace!("Leadership backoff in progress, skipping acquisition");
                return TickOutcome::BackingOff;
            }
            self.backoff_until = None;
        }

        self.membership.set_state(ElectionState::Acquiring);
        let acquired = match self.lock.try_acquire() {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(error = %e, "Lock acquisition failed");
                self.membership.set_state(ElectionState::Follower);
                return TickOutcome::Failed;
            }
        };

        if !acquired {
            self.membership.set_state(ElectionState::Follower);
            self.peek_leader().await;
            return TickOutcome::Follower;
        }

        match self.claim_if_vacant().await {
            Ok(true) => TickOutcome::BecameLeader,
            Ok(false) => {
                self.release_lock();
                self.membership.set_state(ElectionState::Follower);
                TickOutcome::Follower
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim leadership");
                self.release_lock();
                self.membership.set_state(ElectionState::Follower);
                TickOutcome::Failed
            }
        }
    }

    /// With the lock held, decide from the data file whether to lead.
    async fn claim_if_vacant(&mut self) -> Result<bool> {
        let recorded = self.data.read_leader(&self.data_file).await?;
        let now = heartbeat::current_time_millis();

        if let Some(current) = recorded {
            if current.id() == self.node_id {
                tracing::info!("Found own leader record, resuming leadership");
            } else if self.staleness.is_stale(&current, now) {
                tracing::info!(
                    previous = %current.id(),
                    last_heartbeat = current.heartbeat_timestamp_millis(),
                    timeout_ms = self.staleness.timeout_for(&current).as_millis() as u64,
                    "Previous leader is stale, taking over"
                );
            } else {
                tracing::debug!(
                    leader = %current.id(),
                    "Lock acquired but another leader is still alive, releasing"
                );
                self.membership.observe_leader(Some(current));
                return Ok(false);
            }
        }

        let record = LeaderInfo::new(self.node_id, self.heartbeat_interval_millis, now);
        self.data
            .write_leader(&self.data_file, record, self.sync_writes)
            .await?;
        self.membership.gain_leadership(record);
        Ok(true)
    }

    async fn maintain_leadership(&mut self) -> TickOutcome {
        if !self.lock.is_held() {
            self.step_down("lock file is no longer held");
            return TickOutcome::LostLeadership;
        }

        match self.data.read_leader(&self.data_file).await {
            Ok(Some(current)) if current.id() == self.node_id => {}
            Ok(Some(current)) => {
                tracing::warn!(recorded = %current.id(), "Data file names another leader");
                self.step_down("data file records another leader");
                return TickOutcome::LostLeadership;
            }
            Ok(None) => {
                self.step_down("leader record was cleared");
                return TickOutcome::LostLeadership;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read leader record");
                self.step_down("leader record is unreadable");
                return TickOutcome::LostLeadership;
            }
        }

        let record = LeaderInfo::heartbeat_now(self.node_id, self.heartbeat_interval_millis);
        if let Err(e) = self
            .data
            .write_leader(&self.data_file, record, self.sync_writes)
            .await
        {
            tracing::warn!(error = %e, "Failed to write heartbeat");
            self.step_down("heartbeat write failed");
            return TickOutcome::LostLeadership;
        }

        tracing::trace!(timestamp = record.heartbeat_timestamp_millis(), "Heartbeat written");
        self.membership.observe_leader(Some(record));
        TickOutcome::StillLeader
    }

    fn step_down(&mut self, reason: &str) {
        // observers must see "not leader" before the lock can pass on
        self.membership.lose_leadership(reason);
        self.release_lock();
        self.membership.set_state(ElectionState::Follower);
        if !self.backoff.is_zero() {
            self.backoff_until = Some(Instant::now() + self.backoff);
        }
    }

    /// Release the namespace lock once no write of ours can still land.
    ///
    /// A timed-out write keeps running on the blocking pool. The lock is then
    /// handed to a task that drops it only after that write finishes, so the
    /// next holder never has its record overwritten by a late write.
    fn release_lock(&mut self) {
        let Some(write) = self.data.take_in_flight() else {
            self.lock.release();
            return;
        };

        let path = self.lock.path().to_path_buf();
        let lock = std::mem::replace(&mut self.lock, LockFile::new(path));
        tracing::warn!("Holding the lock until a timed-out data write finishes");
        tokio::spawn(async move {
            let mut lock = lock;
            if let Err(e) = write.await {
                tracing::debug!(error = %e, "Timed-out data write did not complete");
            }
            lock.release();
            tracing::debug!("Timed-out data write finished, lock released");
        });
    }

    /// Refresh the observed leader while another node holds the lock.
    async fn peek_leader(&mut self) {
        match self.data.read_leader(&self.data_file).await {
            Ok(recorded) => self.membership.observe_leader(recorded),
            Err(e) => tracing::debug!(error = %e, "Could not read leader record"),
        }
    }

    /// Give up leadership for good: clear the record, release the lock.
    ///
    /// Best effort. Failures are logged and the lock is released regardless.
    pub async fn relinquish(&mut self) {
        if !self.is_leader() {
            self.release_lock();
            return;
        }

        self.membership.set_state(ElectionState::Relinquishing);
        self.membership.lose_leadership("relinquished on shutdown");

        if self.lock.is_held() {
            if let Err(e) = self.data.clear_leader(&self.data_file).await {
                tracing::warn!(error = %e, "Failed to clear leader record on relinquish");
            }
        } else {
            tracing::debug!(
                data_file = %self.data_file.display(),
                "Lock no longer held, leaving data file untouched; the record will age out once stale"
            );
        }

        self.release_lock();
        self.membership.set_state(ElectionState::Follower);
        tracing::info!("Leadership relinquished");
    }
}

#[async_trait]
impl ScheduledTask for LeaderElection {
    async fn run(&mut self) {
        let outcome = self.tick().await;
        tracing::trace!(?outcome, "Election tick");
    }

    async fn shutdown(&mut self) {
        self.relinquish().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterServiceConfig;
    use crate::leader_info::{self, DataFileState};
    use crate::membership::LeadershipEvent;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        paths: NamespacePaths,
        settings: ElectionSettings,
    }

    fn fixture(configure: impl FnOnce(ClusterServiceConfig) -> ClusterServiceConfig) -> Fixture {
        let dir = tempdir().unwrap();
        let config = configure(
            ClusterServiceConfig::new(dir.path())
                .with_acquire_lock_interval(Duration::from_millis(100))
                .with_heartbeat_timeout_multiplier(3)
                .with_cluster_data_task_timeout(Duration::from_secs(2)),
        );
        let settings = config.validate().unwrap();
        let paths = config.paths_for("ns").unwrap();
        Fixture {
            _dir: dir,
            paths,
            settings,
        }
    }

    impl Fixture {
        fn node(&self) -> LeaderElection {
            LeaderElection::new(&self.paths, &self.settings, MembershipState::new("ns", NodeId::new()))
        }

        fn node_with_id(&self, id: NodeId) -> LeaderElection {
            LeaderElection::new(&self.paths, &self.settings, MembershipState::new("ns", id))
        }

        fn record(&self) -> Option<LeaderInfo> {
            leader_info::read(&self.paths.data_file).unwrap()
        }
    }

    fn lock_is_free(path: &Path) -> bool {
        LockFile::new(path).try_acquire().unwrap()
    }

    #[tokio::test]
    async fn test_first_tick_claims_vacant_namespace() {
        let fx = fixture(|c| c);
        let mut node = fx.node();

        assert_eq!(node.tick().await, TickOutcome::BecameLeader);
        assert!(node.is_leader());
        assert_eq!(node.state(), ElectionState::Leader);

        let record = fx.record().unwrap();
        assert_eq!(record.id(), node.node_id());
        assert_eq!(record.heartbeat_interval_millis(), 100);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_timestamp() {
        let fx = fixture(|c| c);
        let mut node = fx.node();

        node.tick().await;
        let first = fx.record().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(node.tick().await, TickOutcome::StillLeader);
        let second = fx.record().unwrap();
        assert_eq!(second.id(), first.id());
        assert_eq!(second.heartbeat_interval_millis(), first.heartbeat_interval_millis());
        assert!(second.heartbeat_timestamp_millis() >= first.heartbeat_timestamp_millis());
    }

    #[tokio::test]
    async fn test_second_node_stays_follower() {
        let fx = fixture(|c| c);
        let mut first = fx.node();
        let mut second = fx.node();

        first.tick().await;
        assert_eq!(second.tick().await, TickOutcome::Follower);
        assert!(!second.is_leader());
        assert_eq!(second.state(), ElectionState::Follower);
        assert_eq!(second.membership.observed_leader().unwrap().id(), first.node_id());
    }

    #[tokio::test]
    async fn test_live_foreign_record_releases_lock() {
        let fx = fixture(|c| c);
        let other = LeaderInfo::heartbeat_now(NodeId::new(), 60_000);
        leader_info::write(&fx.paths.data_file, &other, false).unwrap();

        let mut node = fx.node();
        assert_eq!(node.tick().await, TickOutcome::Follower);
        assert!(!node.is_leader());
        assert!(lock_is_free(&fx.paths.lock_file));
        assert_eq!(fx.record(), Some(other));
    }

    #[tokio::test]
    async fn test_stale_foreign_record_is_taken_over() {
        let fx = fixture(|c| c);
        let dead = LeaderInfo::new(NodeId::new(), 100, 0);
        leader_info::write(&fx.paths.data_file, &dead, false).unwrap();

        let mut node = fx.node();
        assert_eq!(node.tick().await, TickOutcome::BecameLeader);
        assert_eq!(fx.record().unwrap().id(), node.node_id());
    }

    #[tokio::test]
    async fn test_own_record_is_reclaimed_even_if_fresh() {
        let fx = fixture(|c| c);
        let id = NodeId::new();
        let own = LeaderInfo::heartbeat_now(id, 60_000);
        leader_info::write(&fx.paths.data_file, &own, false).unwrap();

        let mut node = fx.node_with_id(id);
        assert_eq!(node.tick().await, TickOutcome::BecameLeader);
        assert_eq!(fx.record().unwrap().id(), id);
    }

    #[tokio::test]
    async fn test_corrupt_record_counts_as_vacant() {
        let fx = fixture(|c| c);
        fs::write(&fx.paths.data_file, b"torn").unwrap();

        let mut node = fx.node();
        assert_eq!(node.tick().await, TickOutcome::BecameLeader);
    }

    #[tokio::test]
    async fn test_cleared_record_loses_then_regains_same_id() {
        let fx = fixture(|c| c);
        let mut node = fx.node();
        let mut events = node.membership.subscribe();
        let id = node.node_id();

        node.tick().await;
        fs::write(&fx.paths.data_file, b"").unwrap();

        assert_eq!(node.tick().await, TickOutcome::LostLeadership);
        assert!(!node.is_leader());
        assert!(lock_is_free(&fx.paths.lock_file));

        assert_eq!(node.tick().await, TickOutcome::BecameLeader);
        assert_eq!(fx.record().unwrap().id(), id);

        assert!(events.try_recv().unwrap().is_gained());
        assert!(!events.try_recv().unwrap().is_gained());
        assert!(events.try_recv().unwrap().is_gained());
    }

    #[tokio::test]
    async fn test_deleted_lock_file_loses_leadership() {
        let fx = fixture(|c| c);
        let mut node = fx.node();
        let id = node.node_id();

        node.tick().await;
        fs::remove_file(&fx.paths.lock_file).unwrap();

        assert_eq!(node.tick().await, TickOutcome::LostLeadership);
        assert!(!node.is_leader());

        // no backoff configured: the next tick recreates the lock and resumes
        assert_eq!(node.tick().await, TickOutcome::BecameLeader);
        assert_eq!(fx.record().unwrap().id(), id);
    }

    #[tokio::test]
    async fn test_deleted_lock_file_does_not_let_a_peer_usurp() {
        let fx = fixture(|c| c);
        let mut leader = fx.node();
        let mut peer = fx.node();

        leader.tick().await;
        fs::remove_file(&fx.paths.lock_file).unwrap();

        // the peer can lock the recreated file, but the record is live
        assert_eq!(peer.tick().await, TickOutcome::Follower);
        assert!(!peer.is_leader());
    }

    #[tokio::test]
    async fn test_foreign_record_while_leading_steps_down() {
        let fx = fixture(|c| c);
        let mut node = fx.node();

        node.tick().await;
        let usurper = LeaderInfo::heartbeat_now(NodeId::new(), 100);
        leader_info::write(&fx.paths.data_file, &usurper, false).unwrap();

        assert_eq!(node.tick().await, TickOutcome::LostLeadership);
        assert!(!node.is_leader());
    }

    #[tokio::test]
    async fn test_backoff_delays_reacquisition() {
        let fx = fixture(|c| c.with_acquire_leadership_backoff(Duration::from_millis(200)));
        let mut node = fx.node();

        node.tick().await;
        fs::write(&fx.paths.data_file, b"").unwrap();
        assert_eq!(node.tick().await, TickOutcome::LostLeadership);

        assert_eq!(node.tick().await, TickOutcome::BackingOff);
        assert!(!node.is_leader());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(node.tick().await, TickOutcome::BecameLeader);
    }

    #[tokio::test]
    async fn test_relinquish_writes_empty_sentinel() {
        let fx = fixture(|c| c);
        let mut node = fx.node();
        let mut events = node.membership.subscribe();

        node.tick().await;
        node.relinquish().await;

        assert!(!node.is_leader());
        assert_eq!(node.state(), ElectionState::Follower);
        assert_eq!(
            leader_info::inspect(&fx.paths.data_file).unwrap(),
            DataFileState::Empty
        );
        assert!(lock_is_free(&fx.paths.lock_file));

        assert!(events.try_recv().unwrap().is_gained());
        assert!(matches!(events.try_recv().unwrap(), LeadershipEvent::Lost { .. }));
    }

    #[tokio::test]
    async fn test_relinquish_as_follower_leaves_record_alone() {
        let fx = fixture(|c| c);
        let mut leader = fx.node();
        let mut follower = fx.node();

        leader.tick().await;
        follower.tick().await;
        follower.relinquish().await;

        assert_eq!(fx.record().unwrap().id(), leader.node_id());
    }

    #[tokio::test]
    async fn test_relinquish_with_detached_storage_completes() {
        let fx = fixture(|c| c);
        let mut node = fx.node();

        node.tick().await;
        let root = fx.paths.lock_file.parent().unwrap().to_path_buf();
        let detached = root.with_extension("detached");
        fs::rename(&root, &detached).unwrap();

        node.relinquish().await;
        assert!(!node.is_leader());
        assert!(!root.exists());

        fs::rename(&detached, &root).unwrap();
    }

    #[tokio::test]
    async fn test_missing_root_keeps_follower() {
        let fx = fixture(|c| c);
        let root = fx.paths.lock_file.parent().unwrap().to_path_buf();
        fs::remove_dir_all(&root).unwrap();

        let mut node = fx.node();
        assert_eq!(node.tick().await, TickOutcome::Follower);
        assert!(!node.is_leader());
        // a tick never recreates the coordination directory
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_lock_outlives_timed_out_write() {
        let fx = fixture(|mut c| {
            c.cluster_data_task_max_attempts = 1;
            c.with_cluster_data_task_timeout(Duration::from_millis(50))
        });
        let mut node = fx.node();
        assert_eq!(node.tick().await, TickOutcome::BecameLeader);

        let data_file = fx.paths.data_file.clone();
        let late = LeaderInfo::heartbeat_now(node.node_id(), 100);
        let result = node
            .data
            .run("slow heartbeat", move || {
                std::thread::sleep(Duration::from_millis(200));
                leader_info::write(&data_file, &late, false)
            })
            .await;
        assert!(result.is_err());

        node.step_down("heartbeat write failed");
        assert!(!node.is_leader());
        // the late write is still running: nobody else may take the lock yet
        assert!(!lock_is_free(&fx.paths.lock_file));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(lock_is_free(&fx.paths.lock_file));
        assert_eq!(fx.record().unwrap().id(), node.node_id());
    }
}
