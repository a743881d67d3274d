//! Cluster membership view and leadership notifications
//!
//! Each namespace has one view. The election loop publishes into it; consumers
//! read it synchronously ([`LocalMember::is_leader`]), wait on it
//! ([`LocalMember::wait_for_leadership`]) or subscribe to
//! [`LeadershipEvent`]s to start and stop leader-only work.

use crate::config::NamespacePaths;
use crate::leader_info::LeaderInfo;
use crate::node::{ElectionState, NodeId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 64;

/// Leadership transition of the local node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadershipEvent {
    Gained { namespace: String, node_id: NodeId },
    Lost { namespace: String, node_id: NodeId },
}

impl LeadershipEvent {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Gained { namespace, .. } | Self::Lost { namespace, .. } => namespace,
        }
    }

    pub fn is_gained(&self) -> bool {
        matches!(self, Self::Gained { .. })
    }
}

/// Snapshot of a member as seen by this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    id: NodeId,
    local: bool,
    leader: bool,
}

impl ClusterMember {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

/// Read-only view of one namespace's election
pub trait ClusterView: Send + Sync {
    fn namespace(&self) -> &str;

    /// Live handle on this node's membership
    fn local_member(&self) -> LocalMember;

    /// Current leader as last observed: this node while it leads, otherwise
    /// the live record another node holds, if one was seen.
    fn leader(&self) -> Option<ClusterMember>;

    /// Members known to this node: itself and the observed leader
    fn members(&self) -> Vec<ClusterMember>;

    fn election_state(&self) -> ElectionState;

    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent>;
}

/// Shared state between an election loop and its observers
#[derive(Debug)]
pub(crate) struct MembershipState {
    namespace: String,
    node_id: NodeId,
    leadership: watch::Sender<bool>,
    election_state: watch::Sender<ElectionState>,
    observed_leader: watch::Sender<Option<LeaderInfo>>,
    events: broadcast::Sender<LeadershipEvent>,
}

impl MembershipState {
    pub(crate) fn new(namespace: impl Into<String>, node_id: NodeId) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            namespace: namespace.into(),
            node_id,
            leadership: watch::Sender::new(false),
            election_state: watch::Sender::new(ElectionState::Follower),
            observed_leader: watch::Sender::new(None),
            events,
        })
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub(crate) fn is_leader(&self) -> bool {
        *self.leadership.borrow()
    }

    pub(crate) fn state(&self) -> ElectionState {
        *self.election_state.borrow()
    }

    pub(crate) fn set_state(&self, state: ElectionState) {
        let previous = self.election_state.send_replace(state);
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "Election state changed");
        }
    }

    pub(crate) fn observe_leader(&self, info: Option<LeaderInfo>) {
        self.observed_leader.send_if_modified(|current| {
            if current.map(|c| c.id()) == info.map(|i| i.id()) {
                // same leader, fresher heartbeat: update silently
                *current = info;
                return false;
            }
            match &info {
                Some(leader) => tracing::debug!(leader = %leader.id(), "Observed leader"),
                None => tracing::debug!("No leader recorded"),
            }
            *current = info;
            true
        });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.events.subscribe()
    }

    pub(crate) fn observed_leader(&self) -> Option<LeaderInfo> {
        *self.observed_leader.borrow()
    }

    pub(crate) fn gain_leadership(&self, record: LeaderInfo) {
        self.set_state(ElectionState::Leader);
        self.observe_leader(Some(record));
        if self.is_leader() {
            return;
        }
        tracing::info!(node_id = %self.node_id, "Leadership gained");
        // event first: whoever sees the flag and subscribes after it must
        // not receive the event for a transition it already observed
        let _ = self.events.send(LeadershipEvent::Gained {
            namespace: self.namespace.clone(),
            node_id: self.node_id,
        });
        self.leadership.send_replace(true);
    }

    /// Publish "not leader". Must happen before the lock is released so no
    /// two local views ever report leadership at once.
    ///
    /// Only the namespace's election loop changes leadership, so the check
    /// and the update below do not race.
    pub(crate) fn lose_leadership(&self, reason: &str) {
        if !self.is_leader() {
            return;
        }
        tracing::warn!(node_id = %self.node_id, reason, "Leadership lost");
        self.observe_leader(None);
        let _ = self.events.send(LeadershipEvent::Lost {
            namespace: self.namespace.clone(),
            node_id: self.node_id,
        });
        self.leadership.send_replace(false);
    }
}

/// Live handle on the local node's membership in one namespace
#[derive(Debug, Clone)]
pub struct LocalMember {
    state: Arc<MembershipState>,
}

impl LocalMember {
    pub fn id(&self) -> NodeId {
        self.state.node_id()
    }

    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Resolve once this node leads the namespace. Returns immediately if it
    /// already does.
    pub async fn wait_for_leadership(&self) {
        let mut changes = self.state.leadership.subscribe();
        // the sender lives as long as `self.state`, so this cannot fail
        let _ = changes.wait_for(|leader| *leader).await;
    }

    /// Receiver that sees every leadership flip of the local node
    pub fn leadership_changes(&self) -> watch::Receiver<bool> {
        self.state.leadership.subscribe()
    }
}

/// [`ClusterView`] backed by a lock file and a data file
#[derive(Debug)]
pub struct FileLockClusterView {
    paths: NamespacePaths,
    state: Arc<MembershipState>,
}

impl FileLockClusterView {
    pub(crate) fn new(paths: NamespacePaths, state: Arc<MembershipState>) -> Self {
        Self { paths, state }
    }

    pub(crate) fn shared_state(&self) -> Arc<MembershipState> {
        Arc::clone(&self.state)
    }

    pub fn paths(&self) -> &NamespacePaths {
        &self.paths
    }

    pub fn lock_file_path(&self) -> &Path {
        &self.paths.lock_file
    }

    pub fn data_file_path(&self) -> &Path {
        &self.paths.data_file
    }

    /// Last leader record this node read or wrote
    pub fn leader_info(&self) -> Option<LeaderInfo> {
        self.state.observed_leader()
    }
}

impl ClusterView for FileLockClusterView {
    fn namespace(&self) -> &str {
        self.state.namespace()
    }

    fn local_member(&self) -> LocalMember {
        LocalMember {
            state: Arc::clone(&self.state),
        }
    }

    fn leader(&self) -> Option<ClusterMember> {
        if self.state.is_leader() {
            return Some(ClusterMember {
                id: self.state.node_id(),
                local: true,
                leader: true,
            });
        }
        self.state
            .observed_leader()
            .filter(|info| info.id() != self.state.node_id())
            .map(|info| ClusterMember {
                id: info.id(),
                local: false,
                leader: true,
            })
    }

    fn members(&self) -> Vec<ClusterMember> {
        let local = ClusterMember {
            id: self.state.node_id(),
            local: true,
            leader: self.state.is_leader(),
        };
        match self.leader() {
            Some(leader) if !leader.is_local() => vec![local, leader],
            _ => vec![local],
        }
    }

    fn election_state(&self) -> ElectionState {
        self.state.state()
    }

    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.state.subscribe()
    }
}
