//! File-lock cluster leader election
//!
//! Processes sharing a directory elect one leader per namespace. A namespace
//! owns two files under the root: the lock file, exclusively locked by the
//! leader, and a data file holding the leader's identity and heartbeat. The
//! lock gives mutual exclusion between live processes; the heartbeat lets
//! others take over when the leader dies or loses its storage.
//!
//! ```no_run
//! use flock_cluster::{ClusterService, ClusterServiceConfig, FileLockClusterService};
//!
//! # async fn demo() -> flock_cluster::Result<()> {
//! let service = FileLockClusterService::new(ClusterServiceConfig::new("/mnt/shared/cluster"))?;
//! let view = service.view("orders")?;
//! service.start().await?;
//!
//! view.local_member().wait_for_leadership().await;
//! // leader-only work here
//!
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod cluster_data;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod leader_election;
pub mod leader_info;
pub mod lock_file;
pub mod membership;
pub mod node;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod proptest;

pub use cluster_data::ClusterDataTasks;
pub use config::{ClusterServiceConfig, ElectionSettings, NamespacePaths};
pub use error::{ClusterError, Result};
pub use heartbeat::StalenessDetector;
pub use leader_election::{LeaderElection, TickOutcome};
pub use leader_info::{DataFileState, LeaderInfo};
pub use lock_file::LockFile;
pub use membership::{ClusterMember, ClusterView, FileLockClusterView, LeadershipEvent, LocalMember};
pub use node::{ElectionState, NodeId};
pub use scheduler::{ClusterScheduler, ScheduledTask};
pub use service::{ClusterService, FileLockClusterService};
