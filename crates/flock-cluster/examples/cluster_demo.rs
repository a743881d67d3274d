//! Leader handover demonstration
//!
//! Starts two nodes on a temporary coordination directory, stops whichever
//! leads and shows the other one taking over.

use flock_cluster::{ClusterService, ClusterServiceConfig, FileLockClusterService};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let root = tempfile::tempdir()?;
    let config = ClusterServiceConfig::new(root.path())
        .with_acquire_lock_delay(Duration::ZERO)
        .with_acquire_lock_interval(Duration::from_millis(500));

    println!("🚀 Starting two nodes on {}", root.path().display());

    let node1 = FileLockClusterService::new(config.clone())?;
    let node2 = FileLockClusterService::new(config)?;
    let view1 = node1.view("demo")?;
    let view2 = node2.view("demo")?;

    node1.start().await?;
    node2.start().await?;

    let member1 = view1.local_member();
    let member2 = view2.local_member();
    tokio::select! {
        _ = member1.wait_for_leadership() => {}
        _ = member2.wait_for_leadership() => {}
    }

    let (leader, follower, follower_view) = if view1.local_member().is_leader() {
        (&node1, &node2, &view2)
    } else {
        (&node2, &node1, &view1)
    };
    println!("👑 Leader: {}", leader.node_id());
    println!("👥 Follower: {}", follower.node_id());

    sleep(Duration::from_secs(2)).await;

    println!("🛑 Stopping the leader");
    leader.stop().await?;

    follower_view.local_member().wait_for_leadership().await;
    println!("👑 New leader: {}", follower.node_id());

    follower.stop().await?;
    println!("✅ Demo finished");
    Ok(())
}
