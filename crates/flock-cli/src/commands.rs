use crate::error::{CliError, Result};
use colored::*;
use flock_cluster::leader_info::{self, DataFileState};
use flock_cluster::{
    heartbeat, ClusterService, ClusterServiceConfig, FileLockClusterService, LeadershipEvent,
    NamespacePaths, StalenessDetector,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;

/// What the coordination directory says about one namespace
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceReport {
    pub namespace: String,
    pub lock_file: PathBuf,
    pub lock_file_exists: bool,
    pub data_file: PathBuf,
    pub data: DataFileState,
    pub stale: Option<bool>,
    pub last_heartbeat: Option<String>,
}

impl NamespaceReport {
    pub fn collect(root: &Path, extension: &str, multiplier: i64, namespace: &str) -> Result<Self> {
        let staleness = StalenessDetector::new(multiplier)?;
        let paths = NamespacePaths::new(root, namespace, extension)?;
        let data = leader_info::inspect(&paths.data_file)?;

        let (stale, last_heartbeat) = match data.leader() {
            Some(info) => (
                Some(staleness.is_stale(info, heartbeat::current_time_millis())),
                chrono::DateTime::from_timestamp_millis(info.heartbeat_timestamp_millis())
                    .map(|at| at.to_rfc3339()),
            ),
            None => (None, None),
        };

        Ok(Self {
            namespace: namespace.to_string(),
            lock_file_exists: paths.lock_file.exists(),
            lock_file: paths.lock_file,
            data_file: paths.data_file,
            data,
            stale,
            last_heartbeat,
        })
    }

    fn print(&self) {
        println!("{}", format!("Namespace: {}", self.namespace).cyan().bold());
        println!("  Lock file: {} ({})", self.lock_file.display(), if self.lock_file_exists { "present" } else { "absent" });
        println!("  Data file: {}", self.data_file.display());

        match &self.data {
            DataFileState::Missing => println!("  Leader: {}", "none (no data file)".yellow()),
            DataFileState::Empty => println!("  Leader: {}", "none (relinquished)".yellow()),
            DataFileState::Invalid { len } => {
                println!("  Leader: {}", format!("unreadable record ({} bytes)", len).red())
            }
            DataFileState::Leader(info) => {
                let status = if self.stale == Some(true) {
                    "stale".red()
                } else {
                    "alive".green()
                };
                println!("  Leader: {} [{}]", info.id(), status);
                println!("  Heartbeat interval: {} ms", info.heartbeat_interval_millis());
                if let Some(at) = &self.last_heartbeat {
                    println!("  Last heartbeat: {}", at);
                }
            }
        }
    }
}

pub fn inspect(root: &Path, extension: &str, multiplier: i64, namespace: &str, json: bool) -> Result<()> {
    let report = NamespaceReport::collect(root, extension, multiplier, namespace)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }
    Ok(())
}

pub fn init_config(file: &Path, force: bool) -> Result<()> {
    if file.exists() && !force {
        return Err(CliError::InvalidInput(format!(
            "{} already exists, use --force to overwrite",
            file.display()
        )));
    }
    ClusterServiceConfig::default().to_file(file)?;
    println!("{} {}", "✓".green(), format!("Wrote default configuration to {}", file.display()));
    Ok(())
}

/// Resolve the configuration for `run`: file, then environment, then flags
pub fn load_config(config: Option<&Path>, root: Option<PathBuf>) -> Result<ClusterServiceConfig> {
    let mut config = ClusterServiceConfig::load(config)
        .map_err(|e| CliError::ConfigError(e.to_string()))?;
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

pub async fn run(config: Option<PathBuf>, root: Option<PathBuf>, namespaces: Vec<String>) -> Result<()> {
    let config = load_config(config.as_deref(), root)?;
    let service = FileLockClusterService::new(config)?;

    for namespace in &namespaces {
        let view = service.view(namespace)?;
        let mut events = view.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed leadership events")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    service.start().await?;
    println!(
        "{} node {} joined {} (Ctrl-C to leave)",
        "▶".cyan(),
        service.node_id(),
        namespaces.join(", ")
    );

    tokio::signal::ctrl_c().await?;
    println!("{}", "Relinquishing leadership and stopping...".yellow());
    service.stop().await?;
    Ok(())
}

fn print_event(event: &LeadershipEvent) {
    match event {
        LeadershipEvent::Gained { namespace, node_id } => {
            println!("{} {} now leads {}", "✓".green(), node_id, namespace.bold())
        }
        LeadershipEvent::Lost { namespace, node_id } => {
            println!("{} {} no longer leads {}", "✗".red(), node_id, namespace.bold())
        }
    }
}
