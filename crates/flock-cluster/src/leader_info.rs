//! Leader record stored in the namespace data file
//!
//! The record has a fixed 52-byte layout:
//!
//! | offset | size | field                                         |
//! |--------|------|-----------------------------------------------|
//! | 0      | 36   | leader id, lowercase hyphenated UUID (ASCII)  |
//! | 36     | 8    | heartbeat interval in millis, big-endian i64  |
//! | 44     | 8    | heartbeat timestamp in epoch millis, BE i64   |
//!
//! A zero-length file is the "no leader" sentinel written on graceful
//! relinquish. Anything that does not decode (torn write, truncation, garbage)
//! reads as "no recorded leader" instead of an error.

use crate::heartbeat;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use uuid::Uuid;

const ID_LEN: usize = 36;
const INTERVAL_OFFSET: usize = ID_LEN;
const TIMESTAMP_OFFSET: usize = INTERVAL_OFFSET + 8;

/// Encoded size of a [`LeaderInfo`]
pub const ENCODED_LEN: usize = TIMESTAMP_OFFSET + 8;

/// The leader recorded in a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    id: NodeId,
    heartbeat_interval_millis: i64,
    heartbeat_timestamp_millis: i64,
}

impl LeaderInfo {
    pub fn new(id: NodeId, heartbeat_interval_millis: i64, heartbeat_timestamp_millis: i64) -> Self {
        Self {
            id,
            heartbeat_interval_millis,
            heartbeat_timestamp_millis,
        }
    }

    /// Record for `id` with a heartbeat taken now
    pub fn heartbeat_now(id: NodeId, heartbeat_interval_millis: i64) -> Self {
        Self::new(id, heartbeat_interval_millis, heartbeat::current_time_millis())
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn heartbeat_interval_millis(&self) -> i64 {
        self.heartbeat_interval_millis
    }

    pub fn heartbeat_timestamp_millis(&self) -> i64 {
        self.heartbeat_timestamp_millis
    }

    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut buf = [0u8; ENCODED_LEN];
        buf[..ID_LEN].copy_from_slice(self.id.to_string().as_bytes());
        buf[INTERVAL_OFFSET..TIMESTAMP_OFFSET]
            .copy_from_slice(&self.heartbeat_interval_millis.to_be_bytes());
        buf[TIMESTAMP_OFFSET..].copy_from_slice(&self.heartbeat_timestamp_millis.to_be_bytes());
        buf
    }

    /// Decode a record, or `None` if the bytes are not exactly one valid record.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ENCODED_LEN {
            return None;
        }
        let id = std::str::from_utf8(&bytes[..ID_LEN]).ok()?;
        let uuid = Uuid::parse_str(id).ok()?;
        if uuid.is_nil() {
            return None;
        }
        let interval = i64::from_be_bytes(bytes[INTERVAL_OFFSET..TIMESTAMP_OFFSET].try_into().ok()?);
        let timestamp = i64::from_be_bytes(bytes[TIMESTAMP_OFFSET..].try_into().ok()?);
        if interval <= 0 {
            return None;
        }
        Some(Self::new(NodeId::from_uuid(uuid), interval, timestamp))
    }
}

/// What a data file currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DataFileState {
    /// No data file at all
    Missing,
    /// Zero-length sentinel: leadership was relinquished
    Empty,
    /// Content that is not a valid record (torn or corrupted)
    Invalid { len: u64 },
    /// A decodable leader record
    Leader(LeaderInfo),
}

impl DataFileState {
    pub fn leader(&self) -> Option<&LeaderInfo> {
        match self {
            Self::Leader(info) => Some(info),
            _ => None,
        }
    }
}

/// Inspect the data file without interpreting it as an election decision.
pub fn inspect(path: &Path) -> io::Result<DataFileState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DataFileState::Missing),
        Err(e) => return Err(e),
    };
    if bytes.is_empty() {
        return Ok(DataFileState::Empty);
    }
    Ok(match LeaderInfo::decode(&bytes) {
        Some(info) => DataFileState::Leader(info),
        None => DataFileState::Invalid {
            len: bytes.len() as u64,
        },
    })
}

/// Read the recorded leader. Missing, empty and undecodable files are `None`.
pub fn read(path: &Path) -> io::Result<Option<LeaderInfo>> {
    let state = inspect(path)?;
    if let DataFileState::Invalid { len } = state {
        tracing::debug!(path = %path.display(), len, "Ignoring undecodable leader record");
    }
    Ok(state.leader().copied())
}

/// Overwrite the data file with `info`.
///
/// Callers must hold the namespace lock: only the lock holder writes.
pub fn write(path: &Path, info: &LeaderInfo, sync: bool) -> io::Result<()> {
    write_bytes(path, &info.encode(), sync)
}

/// Truncate the data file to the zero-length "no leader" sentinel.
pub fn write_empty(path: &Path, sync: bool) -> io::Result<()> {
    write_bytes(path, &[], sync)
}

fn write_bytes(path: &Path, bytes: &[u8], sync: bool) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}
