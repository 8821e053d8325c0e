//! Durable state snapshots.
//!
//! A snapshot is a single JSON object:
//! `{"wal_offset":…,"docs":[…],"total_cnt":{…}}`. Recent counts are
//! deliberately absent: the WAL retained by rotation suffices to rebuild
//! them. `docs` is sorted by id and `total_cnt` is a sorted map, so equal
//! states produce byte-identical snapshots.

use crate::docs::Document;
use crate::error::{EngineError, EngineResult};
use crate::storage::DataDir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

/// File name of the snapshot within the data directory.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// The durable state stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Byte length of the rotated log this snapshot committed. WAL records
    /// below this offset are fully covered by `total_cnt`; records at or
    /// past it postdate the snapshot.
    pub wal_offset: u64,
    /// Catalogued documents, ordered by id.
    pub docs: Vec<Document>,
    /// All-time click counts for clicked ids.
    pub total_cnt: BTreeMap<String, u64>,
}

/// Reads/writes the snapshot file in a data directory.
#[derive(Clone)]
pub struct SnapshotStore {
    dir: Arc<dyn DataDir>,
}

impl SnapshotStore {
    /// Create a snapshot store over a data directory.
    pub fn new(dir: Arc<dyn DataDir>) -> Self {
        Self { dir }
    }

    /// Load the snapshot. Absent file means empty state (`None`); a present
    /// but undecodable snapshot is an error (startup aborts).
    pub fn load(&self) -> EngineResult<Option<Snapshot>> {
        if !self.dir.exists(SNAPSHOT_FILE) {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        self.dir.reader(SNAPSHOT_FILE)?.read_to_end(&mut bytes)?;
        let snap =
            serde_json::from_slice(&bytes).map_err(|e| EngineError::Decode(e.to_string()))?;
        Ok(Some(snap))
    }

    /// Durably replace the snapshot (staged as `snapshot.json.tmp`, fsynced,
    /// renamed over `snapshot.json`).
    pub fn save(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let data =
            serde_json::to_vec(snapshot).map_err(|e| EngineError::Encode(e.to_string()))?;
        self.dir.replace(SNAPSHOT_FILE, &data)
    }
}
