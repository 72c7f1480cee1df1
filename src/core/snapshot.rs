// src/core/snapshot.rs

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of generated snapshot ids.
pub const SNAPSHOT_ID_PREFIX: &str = "snapshot_";

/// Index entry for one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Store-unique identifier
    pub id: String,
    /// Where the copy lives
    pub location: PathBuf,
    /// When the copy was completed
    pub created_at: DateTime<Utc>,
}

/// Second-granularity part of a generated id, e.g. `snapshot_20240101_120000`.
pub fn timestamp_id_base(at: DateTime<Utc>) -> String {
    format!("{}{}", SNAPSHOT_ID_PREFIX, at.format("%Y%m%d_%H%M%S"))
}

/// Generated id with its disambiguating counter, e.g.
/// `snapshot_20240101_120000_0003`. The zero-padded counter keeps
/// lexicographic order equal to creation order within one second.
pub fn timestamp_id(at: DateTime<Utc>, counter: u32) -> String {
    format!("{}_{:04}", timestamp_id_base(at), counter)
}
