//! Snapshot persistence.
//!
//! Every flow writes exactly one snapshot file:
//!
//! ```text
//! {output_dir}/
//! ├── schools.json          # merged basic + detail + enhanced
//! ├── majors.json
//! ├── scores.json           # per-school score lines
//! ├── school_scores.json    # per-province minimum scores
//! └── plans.json            # admission plans
//! ```
//!
//! Each file is a `{update_time, count, data}` envelope. Readers also
//! accept a bare list of records, which older exports used.

pub mod local;

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::{EntityId, Record};

pub use local::LocalStorage;

/// `update_time` layout (local time, second precision).
pub const UPDATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The on-disk envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    #[serde(default)]
    pub update_time: String,
    #[serde(default)]
    pub count: usize,
    pub data: Vec<T>,
}

impl<T> Snapshot<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            update_time: Local::now().format(UPDATE_TIME_FORMAT).to_string(),
            count: data.len(),
            data,
        }
    }
}

/// Any accepted snapshot file layout. Elements are read loosely so one
/// malformed entry does not make the whole file unreadable.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Envelope {
        #[serde(default)]
        update_time: String,
        data: Vec<Value>,
    },
    Bare(Vec<Value>),
}

/// Keep the object elements of `data` as records.
fn records(data: Vec<Value>) -> Vec<Record> {
    let total = data.len();
    let records: Vec<Record> = data
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();
    if records.len() < total {
        log::warn!(
            "Skipped {} snapshot entries that are not records",
            total - records.len()
        );
    }
    records
}

impl From<SnapshotFile> for Snapshot<Record> {
    fn from(file: SnapshotFile) -> Self {
        let (update_time, data) = match file {
            SnapshotFile::Envelope { update_time, data } => (update_time, records(data)),
            SnapshotFile::Bare(data) => (String::new(), records(data)),
        };
        Snapshot {
            update_time,
            count: data.len(),
            data,
        }
    }
}

/// Parse snapshot bytes in either accepted layout.
pub fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot<Record>> {
    let file: SnapshotFile = serde_json::from_slice(bytes)?;
    Ok(file.into())
}

/// Metadata about a snapshot write.
#[derive(Debug, Clone)]
pub struct WriteMetadata {
    /// Snapshot file name relative to the storage root
    pub key: String,
    pub count: usize,
    pub bytes: usize,
}

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Replace snapshot `key` with `records`. The write is atomic: readers
    /// see either the old file or the new one.
    async fn write_snapshot(&self, key: &str, records: &[Record]) -> Result<WriteMetadata>;

    /// Read snapshot `key`; `None` when it does not exist.
    async fn read_snapshot(&self, key: &str) -> Result<Option<Snapshot<Record>>>;

    /// Entity ids of the records in snapshot `key`, in file order.
    ///
    /// Records without an id are skipped; `sample` caps how many records
    /// are looked at. `None` when the snapshot does not exist.
    async fn entity_ids(
        &self,
        key: &str,
        id_field: &str,
        sample: Option<usize>,
    ) -> Result<Option<Vec<EntityId>>> {
        let Some(snapshot) = self.read_snapshot(key).await? else {
            return Ok(None);
        };
        let limit = sample.unwrap_or(usize::MAX);
        let ids = snapshot
            .data
            .iter()
            .take(limit)
            .filter_map(|record| record.id(id_field))
            .collect();
        Ok(Some(ids))
    }
}
