//! Append-only JSONL snapshot store.
//!
//! One JSON object per line. Appends are mutex-guarded and synced to
//! disk before returning; reads scan the file and tolerate corrupt
//! lines (skipped with a warning) so one bad write never takes down
//! the read path.

use crate::{GoalSnapshot, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Contract with the persistent append-only store: insert one row,
/// and query rows by scope newest-first.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn append(&self, snapshot: &GoalSnapshot) -> Result<(), StoreError>;

    /// The snapshot with the greatest `computed_at` for `scope`, if any.
    async fn latest(&self, scope: &str) -> Result<Option<GoalSnapshot>, StoreError>;
}

pub struct JsonlSnapshotStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSnapshotStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All parseable snapshots for `scope`, in file (append) order.
    pub fn scan(&self, scope: &str) -> Result<Vec<GoalSnapshot>, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut out = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<GoalSnapshot>(trimmed) {
                Ok(snapshot) if snapshot.scope == scope => out.push(snapshot),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping unparseable snapshot line"
                    );
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SnapshotStore for JsonlSnapshotStore {
    async fn append(&self, snapshot: &GoalSnapshot) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(snapshot)?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    async fn latest(&self, scope: &str) -> Result<Option<GoalSnapshot>, StoreError> {
        let snapshots = self.scan(scope)?;
        Ok(snapshots
            .into_iter()
            .max_by_key(|s| s.computed_at))
    }
}
