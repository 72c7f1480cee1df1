// src/core/snapshot_store.rs

//! Point-in-time directory snapshots addressed by string ids.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::config::validation::is_plain_component;
use crate::config::SnapshotConfig;
use crate::core::fs_tree;
use crate::core::snapshot::{timestamp_id, SnapshotRecord};
use crate::error::{OtaError, Result};

/// File the persisted index is written to, inside the backup root.
pub const INDEX_FILE_NAME: &str = "snapshot_index.json";

const STAGING_PREFIX: &str = ".staging-";

/// Capture and restore of directory trees.
///
/// Implementations own their index exclusively. They are not synchronized:
/// a store must only be driven from one thread at a time.
pub trait SnapshotStore {
    /// Copies `source_dir` into the store under `id` (generated if `None`)
    /// and returns the id. An existing snapshot with the same id is replaced.
    /// A copy that fails part-way is never registered.
    fn create_snapshot(&mut self, source_dir: &Path, id: Option<&str>) -> Result<String>;

    /// Replaces the contents of `target_dir` with the snapshot `id`.
    fn try_restore_snapshot(&self, id: &str, target_dir: &Path) -> Result<()>;

    /// Ids in insertion order.
    fn list_snapshots(&self) -> Vec<String>;

    /// Removes a snapshot. `Ok(false)` if the id is unknown.
    fn delete_snapshot(&mut self, id: &str) -> Result<bool>;

    /// Looks up a record.
    fn get(&self, id: &str) -> Option<&SnapshotRecord>;

    /// Whether `id` holds a snapshot, registered or not. Stores that can
    /// find storage left by an earlier process should say so here.
    fn has_snapshot(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Restores `id` into `target_dir`, logging instead of failing.
    fn restore_snapshot(&self, id: &str, target_dir: &Path) -> bool {
        match self.try_restore_snapshot(id, target_dir) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Restore of snapshot '{}' into {} failed: {}", id, target_dir.display(), e);
                false
            }
        }
    }

    /// Keeps the `keep_count` greatest ids (reverse lexicographic order) and
    /// deletes the rest, returning the deleted ids.
    ///
    /// Greatest means newest only for timestamp-derived ids; caller-chosen
    /// ids are pruned by name.
    fn prune(&mut self, keep_count: usize) -> Result<Vec<String>> {
        let mut ids = self.list_snapshots();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        let doomed: Vec<String> = ids.into_iter().skip(keep_count).collect();
        for id in &doomed {
            self.delete_snapshot(id)?;
        }
        if !doomed.is_empty() {
            log::info!("Pruned {} snapshot(s), kept {}", doomed.len(), keep_count);
        }
        Ok(doomed)
    }
}

/// Snapshot store backed by full directory copies under a backup root.
///
/// Layout: `<backup_root>/<id>/...` for each snapshot, plus
/// `<backup_root>/snapshot_index.json` when the index is persisted.
#[derive(Debug)]
pub struct DirectorySnapshotStore {
    config: SnapshotConfig,
    records: Vec<SnapshotRecord>,
}

impl DirectorySnapshotStore {
    /// Opens a store, creating the backup root and loading a persisted index
    /// if one is configured and present.
    pub fn open(config: SnapshotConfig) -> Result<Self> {
        fs::create_dir_all(&config.backup_root)
            .map_err(|e| OtaError::file_io(&config.backup_root, e))?;

        let mut store = Self {
            config,
            records: Vec::new(),
        };
        if store.config.persist_index {
            store.load_index()?;
        }
        store.sweep_staging();
        Ok(store)
    }

    /// Opens a non-persistent store rooted at `backup_root`.
    pub fn at(backup_root: impl Into<PathBuf>) -> Result<Self> {
        Self::open(SnapshotConfig {
            backup_root: backup_root.into(),
            ..SnapshotConfig::default()
        })
    }

    /// Directory holding the snapshot copies.
    pub fn backup_root(&self) -> &Path {
        &self.config.backup_root
    }

    /// Prunes down to the configured `keep_count`.
    pub fn apply_retention(&mut self) -> Result<Vec<String>> {
        let keep = self.config.keep_count;
        self.prune(keep)
    }

    fn index_path(&self) -> PathBuf {
        self.config.backup_root.join(INDEX_FILE_NAME)
    }

    fn load_index(&mut self) -> Result<()> {
        let path = self.index_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(OtaError::file_io(path, e)),
        };
        let records: Vec<SnapshotRecord> = serde_json::from_str(&raw)?;
        let loaded = records.len();
        self.records = records
            .into_iter()
            .filter(|record| {
                let present = record.location.is_dir();
                if !present {
                    log::warn!(
                        "Dropping snapshot '{}' from index: {} is missing",
                        record.id,
                        record.location.display()
                    );
                }
                present
            })
            .collect();
        log::debug!("Loaded {} of {} indexed snapshots", self.records.len(), loaded);
        Ok(())
    }

    fn save_index(&self) -> Result<()> {
        if !self.config.persist_index {
            return Ok(());
        }
        let path = self.index_path();
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&self.records)?;
        fs::write(&tmp, body).map_err(|e| OtaError::file_io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| OtaError::file_io(&path, e))
    }

    /// Removes staging directories left behind by an interrupted copy.
    fn sweep_staging(&self) {
        let Ok(entries) = fs::read_dir(&self.config.backup_root) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    log::warn!("Could not remove stale staging dir {}: {}", entry.path().display(), e);
                }
            }
        }
    }

    fn generate_id(&self) -> String {
        let now = Utc::now();
        (0u32..)
            .map(|counter| timestamp_id(now, counter))
            .find(|candidate| self.position(candidate).is_none() && !self.config.backup_root.join(candidate).exists())
            .unwrap_or_else(|| format!("snapshot_{}", Uuid::new_v4().simple()))
    }

    /// Whether the backup root is `dir` or lies below it.
    fn is_inside(&self, dir: &Path) -> bool {
        match (self.config.backup_root.canonicalize(), dir.canonicalize()) {
            (Ok(root), Ok(dir)) => root.starts_with(dir),
            _ => false,
        }
    }

    fn staging_path(&self) -> PathBuf {
        self.config
            .backup_root
            .join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple()))
    }

    /// Renames a finished copy to `location`. An existing copy there is first
    /// moved aside and only removed once the new one is in place; if the
    /// final rename fails it is moved back.
    fn move_into_place(&self, staging: &Path, location: &Path) -> Result<()> {
        let displaced = if fs::symlink_metadata(location).is_ok() {
            let aside = self.staging_path();
            fs::rename(location, &aside).map_err(|e| OtaError::file_io(location, e))?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = fs::rename(staging, location) {
            if let Some(aside) = &displaced {
                if let Err(back) = fs::rename(aside, location) {
                    log::error!("Could not put back {} after failed replace: {}", location.display(), back);
                }
            }
            return Err(OtaError::file_io(location, e));
        }

        // Leftovers keep the staging prefix and are swept on the next open.
        if let Some(aside) = displaced {
            discard(&aside);
        }
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }
}

impl SnapshotStore for DirectorySnapshotStore {
    fn create_snapshot(&mut self, source_dir: &Path, id: Option<&str>) -> Result<String> {
        let id = match id {
            Some(id) if is_plain_component(id) && !id.starts_with(STAGING_PREFIX) && id != INDEX_FILE_NAME => id.to_string(),
            Some(id) => return Err(OtaError::invalid_input(format!("invalid snapshot id '{}'", id))),
            None => self.generate_id(),
        };

        if !source_dir.is_dir() {
            return Err(OtaError::file_io(
                source_dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source directory does not exist"),
            ));
        }
        if self.is_inside(source_dir) {
            return Err(OtaError::configuration(format!(
                "backup root {} lies inside snapshot source {}",
                self.config.backup_root.display(),
                source_dir.display()
            )));
        }

        let staging = self.staging_path();
        if let Err(e) = fs_tree::copy_tree(source_dir, &staging) {
            discard(&staging);
            return Err(e);
        }

        let location = self.config.backup_root.join(&id);
        if let Err(e) = self.move_into_place(&staging, &location) {
            discard(&staging);
            return Err(e);
        }

        if let Some(idx) = self.position(&id) {
            log::debug!("Replaced existing snapshot '{}'", id);
            self.records.remove(idx);
        }
        self.records.push(SnapshotRecord {
            id: id.clone(),
            location,
            created_at: Utc::now(),
        });
        self.save_index()?;

        log::info!("Created snapshot '{}' of {}", id, source_dir.display());
        Ok(id)
    }

    fn try_restore_snapshot(&self, id: &str, target_dir: &Path) -> Result<()> {
        let record = self
            .get(id)
            .ok_or_else(|| OtaError::SnapshotNotFound(id.to_string()))?;
        if !record.location.is_dir() {
            return Err(OtaError::SnapshotNotFound(format!(
                "{} (backing storage {} is missing)",
                id,
                record.location.display()
            )));
        }

        // Fail before touching the target if the snapshot cannot be read.
        fs_tree::check_readable(&record.location)?;

        if target_dir.exists() {
            fs_tree::clear_dir(target_dir)?;
        }
        fs_tree::copy_tree(&record.location, target_dir)?;

        log::info!("Restored snapshot '{}' into {}", id, target_dir.display());
        Ok(())
    }

    fn list_snapshots(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    fn delete_snapshot(&mut self, id: &str) -> Result<bool> {
        let Some(idx) = self.position(id) else {
            return Ok(false);
        };
        fs_tree::remove_path(&self.records[idx].location)?;
        self.records.remove(idx);
        self.save_index()?;
        log::debug!("Deleted snapshot '{}'", id);
        Ok(true)
    }

    fn get(&self, id: &str) -> Option<&SnapshotRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn has_snapshot(&self, id: &str) -> bool {
        self.get(id).is_some()
            || (is_plain_component(id) && fs::symlink_metadata(self.config.backup_root.join(id)).is_ok())
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs_tree::remove_path(path) {
        log::warn!("Could not remove {}: {}", path.display(), e);
    }
}
