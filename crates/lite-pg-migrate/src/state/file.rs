//! JSON file checkpoint store.
//!
//! ```text
//! <checkpoint_dir>/
//! ├─ migration_checkpoint_<id>.json       # signed checkpoint
//! └─ migration_checkpoint_<id>.json.lock  # advisory run lock
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use super::{CheckpointStore, MigrationCheckpoint};
use crate::error::{MigrateError, Result};

const FILE_PREFIX: &str = "migration_checkpoint_";
const FILE_SUFFIX: &str = ".json";

/// Stores each checkpoint as one JSON file in a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic checkpoint path for a migration id.
    pub fn checkpoint_path(&self, migration_id: &str) -> Result<PathBuf> {
        validate_id(migration_id)?;
        Ok(self
            .dir
            .join(format!("{}{}{}", FILE_PREFIX, migration_id, FILE_SUFFIX)))
    }

    fn lock_path(&self, migration_id: &str) -> Result<PathBuf> {
        let mut path = self.checkpoint_path(migration_id)?.into_os_string();
        path.push(".lock");
        Ok(PathBuf::from(path))
    }

    /// Ids of every checkpoint in the directory, oldest first.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            {
                if validate_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Ids become file names, so only a safe character set is allowed.
fn validate_id(migration_id: &str) -> Result<()> {
    let valid = !migration_id.is_empty()
        && migration_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(MigrateError::State(format!(
            "invalid migration id '{}': use letters, digits, '_' and '-'",
            migration_id
        )));
    }
    Ok(())
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &mut MigrationCheckpoint) -> Result<()> {
        let path = self.checkpoint_path(&checkpoint.migration_id)?;
        std::fs::create_dir_all(&self.dir)?;

        checkpoint.sign()?;
        let content = serde_json::to_string_pretty(checkpoint)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &path)?;

        debug!(
            "Saved checkpoint {} ({} tables)",
            checkpoint.migration_id,
            checkpoint.tables_migrated.len()
        );
        Ok(())
    }

    fn load(&self, migration_id: &str) -> Result<Option<MigrationCheckpoint>> {
        let path = self.checkpoint_path(migration_id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: MigrationCheckpoint = serde_json::from_str(&content).map_err(|e| {
            MigrateError::State(format!("checkpoint {} is corrupt: {}", path.display(), e))
        })?;
        if checkpoint.migration_id != migration_id {
            return Err(MigrateError::State(format!(
                "checkpoint {} belongs to migration {}",
                path.display(),
                checkpoint.migration_id
            )));
        }
        checkpoint.verify_signature()?;
        Ok(Some(checkpoint))
    }

    fn delete(&self, migration_id: &str) -> Result<()> {
        let path = self.checkpoint_path(migration_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted checkpoint {}", migration_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn latest(&self) -> Result<Option<MigrationCheckpoint>> {
        // Ids embed the start time, so the lexically greatest is the newest.
        match self.list_ids()?.last() {
            Some(id) => self.load(id),
            None => Ok(None),
        }
    }

    fn latest_for(&self, config_hash: &str) -> Result<Option<MigrationCheckpoint>> {
        for id in self.list_ids()?.iter().rev() {
            if let Some(checkpoint) = self.load(id)? {
                if checkpoint.config_hash == config_hash {
                    return Ok(Some(checkpoint));
                }
            }
        }
        Ok(None)
    }

    fn lock(&self, migration_id: &str) -> Result<CheckpointLock> {
        std::fs::create_dir_all(&self.dir)?;
        CheckpointLock::acquire(self.lock_path(migration_id)?, migration_id)
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

/// Exclusive advisory lock held for the duration of a run.
///
/// The lock file is removed and released on drop.
#[derive(Debug)]
pub struct CheckpointLock {
    path: PathBuf,
    file: File,
}

impl CheckpointLock {
    fn acquire(path: PathBuf, migration_id: &str) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Non-blocking: a concurrent run fails fast
        if file.try_lock_exclusive().is_err() {
            return Err(MigrateError::Locked(migration_id.to_string()));
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock so no other run can be holding it
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
        let _ = FileExt::unlock(&self.file);
    }
}
