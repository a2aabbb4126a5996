//! Checkpoint storage trait.
//!
//! The orchestrator works with `Arc<dyn CheckpointStore>` without knowing where
//! checkpoints live. [`FileCheckpointStore`](super::FileCheckpointStore) is the
//! only implementation.

use super::{CheckpointLock, MigrationCheckpoint};
use crate::error::Result;

/// Persistence for migration checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Sign and persist a checkpoint atomically, replacing any earlier version.
    fn save(&self, checkpoint: &mut MigrationCheckpoint) -> Result<()>;

    /// Load a checkpoint by id.
    ///
    /// A missing checkpoint means "start fresh" and yields `Ok(None)`.
    fn load(&self, migration_id: &str) -> Result<Option<MigrationCheckpoint>>;

    /// Delete a checkpoint. Deleting a missing checkpoint is not an error.
    fn delete(&self, migration_id: &str) -> Result<()>;

    /// Most recent checkpoint, if any.
    fn latest(&self) -> Result<Option<MigrationCheckpoint>>;

    /// Most recent checkpoint written for the endpoints hashed as `config_hash`.
    fn latest_for(&self, config_hash: &str) -> Result<Option<MigrationCheckpoint>>;

    /// Take the exclusive run lock for a migration id.
    fn lock(&self, migration_id: &str) -> Result<CheckpointLock>;

    /// Backend type name for logging.
    fn backend_type(&self) -> &'static str;
}
