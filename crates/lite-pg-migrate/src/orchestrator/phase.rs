//! Migration state machine.
//!
//! ```text
//! Idle -> PreValidating -> PreparingTarget -> Migrating -> PostValidating -> Completed
//!                                                       \----------------/
//! any non-terminal phase -> Failed -> RollingBack -> RolledBack
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MigrateError, Result};

/// Phase of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Idle,
    PreValidating,
    PreparingTarget,
    Migrating,
    PostValidating,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::Idle => "idle",
            MigrationPhase::PreValidating => "pre_validating",
            MigrationPhase::PreparingTarget => "preparing_target",
            MigrationPhase::Migrating => "migrating",
            MigrationPhase::PostValidating => "post_validating",
            MigrationPhase::Completed => "completed",
            MigrationPhase::Failed => "failed",
            MigrationPhase::RollingBack => "rolling_back",
            MigrationPhase::RolledBack => "rolled_back",
        }
    }

    /// `Completed` and `RolledBack` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationPhase::Completed | MigrationPhase::RolledBack)
    }

    pub fn can_transition_to(&self, next: MigrationPhase) -> bool {
        use MigrationPhase::*;
        match (self, next) {
            (Idle, PreValidating)
            | (PreValidating, PreparingTarget)
            | (PreparingTarget, Migrating)
            | (Migrating, PostValidating)
            | (Migrating, Completed)
            | (PostValidating, Completed)
            | (Failed, RollingBack)
            | (RollingBack, RolledBack)
            | (RollingBack, Failed) => true,
            (Idle | PreValidating | PreparingTarget | Migrating | PostValidating, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current phase and when each phase was entered.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: MigrationPhase,
    history: Vec<(MigrationPhase, DateTime<Utc>)>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: MigrationPhase::Idle,
            history: vec![(MigrationPhase::Idle, Utc::now())],
        }
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> MigrationPhase {
        self.current
    }

    pub fn history(&self) -> &[(MigrationPhase, DateTime<Utc>)] {
        &self.history
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: MigrationPhase) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(MigrateError::fatal(
                self.current,
                format!("invalid phase transition {} -> {}", self.current, next),
            ));
        }
        info!("Phase: {} -> {}", self.current, next);
        self.current = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MigrationPhase::*;

    #[test]
    fn test_happy_path() {
        let mut tracker = PhaseTracker::new();
        for phase in [PreValidating, PreparingTarget, Migrating, PostValidating, Completed] {
            tracker.transition(phase).unwrap();
        }
        assert!(tracker.current().is_terminal());
        assert_eq!(tracker.history().len(), 6);
        assert!(tracker.transition(Failed).is_err());
    }

    #[test]
    fn test_post_validation_is_optional() {
        assert!(Migrating.can_transition_to(Completed));
        assert!(!PreparingTarget.can_transition_to(Completed));
        assert!(!Idle.can_transition_to(Migrating));
    }

    #[test]
    fn test_rollback_only_from_failed() {
        assert!(!Migrating.can_transition_to(RollingBack));
        assert!(Migrating.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(RolledBack));
        assert!(RolledBack.is_terminal());
        assert!(!RolledBack.can_transition_to(Failed));
        assert!(!Failed.is_terminal());
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&PreparingTarget).unwrap(),
            "\"preparing_target\""
        );
        assert_eq!(RolledBack.to_string(), "rolled_back");
    }
}
