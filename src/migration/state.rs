//! Migration state machine.
//!
//! The authoritative migration lifecycle lives in three persisted flags
//! (see [`MigrationFlags`]); the phase is a pure function of those fields,
//! computed on read so it can never drift from what is stored. The four
//! transitions validate their guards before touching the store and emit one
//! audit record per changed field. Multi-field transitions compensate on
//! partial failure so a guard-passing call either fully applies or leaves
//! the store as it found it; `rollback` is the exception and is best-effort
//! by design.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, warn};

use super::audit::AuditLog;
use super::flags::{FlagStore, MigrationFlags};

/// Coarse lifecycle stage of the migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    NotStarted,
    Ready,
    InProgress,
    ReadyForCompletion,
    Completed,
}

impl MigrationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::NotStarted => "not_started",
            MigrationPhase::Ready => "ready",
            MigrationPhase::InProgress => "in_progress",
            MigrationPhase::ReadyForCompletion => "ready_for_completion",
            MigrationPhase::Completed => "completed",
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase derived from the stored flags.
///
/// The table is total: transient flag combinations (for example both flags
/// true after a crash mid-`complete`) still map to exactly one phase.
pub fn phase_of(flags: MigrationFlags) -> MigrationPhase {
    if flags.migration_mode {
        match flags.traffic_percentage {
            0 => MigrationPhase::Ready,
            100.. => MigrationPhase::ReadyForCompletion,
            _ => MigrationPhase::InProgress,
        }
    } else if flags.new_provider {
        MigrationPhase::Completed
    } else {
        MigrationPhase::NotStarted
    }
}

/// Current migration state, derived from the flag store on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub phase: MigrationPhase,
    pub traffic_percentage: u8,
    pub legacy_enabled: bool,
    pub new_provider_enabled: bool,
}

impl MigrationStatus {
    fn from_flags(flags: MigrationFlags) -> Self {
        Self {
            phase: phase_of(flags),
            traffic_percentage: flags.traffic_percentage.min(100),
            legacy_enabled: !flags.new_provider,
            new_provider_enabled: flags.new_provider,
        }
    }

    /// Share of traffic the router should send to the new provider.
    ///
    /// Outside a migration the stored percentage is stale; only the phase
    /// decides: completed means everything, not-started means nothing.
    pub fn effective_percentage(&self) -> u8 {
        match self.phase {
            MigrationPhase::NotStarted => 0,
            MigrationPhase::Completed => 100,
            _ => self.traffic_percentage,
        }
    }

    pub fn can_start(&self) -> bool {
        self.phase == MigrationPhase::NotStarted
    }

    /// Whether `set_traffic_percentage` is currently legal.
    pub fn can_increase(&self) -> bool {
        matches!(
            self.phase,
            MigrationPhase::Ready | MigrationPhase::InProgress | MigrationPhase::ReadyForCompletion
        )
    }

    pub fn can_complete(&self) -> bool {
        self.phase == MigrationPhase::ReadyForCompletion
    }

    pub fn can_rollback(&self) -> bool {
        self.phase != MigrationPhase::NotStarted
    }
}

/// Rejected or failed transition.
///
/// Guard violations are operator mistakes: they carry a descriptive reason
/// and guarantee the store was not touched. `Store` wraps an underlying
/// persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("migration already started (phase: {phase})")]
    AlreadyStarted { phase: MigrationPhase },
    #[error("no migration in progress")]
    NotInMigration,
    #[error("traffic percentage must be between 0 and 100 (got {0})")]
    InvalidPercentage(i64),
    #[error("cannot complete migration at {percentage}% traffic; ramp to 100% first")]
    NotReadyForCompletion { percentage: u8 },
    #[error("migration already fully rolled back")]
    AlreadyRolledBack,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl TransitionError {
    /// True for guard violations, false for persistence failures.
    pub fn is_guard_violation(&self) -> bool {
        !matches!(self, TransitionError::Store(_))
    }
}

/// Serializes migration transitions over a pluggable flag store.
///
/// Status reads go straight to the store; transitions take an internal lock
/// so concurrent operator actions cannot interleave their read-then-write
/// sequences.
pub struct MigrationStateMachine {
    store: Arc<dyn FlagStore>,
    audit: AuditLog,
    transitions: Mutex<()>,
}

impl MigrationStateMachine {
    pub fn new(store: Arc<dyn FlagStore>, audit: AuditLog) -> Self {
        Self {
            store,
            audit,
            transitions: Mutex::new(()),
        }
    }

    /// Audit log fed by this machine's transitions.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Current status, derived from the stored flags.
    ///
    /// # Errors
    ///
    /// Returns a `Store` error when the flag store is unreadable.
    pub async fn status(&self) -> Result<MigrationStatus, TransitionError> {
        let flags = self.store.load().await?;
        Ok(MigrationStatus::from_flags(flags))
    }

    /// `NotStarted -> Ready|InProgress|ReadyForCompletion`: begin migrating.
    ///
    /// Turns migration mode on and sets the initial percentage as one
    /// logical transaction: if the percentage write fails, the mode flag is
    /// reverted before the error propagates.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` when migration mode or the new-provider flag is
    /// already set; `InvalidPercentage` when out of range; `Store` on
    /// persistence failure.
    pub async fn start(
        &self,
        initial_percentage: u8,
        reason: &str,
    ) -> Result<MigrationStatus, TransitionError> {
        if initial_percentage > 100 {
            return Err(TransitionError::InvalidPercentage(i64::from(
                initial_percentage,
            )));
        }
        let _guard = self.transitions.lock().await;

        let flags = self.store.load().await?;
        if flags.migration_mode || flags.new_provider {
            return Err(TransitionError::AlreadyStarted {
                phase: phase_of(flags),
            });
        }

        self.store.set_migration_mode(true).await?;
        self.audit.record("migration_mode", false, true, reason);

        if let Err(err) = self.store.set_traffic_percentage(initial_percentage).await {
            // Undo the half-applied transition before surfacing the failure.
            match self.store.set_migration_mode(false).await {
                Ok(()) => {
                    self.audit
                        .record("migration_mode", true, false, "revert: start failed");
                },
                Err(revert_err) => {
                    error!(
                        error = %revert_err,
                        "failed to revert migration mode after aborted start"
                    );
                },
            }
            return Err(err.into());
        }
        self.audit.record(
            "traffic_percentage",
            flags.traffic_percentage,
            initial_percentage,
            reason,
        );

        self.status().await
    }

    /// `Ready|InProgress|ReadyForCompletion`: move the traffic percentage.
    ///
    /// # Errors
    ///
    /// `NotInMigration` when migration mode is off; `InvalidPercentage`
    /// when out of range; `Store` on persistence failure.
    pub async fn set_traffic_percentage(
        &self,
        percentage: u8,
        reason: &str,
    ) -> Result<MigrationStatus, TransitionError> {
        if percentage > 100 {
            return Err(TransitionError::InvalidPercentage(i64::from(percentage)));
        }
        let _guard = self.transitions.lock().await;

        let flags = self.store.load().await?;
        if !flags.migration_mode {
            return Err(TransitionError::NotInMigration);
        }

        self.store.set_traffic_percentage(percentage).await?;
        self.audit.record(
            "traffic_percentage",
            flags.traffic_percentage,
            percentage,
            reason,
        );

        self.status().await
    }

    /// `ReadyForCompletion -> Completed`: make the new provider authoritative.
    ///
    /// The new-provider flag is raised before migration mode is lowered so
    /// no window exists where neither flag claims the new provider; if the
    /// second write fails the first is reverted.
    ///
    /// # Errors
    ///
    /// `NotInMigration` when migration mode is off; `NotReadyForCompletion`
    /// below 100% traffic; `Store` on persistence failure.
    pub async fn complete(&self, reason: &str) -> Result<MigrationStatus, TransitionError> {
        let _guard = self.transitions.lock().await;

        let flags = self.store.load().await?;
        if !flags.migration_mode {
            return Err(TransitionError::NotInMigration);
        }
        if flags.traffic_percentage < 100 {
            return Err(TransitionError::NotReadyForCompletion {
                percentage: flags.traffic_percentage,
            });
        }

        self.store.set_new_provider(true).await?;
        self.audit.record("new_provider", false, true, reason);

        if let Err(err) = self.store.set_migration_mode(false).await {
            match self.store.set_new_provider(false).await {
                Ok(()) => {
                    self.audit
                        .record("new_provider", true, false, "revert: complete failed");
                },
                Err(revert_err) => {
                    error!(
                        error = %revert_err,
                        "failed to revert new-provider flag after aborted completion"
                    );
                },
            }
            return Err(err.into());
        }
        self.audit.record("migration_mode", true, false, reason);

        self.status().await
    }

    /// `any -> NotStarted`: revert everything to the all-legacy state.
    ///
    /// Best-effort: each sub-step failure is logged and the remaining steps
    /// still run, so the store always moves as far toward all-legacy as it
    /// can.
    ///
    /// # Errors
    ///
    /// `AlreadyRolledBack` when there is nothing to roll back; `Store` only
    /// when the final status read fails.
    pub async fn rollback(&self, reason: &str) -> Result<MigrationStatus, TransitionError> {
        let _guard = self.transitions.lock().await;

        let flags = self.store.load().await?;
        if !flags.migration_mode && !flags.new_provider {
            return Err(TransitionError::AlreadyRolledBack);
        }

        warn!(reason, phase = %phase_of(flags), "rolling back migration");

        match self.store.set_new_provider(false).await {
            Ok(()) if flags.new_provider => {
                self.audit.record("new_provider", true, false, reason);
            },
            Ok(()) => {},
            Err(err) => warn!(error = %err, "rollback: failed to clear new-provider flag"),
        }
        match self.store.set_migration_mode(false).await {
            Ok(()) if flags.migration_mode => {
                self.audit.record("migration_mode", true, false, reason);
            },
            Ok(()) => {},
            Err(err) => warn!(error = %err, "rollback: failed to clear migration mode"),
        }
        match self.store.set_traffic_percentage(0).await {
            Ok(()) if flags.traffic_percentage != 0 => {
                self.audit
                    .record("traffic_percentage", flags.traffic_percentage, 0, reason);
            },
            Ok(()) => {},
            Err(err) => warn!(error = %err, "rollback: failed to reset traffic percentage"),
        }

        self.status().await
    }
}
