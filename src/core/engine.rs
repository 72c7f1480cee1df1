// src/core/engine.rs

//! The transactional update engine.
//!
//! One call to [`UpdateEngine::apply_update`] is one transaction:
//!
//! ```text
//! Idle -> BackupCreated -> Verified -> StepsApplied(k of N) -> Committed
//!                 \              \              \
//!                  +--------------+--------------+--> RolledBack
//! ```
//!
//! Every phase returns a `Result`; any `Err` after the backup exists is
//! routed to a restore of that backup. Nothing escapes `apply_update`.
//!
//! # Concurrency
//!
//! An engine reuses one backup slot for every transaction, so it is not
//! reentrant. `apply_update` takes `&mut self`, which rules out overlapping
//! transactions on one instance; callers running several engines must still
//! serialize transactions per target directory themselves.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use strum::Display;

use crate::config::validation::is_plain_component;
use crate::config::{Config, DEFAULT_BACKUP_SLOT};
use crate::core::hash::Hasher;
use crate::core::package::PackageDescriptor;
use crate::core::snapshot_store::{DirectorySnapshotStore, SnapshotStore};
use crate::core::step::{StepContext, UpdateStep};
use crate::core::verifier::Verifier;
use crate::error::{OtaError, Result};

/// Final state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TransactionOutcome {
    /// Still running
    Pending,
    /// All steps succeeded and the backup was released
    Committed,
    /// A failure occurred and the backup was restored
    RolledBack,
    /// Either no backup could be taken (target untouched) or restoring it
    /// failed (target state unknown); the report's failure tells which
    FailedNoRollback,
}

/// How far a transaction got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    /// Nothing done yet
    Idle,
    /// Target captured into the backup slot
    BackupCreated,
    /// Every package file (and the signature, if required) checked out
    Verified,
    /// `applied` of `total` steps succeeded
    StepsApplied {
        /// Steps completed
        applied: usize,
        /// Steps registered
        total: usize,
    },
    /// Backup released after success
    Committed,
    /// Backup restored after failure
    RolledBack,
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::BackupCreated => write!(f, "backup-created"),
            Self::Verified => write!(f, "verified"),
            Self::StepsApplied { applied, total } => write!(f, "steps-applied({} of {})", applied, total),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// Result of one transaction.
#[derive(Debug)]
pub struct UpdateReport {
    /// Package that was applied
    pub package_id: String,
    /// Final state
    pub outcome: TransactionOutcome,
    /// Last phase reached before the outcome was decided
    pub phase: TransactionPhase,
    /// Steps that completed successfully
    pub steps_applied: usize,
    /// Steps registered on the engine
    pub steps_total: usize,
    /// Why the transaction did not commit
    pub failure: Option<OtaError>,
}

impl UpdateReport {
    /// Whether the update committed.
    pub fn is_success(&self) -> bool {
        self.outcome == TransactionOutcome::Committed
    }

    /// Whether the target may be in neither the old nor the new state, or an
    /// earlier transaction left its backup behind in the slot.
    ///
    /// Callers should stop further updates and alert an operator rather than
    /// retry.
    pub fn needs_escalation(&self) -> bool {
        matches!(self.failure, Some(OtaError::RollbackFailure(_)))
    }
}

/// Engine-internal state of the running transaction.
struct UpdateTransaction<'a> {
    target_dir: &'a Path,
    backup_id: &'a str,
    outcome: TransactionOutcome,
    phase: TransactionPhase,
    steps_applied: usize,
}

impl<'a> UpdateTransaction<'a> {
    fn new(target_dir: &'a Path, backup_id: &'a str) -> Self {
        Self {
            target_dir,
            backup_id,
            outcome: TransactionOutcome::Pending,
            phase: TransactionPhase::Idle,
            steps_applied: 0,
        }
    }

    fn advance(&mut self, phase: TransactionPhase) {
        log::debug!("Transaction on {}: {} -> {}", self.target_dir.display(), self.phase, phase);
        self.phase = phase;
    }

    fn into_report(self, package: &PackageDescriptor, steps_total: usize, failure: Option<OtaError>) -> UpdateReport {
        UpdateReport {
            package_id: package.package_id().to_string(),
            outcome: self.outcome,
            phase: self.phase,
            steps_applied: self.steps_applied,
            steps_total,
            failure,
        }
    }
}

/// Applies update packages to a target directory with backup and rollback.
pub struct UpdateEngine<S: SnapshotStore = DirectorySnapshotStore> {
    verifier: Verifier,
    store: S,
    steps: Vec<Box<dyn UpdateStep>>,
    package_root: PathBuf,
    backup_slot: String,
    require_signature: bool,
    check_declared_size: bool,
}

impl<S: SnapshotStore> std::fmt::Debug for UpdateEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEngine")
            .field("steps", &self.step_names())
            .field("package_root", &self.package_root)
            .field("backup_slot", &self.backup_slot)
            .field("require_signature", &self.require_signature)
            .field("check_declared_size", &self.check_declared_size)
            .finish()
    }
}

impl UpdateEngine<DirectorySnapshotStore> {
    /// Builds an engine from configuration: opens the snapshot store, loads
    /// the public key if one is configured, and applies engine settings.
    /// No steps are registered.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut verifier = Verifier::new().with_hasher(Hasher::with_chunk_size(config.hashing.chunk_size));
        if let Some(key_path) = &config.engine.public_key_path {
            verifier.load_public_key(key_path)?;
        }
        let store = DirectorySnapshotStore::open(config.snapshot.clone())?;

        UpdateEngine::builder(store)
            .verifier(verifier)
            .package_root(&config.engine.package_root)
            .backup_slot(&config.engine.backup_slot)
            .require_signature(config.engine.require_signature)
            .check_declared_size(config.engine.check_declared_size)
            .build()
    }
}

impl<S: SnapshotStore> UpdateEngine<S> {
    /// Starts a builder around `store`.
    pub fn builder(store: S) -> UpdateEngineBuilder<S> {
        UpdateEngineBuilder::new(store)
    }

    /// Appends a step; steps run in the order they were added.
    pub fn add_update_step<T: UpdateStep + 'static>(&mut self, step: T) {
        self.steps.push(Box::new(step));
    }

    /// Names of registered steps, in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// The snapshot store.
    pub fn snapshot_store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the snapshot store, e.g. for retention.
    pub fn snapshot_store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The verifier.
    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Snapshot id used for transaction backups.
    pub fn backup_slot(&self) -> &str {
        &self.backup_slot
    }

    /// Directory containing one sub-directory per package.
    pub fn package_root(&self) -> &Path {
        &self.package_root
    }

    /// Applies `package` to `target_dir`; `true` only if the update committed.
    ///
    /// Never panics and never returns an error: every failure ends in a
    /// rollback (or a logged rollback failure) and `false`.
    pub fn apply_update(&mut self, package: &PackageDescriptor, target_dir: &Path) -> bool {
        let report = self.run_transaction(package, target_dir);
        if report.needs_escalation() {
            log::error!(
                "Target {} may be inconsistent after failed update of '{}'; manual recovery required",
                target_dir.display(),
                report.package_id
            );
        }
        report.is_success()
    }

    /// Runs one transaction and reports how it ended.
    pub fn run_transaction(&mut self, package: &PackageDescriptor, target_dir: &Path) -> UpdateReport {
        let steps_total = self.steps.len();
        let backup_slot = self.backup_slot.clone();
        let mut tx = UpdateTransaction::new(target_dir, &backup_slot);
        log::info!(
            "Applying package '{}' version {} to {}",
            package.package_id(),
            package.version(),
            target_dir.display()
        );

        // An occupied slot is the only copy of a state that was never
        // recovered; overwriting it would lose that state.
        if self.store.has_snapshot(tx.backup_id) {
            log::error!(
                "Backup slot '{}' still holds an earlier backup, update of {} refused",
                tx.backup_id,
                target_dir.display()
            );
            tx.outcome = TransactionOutcome::FailedNoRollback;
            let failure = OtaError::RollbackFailure(format!(
                "backup slot '{}' still holds the backup of an unfinished transaction; restore or remove it before updating",
                tx.backup_id
            ));
            return tx.into_report(package, steps_total, Some(failure));
        }

        if let Err(e) = self.store.create_snapshot(target_dir, Some(tx.backup_id)) {
            log::error!("Backup of {} failed, update aborted: {}", target_dir.display(), e);
            tx.outcome = TransactionOutcome::FailedNoRollback;
            return tx.into_report(package, steps_total, Some(e));
        }
        tx.advance(TransactionPhase::BackupCreated);

        let result = match self.verify_package(package) {
            Ok(package_dir) => {
                tx.advance(TransactionPhase::Verified);
                self.apply_steps(package, &package_dir, &mut tx)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.commit(&mut tx);
                tx.into_report(package, steps_total, None)
            }
            Err(cause) => {
                log::warn!("Update of '{}' failed: {}", package.package_id(), cause);
                let failure = self.rollback(&mut tx, cause);
                tx.into_report(package, steps_total, Some(failure))
            }
        }
    }

    /// Checks every package file (and the signature, if required) without
    /// touching any target. Returns the package directory.
    ///
    /// # Errors
    ///
    /// [`OtaError::PathTraversal`] for an entry escaping the package
    /// directory, [`OtaError::FileIo`] for a missing or unreadable file,
    /// [`OtaError::Verification`] for a size, digest or signature mismatch,
    /// [`OtaError::Configuration`] if a signature is required but no key is
    /// loaded.
    pub fn verify_package(&self, package: &PackageDescriptor) -> Result<PathBuf> {
        let package_dir = package.package_dir(&self.package_root)?;

        for entry in package.files() {
            let path = entry.resolve(&package_dir)?;

            if self.check_declared_size {
                let actual = fs::metadata(&path).map_err(|e| OtaError::file_io(&path, e))?.len();
                if actual != entry.size {
                    return Err(OtaError::verification(format!(
                        "size mismatch for {}: declared {}, found {}",
                        path.display(),
                        entry.size,
                        actual
                    )));
                }
            }

            if !self.verifier.verify_digest(&path, &entry.hash)? {
                return Err(OtaError::verification(format!("digest mismatch for {}", path.display())));
            }
            log::debug!("Verified {}", path.display());
        }

        if self.require_signature {
            self.verify_package_signature(package)?;
        }
        Ok(package_dir)
    }

    fn verify_package_signature(&self, package: &PackageDescriptor) -> Result<()> {
        let signature = package
            .signature()?
            .ok_or_else(|| OtaError::verification(format!("package '{}' is not signed", package.package_id())))?;
        let payload = package.signing_payload()?;
        if !self.verifier.verify_signature(&payload, &signature)? {
            return Err(OtaError::verification(format!(
                "signature check failed for package '{}'",
                package.package_id()
            )));
        }
        Ok(())
    }

    fn apply_steps(&self, package: &PackageDescriptor, package_dir: &Path, tx: &mut UpdateTransaction<'_>) -> Result<()> {
        let ctx = StepContext::new(package, package_dir, tx.target_dir);
        let total = self.steps.len();

        for step in &self.steps {
            let name = step.name().to_string();
            log::debug!("Running step '{}'", name);
            let reason = match panic::catch_unwind(AssertUnwindSafe(|| step.apply(&ctx))) {
                Ok(Ok(true)) => {
                    tx.steps_applied += 1;
                    tx.advance(TransactionPhase::StepsApplied {
                        applied: tx.steps_applied,
                        total,
                    });
                    continue;
                }
                Ok(Ok(false)) => "step reported failure".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("step panicked: {}", panic_message(payload.as_ref())),
            };
            return Err(OtaError::StepFailed { step: name, reason });
        }
        Ok(())
    }

    fn commit(&mut self, tx: &mut UpdateTransaction<'_>) {
        match self.store.delete_snapshot(tx.backup_id) {
            Ok(true) => {}
            Ok(false) => log::warn!("Backup '{}' was already gone at commit", tx.backup_id),
            Err(e) => log::warn!(
                "Update committed but backup '{}' could not be removed and will block the next update: {}",
                tx.backup_id,
                e
            ),
        }
        tx.outcome = TransactionOutcome::Committed;
        tx.advance(TransactionPhase::Committed);
        log::info!("Update of {} committed", tx.target_dir.display());
    }

    /// Restores the backup. Returns the error to report: `cause` itself if
    /// the restore worked, a [`OtaError::RollbackFailure`] otherwise.
    fn rollback(&mut self, tx: &mut UpdateTransaction<'_>, cause: OtaError) -> OtaError {
        match self.store.try_restore_snapshot(tx.backup_id, tx.target_dir) {
            Ok(()) => {
                tx.outcome = TransactionOutcome::RolledBack;
                tx.advance(TransactionPhase::RolledBack);
                log::info!("Rolled back {} to its pre-update state", tx.target_dir.display());
                if let Err(e) = self.store.delete_snapshot(tx.backup_id) {
                    log::warn!("Backup '{}' could not be removed after rollback: {}", tx.backup_id, e);
                }
                cause
            }
            Err(restore_err) => {
                // The backup is kept for manual recovery.
                tx.outcome = TransactionOutcome::FailedNoRollback;
                log::error!(
                    "Rollback of {} from '{}' failed: {}",
                    tx.target_dir.display(),
                    tx.backup_id,
                    restore_err
                );
                OtaError::RollbackFailure(format!("{} (after: {})", restore_err, cause))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for [`UpdateEngine`].
pub struct UpdateEngineBuilder<S: SnapshotStore> {
    store: S,
    verifier: Verifier,
    steps: Vec<Box<dyn UpdateStep>>,
    package_root: PathBuf,
    backup_slot: String,
    require_signature: bool,
    check_declared_size: bool,
}

impl<S: SnapshotStore> UpdateEngineBuilder<S> {
    fn new(store: S) -> Self {
        Self {
            store,
            verifier: Verifier::new(),
            steps: Vec::new(),
            package_root: PathBuf::from("."),
            backup_slot: DEFAULT_BACKUP_SLOT.to_string(),
            require_signature: false,
            check_declared_size: false,
        }
    }

    /// Verifier to use (default: no public key, 4 KiB hashing buffer).
    pub fn verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Directory containing one sub-directory per package (default `.`).
    pub fn package_root(mut self, package_root: impl Into<PathBuf>) -> Self {
        self.package_root = package_root.into();
        self
    }

    /// Snapshot id used for the transaction backup.
    pub fn backup_slot(mut self, backup_slot: impl Into<String>) -> Self {
        self.backup_slot = backup_slot.into();
        self
    }

    /// Require a valid detached signature on every package.
    pub fn require_signature(mut self, require: bool) -> Self {
        self.require_signature = require;
        self
    }

    /// Also reject files whose size differs from the declared one (default
    /// off; the digest alone decides).
    pub fn check_declared_size(mut self, check: bool) -> Self {
        self.check_declared_size = check;
        self
    }

    /// Appends a step.
    pub fn step<T: UpdateStep + 'static>(mut self, step: T) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Finishes the engine.
    ///
    /// # Errors
    ///
    /// [`OtaError::InvalidInput`] if the backup slot is not a single plain
    /// path component.
    pub fn build(self) -> Result<UpdateEngine<S>> {
        if !is_plain_component(&self.backup_slot) {
            return Err(OtaError::invalid_input(format!("invalid backup slot '{}'", self.backup_slot)));
        }
        if self.require_signature && !self.verifier.has_public_key() {
            log::warn!("Signatures are required but no public key is loaded; every update will fail");
        }
        Ok(UpdateEngine {
            verifier: self.verifier,
            store: self.store,
            steps: self.steps,
            package_root: self.package_root,
            backup_slot: self.backup_slot,
            require_signature: self.require_signature,
            check_declared_size: self.check_declared_size,
        })
    }
}
