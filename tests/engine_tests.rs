mod common;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use common::{keypair, sign, snapshot_of, write_tree, Workspace};
use ota_safeguard::config::Config;
use ota_safeguard::core::hash::sha256_hex;
use ota_safeguard::{
    DirectorySnapshotStore, FileEntry, FnStep, InstallFilesStep, OtaError, PackageDescriptor, Result,
    SnapshotRecord, SnapshotStore, StepContext, TransactionOutcome, TransactionPhase, UpdateEngine, Verifier,
};
use rsa::pkcs8::{EncodePublicKey, LineEnding};

fn counting_step(name: &str, counter: &Arc<AtomicUsize>, succeed: bool) -> FnStep<impl Fn(&StepContext<'_>) -> Result<bool>> {
    let counter = Arc::clone(counter);
    FnStep::new(name, move |ctx: &StepContext<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
        fs::write(ctx.target_dir().join("side_effect.txt"), "dirty")?;
        Ok(succeed)
    })
}

#[test]
fn test_valid_package_commits_and_releases_backup() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    let pkg = ws.package("pkg-A", "1.1.0", &[("a.bin", "hello")]);
    let mut engine = ws.engine().step(InstallFilesStep).build().unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(report.outcome, TransactionOutcome::Committed);
    assert_eq!(report.phase, TransactionPhase::Committed);
    assert!(report.failure.is_none());
    assert_eq!(fs::read_to_string(ws.target().join("a.bin")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(ws.target().join("old.txt")).unwrap(), "keep");
    assert!(engine.snapshot_store().list_snapshots().is_empty());
    assert!(!ws.backups().join("ota_transaction_backup").exists());
}

#[test]
fn test_wrong_declared_size_commits_when_digest_matches() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    write_tree(&ws.packages().join("pkg-A"), &[("a.bin", "hello")]);
    let pkg = PackageDescriptor::new(
        "pkg-A",
        "1.1.0",
        vec![FileEntry::new("a.bin", sha256_hex(b"hello"), 1049)],
    );
    let mut engine = ws.engine().step(InstallFilesStep).build().unwrap();

    assert!(engine.apply_update(&pkg, &ws.target()));
    assert_eq!(fs::read_to_string(ws.target().join("a.bin")).unwrap(), "hello");
}

#[test]
fn test_digest_mismatch_rolls_back_before_any_step() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    let before = snapshot_of(&ws.target());
    write_tree(&ws.packages().join("pkg-A"), &[("a.bin", "world")]);
    let pkg = PackageDescriptor::new(
        "pkg-A",
        "1.1.0",
        vec![FileEntry::new("a.bin", sha256_hex(b"hello"), 5)],
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = ws.engine().step(counting_step("never", &calls, true)).build().unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_matches!(report.failure, Some(OtaError::Verification(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot_of(&ws.target()), before);
}

#[test]
fn test_failing_step_stops_later_steps_and_restores_target() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep"), ("nested/x.txt", "x")]);
    let before = snapshot_of(&ws.target());
    let pkg = ws.package("pkg-A", "2.0.0", &[("a.bin", "hello")]);

    let first = Arc::new(AtomicUsize::new(0));
    let failing = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let mut engine = ws
        .engine()
        .step(InstallFilesStep)
        .step(counting_step("first", &first, true))
        .step(counting_step("failing", &failing, false))
        .step(counting_step("after", &after, true))
        .build()
        .unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert!(!report.is_success());
    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_eq!((report.steps_applied, report.steps_total), (2, 4));
    assert_matches!(&report.failure, Some(OtaError::StepFailed { step, .. }) if step == "failing");
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(failing.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot_of(&ws.target()), before);
}

#[test]
fn test_step_error_is_rolled_back() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    let before = snapshot_of(&ws.target());
    let pkg = ws.package("pkg-A", "2.0.0", &[("a.bin", "hello")]);
    let mut engine = ws
        .engine()
        .step(InstallFilesStep)
        .step(FnStep::new("erroring", |_: &StepContext<'_>| Err(OtaError::invalid_input("bad state"))))
        .build()
        .unwrap();

    assert!(!engine.apply_update(&pkg, &ws.target()));
    assert_eq!(snapshot_of(&ws.target()), before);
}

#[test]
fn test_traversal_in_manifest_is_rejected() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    write_tree(ws.dir.path(), &[("secret.txt", "s")]);
    let pkg = PackageDescriptor::new("pkg-A", "1", vec![FileEntry::new("../../secret.txt", "00", 1)]);
    let mut engine = ws.engine().step(InstallFilesStep).build().unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_matches!(report.failure, Some(OtaError::PathTraversal { .. }));
}

#[test]
fn test_missing_package_file_rolls_back() {
    let ws = Workspace::new();
    let pkg = PackageDescriptor::new("pkg-A", "1", vec![FileEntry::new("gone.bin", "00", 1)]);
    let mut engine = ws.engine().build().unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert!(report.failure.unwrap().is_io());
}

#[test]
fn test_required_signature() {
    let ws = Workspace::new();
    let (private_key, public_key) = keypair();
    let unsigned = ws.package("pkg-A", "1.1.0", &[("a.bin", "hello")]);
    let signature = sign(private_key, &unsigned.signing_payload().unwrap());
    let signed = unsigned.clone().with_signature(&signature);

    let mut engine = ws
        .engine()
        .verifier(Verifier::with_public_key(public_key.clone()))
        .require_signature(true)
        .step(InstallFilesStep)
        .build()
        .unwrap();

    let report = engine.run_transaction(&unsigned, &ws.target());
    assert_matches!(report.failure, Some(OtaError::Verification(_)));

    let retargeted = PackageDescriptor::new("pkg-A", "9.9.9", unsigned.files().to_vec()).with_signature(&signature);
    let report = engine.run_transaction(&retargeted, &ws.target());
    assert_matches!(report.failure, Some(OtaError::Verification(_)));
    assert!(!ws.target().join("a.bin").exists());

    assert!(engine.apply_update(&signed, &ws.target()));
    assert!(ws.target().join("a.bin").exists());
}

#[test]
fn test_required_signature_without_key() {
    let ws = Workspace::new();
    let (private_key, _) = keypair();
    let pkg = ws.package("pkg-A", "1.1.0", &[("a.bin", "hello")]);
    let signature = sign(private_key, &pkg.signing_payload().unwrap());
    let pkg = pkg.with_signature(&signature);
    let mut engine = ws.engine().require_signature(true).build().unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(report.outcome, TransactionOutcome::RolledBack);
    assert_matches!(report.failure, Some(OtaError::Configuration(_)));
}

#[test]
fn test_backup_root_inside_target_aborts_untouched() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    let store = DirectorySnapshotStore::at(ws.target().join("backups")).unwrap();
    let before = snapshot_of(&ws.target());
    let pkg = ws.package("pkg-A", "1", &[("a.bin", "hello")]);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = UpdateEngine::builder(store)
        .package_root(ws.packages())
        .step(counting_step("never", &calls, true))
        .build()
        .unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(report.outcome, TransactionOutcome::FailedNoRollback);
    assert_matches!(report.failure, Some(OtaError::Configuration(_)));
    assert!(!report.needs_escalation());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot_of(&ws.target()), before);
}

/// Delegates to a directory store but can be told to fail restores or deletes.
struct FaultyStore {
    inner: DirectorySnapshotStore,
    fail_restore: bool,
    fail_delete: bool,
}

impl SnapshotStore for FaultyStore {
    fn create_snapshot(&mut self, source_dir: &Path, id: Option<&str>) -> Result<String> {
        self.inner.create_snapshot(source_dir, id)
    }

    fn try_restore_snapshot(&self, id: &str, target_dir: &Path) -> Result<()> {
        if self.fail_restore {
            return Err(OtaError::SnapshotNotFound(id.to_string()));
        }
        self.inner.try_restore_snapshot(id, target_dir)
    }

    fn list_snapshots(&self) -> Vec<String> {
        self.inner.list_snapshots()
    }

    fn delete_snapshot(&mut self, id: &str) -> Result<bool> {
        if self.fail_delete {
            return Err(OtaError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only")));
        }
        self.inner.delete_snapshot(id)
    }

    fn get(&self, id: &str) -> Option<&SnapshotRecord> {
        self.inner.get(id)
    }

    fn has_snapshot(&self, id: &str) -> bool {
        self.inner.has_snapshot(id)
    }
}

#[test]
fn test_rollback_failure_needs_escalation() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    let pkg = ws.package("pkg-A", "1", &[("a.bin", "hello")]);
    let store = FaultyStore {
        inner: ws.store(),
        fail_restore: true,
        fail_delete: false,
    };
    let mut engine = UpdateEngine::builder(store)
        .package_root(ws.packages())
        .step(FnStep::new("fails", |_: &StepContext<'_>| Ok(false)))
        .build()
        .unwrap();

    let report = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(report.outcome, TransactionOutcome::FailedNoRollback);
    assert_matches!(report.failure, Some(OtaError::RollbackFailure(_)));
    assert!(report.needs_escalation());
    assert_eq!(engine.snapshot_store().list_snapshots(), vec!["ota_transaction_backup".to_string()]);
}

#[test]
fn test_unrecovered_backup_blocks_next_transaction() {
    let ws = Workspace::new();
    write_tree(&ws.target(), &[("old.txt", "keep")]);
    let pkg = ws.package("pkg-A", "1", &[("a.bin", "hello")]);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let store = FaultyStore {
        inner: ws.store(),
        fail_restore: true,
        fail_delete: false,
    };
    let mut engine = UpdateEngine::builder(store)
        .package_root(ws.packages())
        .step(FnStep::new("corrupt", move |ctx: &StepContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            fs::write(ctx.target_dir().join("old.txt"), "CORRUPT")?;
            Ok(false)
        }))
        .build()
        .unwrap();

    let first = engine.run_transaction(&pkg, &ws.target());
    assert!(first.needs_escalation());

    engine.snapshot_store_mut().fail_restore = false;
    let second = engine.run_transaction(&pkg, &ws.target());
    assert_eq!(second.outcome, TransactionOutcome::FailedNoRollback);
    assert_eq!(second.phase, TransactionPhase::Idle);
    assert_matches!(&second.failure, Some(OtaError::RollbackFailure(msg)) if msg.contains("ota_transaction_backup"));
    assert!(second.needs_escalation());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let backup = ws.backups().join("ota_transaction_backup/old.txt");
    assert_eq!(fs::read_to_string(&backup).unwrap(), "keep");
    assert_eq!(fs::read_to_string(ws.target().join("old.txt")).unwrap(), "CORRUPT");

    // A fresh process without a persisted index sees the slot on disk.
    let mut restarted = ws.engine().step(InstallFilesStep).build().unwrap();
    assert!(!restarted.apply_update(&pkg, &ws.target()));
    assert_eq!(fs::read_to_string(&backup).unwrap(), "keep");
    assert!(!ws.target().join("a.bin").exists());
}

#[test]
fn test_backup_cleanup_failure_still_commits() {
    let ws = Workspace::new();
    let pkg = ws.package("pkg-A", "1", &[("a.bin", "hello")]);
    let store = FaultyStore {
        inner: ws.store(),
        fail_restore: false,
        fail_delete: true,
    };
    let mut engine = UpdateEngine::builder(store)
        .package_root(ws.packages())
        .step(InstallFilesStep)
        .build()
        .unwrap();

    assert!(engine.apply_update(&pkg, &ws.target()));
    assert_eq!(fs::read_to_string(ws.target().join("a.bin")).unwrap(), "hello");
}

#[test]
fn test_engine_from_config_loads_key() {
    let ws = Workspace::new();
    let (private_key, public_key) = keypair();
    let key_path = ws.dir.path().join("update_key.pem");
    fs::write(&key_path, public_key.to_public_key_pem(LineEnding::LF).unwrap()).unwrap();

    let mut config = Config::default();
    config.engine.package_root = ws.packages();
    config.engine.require_signature = true;
    config.engine.public_key_path = Some(key_path);
    config.snapshot.backup_root = ws.backups();
    config.hashing.chunk_size = 7;

    let mut engine = UpdateEngine::from_config(&config).unwrap();
    assert!(engine.verifier().has_public_key());
    assert_eq!(engine.verifier().hasher().chunk_size(), 7);
    engine.add_update_step(InstallFilesStep);

    let pkg = ws.package("pkg-A", "1.1.0", &[("a.bin", "hello"), ("fw/ecu.bin", "ecu image")]);
    let signature = sign(private_key, &pkg.signing_payload().unwrap());
    assert!(engine.apply_update(&pkg.with_signature(&signature), &ws.target()));
    assert_eq!(fs::read_to_string(ws.target().join("fw/ecu.bin")).unwrap(), "ecu image");
}

#[test]
fn test_engine_from_config_missing_key_file() {
    let ws = Workspace::new();
    let mut config = Config::default();
    config.engine.public_key_path = Some(ws.dir.path().join("absent.pem"));
    config.snapshot.backup_root = ws.backups();
    assert!(UpdateEngine::from_config(&config).unwrap_err().is_io());
}
