// src/core/mod.rs

/// SHA-256 helpers and the streaming file [`Hasher`].
pub mod hash;
/// Digest comparison and RSA-PSS signature checks.
pub mod verifier;
/// Symlink-preserving tree copy and cleanup.
pub mod fs_tree;
/// Package descriptors and confined path resolution.
pub mod package;
/// Snapshot records and id generation.
pub mod snapshot;
/// The [`SnapshotStore`] trait and its directory-backed implementation.
pub mod snapshot_store;
/// Update steps run by the engine.
pub mod step;
/// The transactional update engine.
pub mod engine;

pub use engine::{TransactionOutcome, TransactionPhase, UpdateEngine, UpdateEngineBuilder, UpdateReport};
pub use hash::Hasher;
pub use package::{FileEntry, PackageDescriptor};
pub use snapshot::SnapshotRecord;
pub use snapshot_store::{DirectorySnapshotStore, SnapshotStore};
pub use step::{FnStep, InstallFilesStep, StepContext, UpdateStep};
pub use verifier::Verifier;
