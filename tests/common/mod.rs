#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ota_safeguard::{DirectorySnapshotStore, FileEntry, PackageDescriptor, UpdateEngine, UpdateEngineBuilder};
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Temporary layout: `target/`, `packages/`, `backups/`.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let ws = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(ws.target()).unwrap();
        fs::create_dir_all(ws.packages()).unwrap();
        ws
    }

    pub fn target(&self) -> PathBuf {
        self.dir.path().join("target")
    }

    pub fn packages(&self) -> PathBuf {
        self.dir.path().join("packages")
    }

    pub fn backups(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    pub fn store(&self) -> DirectorySnapshotStore {
        DirectorySnapshotStore::at(self.backups()).unwrap()
    }

    pub fn engine(&self) -> UpdateEngineBuilder<DirectorySnapshotStore> {
        UpdateEngine::builder(self.store()).package_root(self.packages())
    }

    /// Writes package files and returns a descriptor whose digests match them.
    pub fn package(&self, id: &str, version: &str, files: &[(&str, &str)]) -> PackageDescriptor {
        let root = self.packages().join(id);
        write_tree(&root, files);
        let entries = files
            .iter()
            .map(|(path, contents)| FileEntry::new(*path, hex::encode(Sha256::digest(contents.as_bytes())), contents.len() as u64))
            .collect();
        PackageDescriptor::new(id, version, entries)
    }
}

pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

/// Relative path -> file contents (`None` for directories).
pub fn snapshot_of(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
            (rel, contents)
        })
        .collect()
}

pub fn keypair() -> &'static (RsaPrivateKey, RsaPublicKey) {
    static KEYPAIR: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
    KEYPAIR.get_or_init(|| {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        (private_key, public_key)
    })
}

/// PSS / SHA-256 / MGF1-SHA-256 with the largest salt the key allows.
pub fn sign(private_key: &RsaPrivateKey, data: &[u8]) -> Vec<u8> {
    let em_len = (private_key.n().bits() - 1 + 7) / 8;
    let salt_len = em_len - 32 - 2;
    private_key
        .sign_with_rng(&mut rand::thread_rng(), Pss::new_with_salt::<Sha256>(salt_len), &Sha256::digest(data))
        .unwrap()
}
