// src/test_utils.rs

#![cfg(test)] // Ensure this module is only compiled for tests

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::core::verifier::max_pss_salt_len;

/// One entry of a captured directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
}

/// Writes `files` (relative path, contents) under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
}

/// Captures `root` as relative path -> node, for byte-for-byte comparisons.
pub fn read_tree(root: &Path) -> BTreeMap<PathBuf, TreeNode> {
    let mut tree = BTreeMap::new();
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.unwrap();
        let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
        let node = if entry.file_type().is_symlink() {
            TreeNode::Symlink(fs::read_link(entry.path()).unwrap())
        } else if entry.file_type().is_dir() {
            TreeNode::Dir
        } else {
            TreeNode::File(fs::read(entry.path()).unwrap())
        };
        tree.insert(relative, node);
    }
    tree
}

/// A 1024-bit RSA key pair generated once per test binary.
pub fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
    static KEYPAIR: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
    KEYPAIR
        .get_or_init(|| {
            let mut rng = rand::thread_rng();
            let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("generate test key");
            let public_key = RsaPublicKey::from(&private_key);
            (private_key, public_key)
        })
        .clone()
}

/// Signs `data` with PSS / SHA-256 / maximum salt length.
pub fn sign_pss_max_salt(private_key: &RsaPrivateKey, data: &[u8]) -> Vec<u8> {
    let public_key = RsaPublicKey::from(private_key);
    let salt_len = max_pss_salt_len(&public_key).unwrap();
    let hashed = Sha256::digest(data);
    private_key
        .sign_with_rng(&mut rand::thread_rng(), Pss::new_with_salt::<Sha256>(salt_len), &hashed)
        .expect("sign test payload")
}
