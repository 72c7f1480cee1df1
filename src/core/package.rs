// src/core/package.rs

//! Package descriptor and per-file verification contract.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OtaError, Result};

/// One file's verification contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the package directory
    pub path: String,
    /// Expected SHA-256 digest, hex encoded
    pub hash: String,
    /// Declared size in bytes
    pub size: u64,
}

impl FileEntry {
    /// Creates an entry.
    pub fn new(path: impl Into<String>, hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            size,
        }
    }

    /// Resolves this entry under `root`, failing closed on traversal.
    pub fn resolve(&self, root: &Path) -> Result<PathBuf> {
        resolve_under(root, &self.path)
    }
}

/// A named, versioned set of files with declared digests.
///
/// Fields are read-only once constructed; the engine only borrows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    package_id: String,
    version: String,
    files: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

/// The part of a descriptor covered by its signature.
#[derive(Serialize)]
struct SignedBody<'a> {
    package_id: &'a str,
    version: &'a str,
    files: &'a [FileEntry],
}

impl PackageDescriptor {
    /// Creates an unsigned descriptor.
    pub fn new(package_id: impl Into<String>, version: impl Into<String>, files: Vec<FileEntry>) -> Self {
        Self {
            package_id: package_id.into(),
            version: version.into(),
            files,
            signature: None,
        }
    }

    /// Attaches a detached signature over [`PackageDescriptor::signing_payload`].
    pub fn with_signature(mut self, signature: &[u8]) -> Self {
        self.signature = Some(hex::encode(signature));
        self
    }

    /// Package identifier; also the name of the package directory.
    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    /// Version string, not interpreted.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Files in manifest order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Sum of declared file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// The raw signature bytes, if the descriptor carries one.
    ///
    /// # Errors
    ///
    /// [`OtaError::Verification`] if the stored signature is not valid hex.
    pub fn signature(&self) -> Result<Option<Vec<u8>>> {
        self.signature
            .as_deref()
            .map(|sig| {
                hex::decode(sig.trim())
                    .map_err(|e| OtaError::verification(format!("signature is not hex: {}", e)))
            })
            .transpose()
    }

    /// Canonical bytes a package signature covers: compact JSON of
    /// `{package_id, version, files}` in that order.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let body = SignedBody {
            package_id: &self.package_id,
            version: &self.version,
            files: &self.files,
        };
        Ok(serde_json::to_vec(&body)?)
    }

    /// Directory holding this package's files under `package_root`.
    pub fn package_dir(&self, package_root: &Path) -> Result<PathBuf> {
        resolve_under(package_root, &self.package_id)
    }
}

/// Lexically resolves `relative` under `root`.
///
/// Rejects empty paths, absolute paths, drive prefixes and `..` that climbs
/// above `root`. When the result exists it is also canonicalized and must
/// stay inside the canonical root, which catches symlinks pointing out.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    let traversal = || OtaError::PathTraversal {
        path: relative.to_string(),
        root: root.to_path_buf(),
    };

    let mut clean = PathBuf::new();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                clean.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(traversal());
                }
                clean.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }
    if depth == 0 {
        return Err(traversal());
    }

    let candidate = root.join(&clean);
    if let (Ok(canonical_root), Ok(canonical)) = (root.canonicalize(), candidate.canonicalize()) {
        if !canonical.starts_with(&canonical_root) {
            return Err(traversal());
        }
    }
    Ok(candidate)
}
