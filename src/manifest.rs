// src/manifest.rs

//! Manifest files: the JSON form of a [`PackageDescriptor`].
//!
//! ```json
//! {
//!   "package_id": "pkg-A",
//!   "version": "1.1.0",
//!   "files": [{ "path": "a.bin", "hash": "2cf2...", "size": 5 }],
//!   "signature": "9a1f..."
//! }
//! ```
//!
//! `signature` is optional and hex encoded.

use std::fs;
use std::path::Path;

use crate::core::package::PackageDescriptor;
use crate::error::{OtaError, Result};

impl PackageDescriptor {
    /// Reads a descriptor from a manifest file.
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| OtaError::file_io(path, e))?;
        let descriptor: Self = serde_json::from_str(&contents)?;
        log::debug!(
            "Loaded manifest for '{}' ({} files) from {}",
            descriptor.package_id(),
            descriptor.files().len(),
            path.display()
        );
        Ok(descriptor)
    }

    /// Pretty-printed manifest JSON.
    pub fn to_manifest_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the manifest to `path`, replacing any existing file.
    pub fn save_manifest(&self, path: &Path) -> Result<()> {
        let json = self.to_manifest_json()?;
        fs::write(path, json).map_err(|e| OtaError::file_io(path, e))
    }
}
