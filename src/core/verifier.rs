//! Digest and signature verification
//!
//! Two independent checks: a file against its expected SHA-256 digest, and a
//! byte payload against a detached RSA-PSS signature. The update engine
//! decides which of them a transaction requires.

use std::fs;
use std::path::Path;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::core::hash::Hasher;
use crate::error::{OtaError, Result};

/// Output length of SHA-256 in bytes.
const SHA256_LEN: usize = 32;

/// Verifier for package files and signed manifests
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    /// Absent means signature checks are unavailable
    public_key: Option<RsaPublicKey>,
    hasher: Hasher,
}

impl Verifier {
    /// Creates a verifier with no public key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a verifier that checks signatures against `public_key`.
    pub fn with_public_key(public_key: RsaPublicKey) -> Self {
        Self {
            public_key: Some(public_key),
            hasher: Hasher::new(),
        }
    }

    /// Creates a verifier from PEM text.
    ///
    /// Accepts a SubjectPublicKeyInfo (`BEGIN PUBLIC KEY`) block and falls back
    /// to PKCS#1 (`BEGIN RSA PUBLIC KEY`).
    pub fn from_public_key_pem(pem: &str) -> Result<Self> {
        Ok(Self::with_public_key(parse_public_key_pem(pem)?))
    }

    /// Replaces the hasher used by [`Verifier::verify_digest`].
    pub fn with_hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Loads (or replaces) the public key from a PEM file.
    ///
    /// # Errors
    ///
    /// [`OtaError::FileIo`] if the file cannot be read,
    /// [`OtaError::Configuration`] if it does not hold an RSA public key.
    pub fn load_public_key(&mut self, path: &Path) -> Result<()> {
        let pem = fs::read_to_string(path).map_err(|e| OtaError::file_io(path, e))?;
        self.public_key = Some(parse_public_key_pem(&pem)?);
        log::debug!("Loaded public key from {}", path.display());
        Ok(())
    }

    /// Whether a public key is loaded.
    pub fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }

    /// The hasher used for digest checks.
    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Checks the file at `path` against `expected_hex`.
    ///
    /// A mismatch is `Ok(false)`, as is an expected digest that is not 64 hex
    /// characters. Case of `expected_hex` is ignored.
    ///
    /// # Errors
    ///
    /// [`OtaError::FileIo`] if the file is missing or unreadable.
    pub fn verify_digest(&self, path: &Path, expected_hex: &str) -> Result<bool> {
        let actual = self.hasher.digest_bytes(path)?;

        let expected = match hex::decode(expected_hex.trim()) {
            Ok(bytes) if bytes.len() == SHA256_LEN => bytes,
            Ok(bytes) => {
                log::warn!(
                    "Expected digest for {} has {} bytes, not {}",
                    path.display(),
                    bytes.len(),
                    SHA256_LEN
                );
                return Ok(false);
            }
            Err(e) => {
                log::warn!("Expected digest for {} is not hex: {}", path.display(), e);
                return Ok(false);
            }
        };

        Ok(bool::from(actual.as_slice().ct_eq(expected.as_slice())))
    }

    /// Checks a detached RSA-PSS signature over `data`.
    ///
    /// Padding is PSS with MGF1(SHA-256), SHA-256 message digest and the
    /// maximum salt length for the key (`emLen - hLen - 2`).
    ///
    /// # Errors
    ///
    /// [`OtaError::Configuration`] if no public key is loaded. Every failure of
    /// the RSA primitive itself (bad length, wrong key, tampered data) is
    /// `Ok(false)`.
    pub fn verify_signature(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let public_key = self
            .public_key
            .as_ref()
            .ok_or_else(|| OtaError::configuration("no public key loaded"))?;

        let Some(salt_len) = max_pss_salt_len(public_key) else {
            log::warn!("Public key too small for PSS with SHA-256");
            return Ok(false);
        };

        let hashed = Sha256::digest(data);
        match public_key.verify(Pss::new_with_salt::<Sha256>(salt_len), &hashed, signature) {
            Ok(()) => Ok(true),
            Err(e) => {
                log::debug!("Signature rejected: {}", e);
                Ok(false)
            }
        }
    }
}

/// Largest PSS salt for `key` with a SHA-256 digest, if the key is big enough.
pub(crate) fn max_pss_salt_len(key: &RsaPublicKey) -> Option<usize> {
    let em_bits = key.n().bits().checked_sub(1)?;
    let em_len = (em_bits + 7) / 8;
    em_len.checked_sub(SHA256_LEN + 2)
}

fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|spki_err| {
            RsaPublicKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                OtaError::configuration(format!(
                    "invalid RSA public key: {}; {}",
                    spki_err, pkcs1_err
                ))
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::sha256_hex;
    use crate::test_utils::{sign_pss_max_salt, test_keypair};
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_digest_match_and_mismatch() {
        let file = file_with(b"hello");
        let verifier = Verifier::new();
        assert!(verifier.verify_digest(file.path(), &sha256_hex(b"hello")).unwrap());
        assert!(!verifier.verify_digest(file.path(), &sha256_hex(b"world")).unwrap());
    }

    #[test]
    fn test_digest_is_case_insensitive() {
        let file = file_with(b"hello");
        let upper = sha256_hex(b"hello").to_uppercase();
        assert!(Verifier::new().verify_digest(file.path(), &upper).unwrap());
    }

    #[test]
    fn test_malformed_expected_digest_is_mismatch() {
        let file = file_with(b"hello");
        let verifier = Verifier::new();
        assert!(!verifier.verify_digest(file.path(), "wrongchecksum").unwrap());
        assert!(!verifier.verify_digest(file.path(), "abcd").unwrap());
        assert!(!verifier.verify_digest(file.path(), "").unwrap());
    }

    #[test]
    fn test_signature_without_key_is_configuration_error() {
        let err = Verifier::new().verify_signature(b"data", b"sig").unwrap_err();
        assert!(matches!(err, OtaError::Configuration(_)));
        assert!(err.to_string().contains("no public key loaded"));
    }

    #[test]
    fn test_load_public_key_pem_formats() {
        let (_, public_key) = test_keypair();

        let spki = public_key.to_public_key_pem(LineEnding::LF).unwrap();
        let pkcs1 = public_key.to_pkcs1_pem(LineEnding::LF).unwrap();
        assert!(Verifier::from_public_key_pem(&spki).unwrap().has_public_key());
        assert!(Verifier::from_public_key_pem(&pkcs1).unwrap().has_public_key());

        let key_file = file_with(spki.as_bytes());
        let mut verifier = Verifier::new();
        verifier.load_public_key(key_file.path()).unwrap();
        assert!(verifier.has_public_key());
    }

    #[test]
    fn test_garbage_pem_is_configuration_error() {
        let err = Verifier::from_public_key_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n")
            .unwrap_err();
        assert!(matches!(err, OtaError::Configuration(_)));
    }

    #[test]
    fn test_signature_round_trip() {
        let (private_key, public_key) = test_keypair();
        let verifier = Verifier::with_public_key(public_key);
        let signature = sign_pss_max_salt(&private_key, b"manifest bytes");

        assert!(verifier.verify_signature(b"manifest bytes", &signature).unwrap());
        assert!(!verifier.verify_signature(b"manifest bytez", &signature).unwrap());

        let mut flipped = signature.clone();
        flipped[10] ^= 0x01;
        assert!(!verifier.verify_signature(b"manifest bytes", &flipped).unwrap());
        assert!(!verifier.verify_signature(b"manifest bytes", &signature[..64]).unwrap());
    }

    #[test]
    fn test_max_salt_len_for_1024_bit_key() {
        let (_, public_key) = test_keypair();
        // emLen 128 - hLen 32 - 2
        assert_eq!(max_pss_salt_len(&public_key), Some(94));
    }
}
