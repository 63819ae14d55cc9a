//! Encryption and integrity primitives for backup artifacts.
//!
//! - `cipher`: AES-256-GCM with the nonce embedded in the artifact header
//! - `checksum`: SHA-256 content digests used as the integrity gate

pub mod checksum;
pub mod cipher;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::utils::errors::{BackupError, Result};

pub use checksum::{checksum_file, compute_checksum};
pub use cipher::{decrypt, encrypt};

/// Length of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Long-lived symmetric key material. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Build a key from configuration.
    ///
    /// A 64-character hex string is taken as the raw key. Anything else is
    /// treated as a passphrase and hashed with SHA-256.
    pub fn from_material(material: &str) -> Result<Self> {
        let material = material.trim();
        if material.is_empty() {
            return Err(BackupError::Config("encryption key must not be empty".into()));
        }

        let mut bytes = [0u8; KEY_SIZE];
        if material.len() == KEY_SIZE * 2 && material.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode_to_slice(material, &mut bytes)
                .map_err(|e| BackupError::Config(format!("invalid hex key: {}", e)))?;
        } else {
            let digest = Sha256::digest(material.as_bytes());
            bytes.copy_from_slice(&digest);
        }

        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}
