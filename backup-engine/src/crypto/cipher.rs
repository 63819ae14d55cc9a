//! AES-256-GCM artifact encryption.
//!
//! Artifact layout:
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 4    | magic `DBBK`                   |
//! | 4      | 1    | format version                 |
//! | 5      | 12   | nonce                          |
//! | 17     | n+16 | ciphertext with 16-byte GCM tag |
//!
//! The nonce is generated per call and stored in the header. Decryption always
//! reads it back from the artifact; it is never derived or tracked elsewhere.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use super::EncryptionKey;
use crate::utils::errors::{BackupError, Result};

const MAGIC: &[u8; 4] = b"DBBK";
const FORMAT_VERSION: u8 = 1;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Bytes preceding the ciphertext
pub const HEADER_SIZE: usize = MAGIC.len() + 1 + NONCE_SIZE;

/// Smallest well-formed artifact (empty plaintext)
pub const MIN_ARTIFACT_SIZE: usize = HEADER_SIZE + TAG_SIZE;

fn cipher_for(key: &EncryptionKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| BackupError::Encryption(format!("failed to create cipher: {}", e)))
}

/// Encrypt `plaintext` into a self-describing artifact.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| BackupError::Encryption(format!("encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an artifact produced by [`encrypt`].
///
/// Fails on a malformed header, a wrong key or any modification of the
/// artifact. It never returns unauthenticated plaintext.
pub fn decrypt(artifact: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if artifact.len() < MIN_ARTIFACT_SIZE {
        return Err(BackupError::Encryption(format!(
            "artifact truncated: {} bytes, need at least {}",
            artifact.len(),
            MIN_ARTIFACT_SIZE
        )));
    }

    let (magic, rest) = artifact.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(BackupError::Encryption("bad artifact magic".into()));
    }

    let (version, rest) = rest.split_at(1);
    if version[0] != FORMAT_VERSION {
        return Err(BackupError::Encryption(format!(
            "unsupported artifact version: {}",
            version[0]
        )));
    }

    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher_for(key)?
        .decrypt(nonce, ciphertext)
        .map_err(|_| BackupError::Encryption("decryption failed: wrong key or corrupted artifact".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_material("test passphrase").unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = test_key();
        let plaintext = b"SQLite format 3\0 page data";

        let artifact = encrypt(plaintext, &key).unwrap();
        assert_eq!(&artifact[..4], MAGIC);
        assert_eq!(artifact.len(), HEADER_SIZE + plaintext.len() + TAG_SIZE);

        let decrypted = decrypt(&artifact, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_round_trip_various_sizes() {
        let key = test_key();
        for size in [0usize, 1, 15, 16, 17, 4096, 100_003] {
            let plaintext: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
            let artifact = encrypt(&plaintext, &key).unwrap();
            assert_eq!(decrypt(&artifact, &key).unwrap(), plaintext, "size {}", size);
        }
    }

    #[test]
    fn test_nonce_differs_per_encryption() {
        let key = test_key();
        let a = encrypt(b"same input", &key).unwrap();
        let b = encrypt(b"same input", &key).unwrap();
        assert_ne!(a[5..HEADER_SIZE], b[5..HEADER_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_embedded_nonce_is_authoritative() {
        let key = test_key();
        let mut artifact = encrypt(b"payload", &key).unwrap();
        // A decryptor that ignored the header nonce would not notice this.
        artifact[6] ^= 0x01;
        assert!(matches!(decrypt(&artifact, &key), Err(BackupError::Encryption(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let artifact = encrypt(b"secret data", &test_key()).unwrap();
        let other = EncryptionKey::from_material("other passphrase").unwrap();
        assert!(matches!(decrypt(&artifact, &other), Err(BackupError::Encryption(_))));
    }

    #[test]
    fn test_any_flipped_byte_fails() {
        let key = test_key();
        let artifact = encrypt(b"tamper evident content", &key).unwrap();
        for i in 0..artifact.len() {
            let mut tampered = artifact.clone();
            tampered[i] ^= 0x80;
            assert!(decrypt(&tampered, &key).is_err(), "byte {} flip went unnoticed", i);
        }
    }

    #[test]
    fn test_truncated_and_malformed_headers() {
        let key = test_key();
        assert!(decrypt(b"", &key).is_err());
        assert!(decrypt(&[0u8; MIN_ARTIFACT_SIZE - 1], &key).is_err());

        let mut artifact = encrypt(b"x", &key).unwrap();
        artifact[4] = 9;
        let err = decrypt(&artifact, &key).unwrap_err();
        assert!(err.to_string().contains("unsupported artifact version"));
    }
}
