//! AES-256-GCM encryption with password-based key derivation
//!
//! Provides the per-file authenticated encryption used by the package
//! builder and loader:
//! - PBKDF2-HMAC-SHA256 key derivation (100,000 iterations, 32-byte salt)
//! - AES-256-GCM with a fresh random 96-bit nonce per file
//! - 128-bit authentication tags for integrity
//!
//! **Design**:
//! - Format: [nonce: 12 bytes][ciphertext][tag: 16 bytes]
//! - The derived key is 32 bytes (256 bits) and lives only in memory
//! - A tag verification failure is the sole wrong-password signal; there
//!   is no fallback decrypt path

use crate::error::{PackageError, Result};
use crate::header::SALT_SIZE;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

/// Encryption key (32 bytes for AES-256)
pub type EncryptionKey = [u8; 32];

/// Nonce size for AES-GCM (96 bits / 12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits / 16 bytes)
pub const TAG_SIZE: usize = 16;

/// Overhead added to every encrypted payload (nonce + tag)
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// PBKDF2 iteration count. Format-level constant: stored packages do not
/// record it, so changing it requires a version bump.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Generate a random key-derivation salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a password and salt.
///
/// Deterministic for a given (password, salt) pair.
pub fn derive_key(password: &str, salt: &[u8; SALT_SIZE]) -> EncryptionKey {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt data using AES-256-GCM
///
/// Returns encrypted data with format: [nonce][ciphertext][tag]
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());

    // Fresh random nonce per file; never reused under the same key
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| PackageError::Crypto(format!("encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt data using AES-256-GCM
///
/// Expects data in format: [nonce][ciphertext][tag]. Fails with
/// [`PackageError::Crypto`] if the tag does not verify (wrong password or
/// tampered ciphertext).
pub fn decrypt(blob: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if blob.len() < ENCRYPTION_OVERHEAD {
        return Err(PackageError::Crypto("encrypted data too short".to_string()));
    }

    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(&blob[..NONCE_SIZE]);
    let ciphertext = &blob[NONCE_SIZE..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| PackageError::Crypto("authentication tag verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_generation() {
        let salt1 = generate_salt();
        let salt2 = generate_salt();
        assert_ne!(salt1, salt2);
    }

    #[test]
    fn test_key_derivation_deterministic() {
        let salt = [7u8; SALT_SIZE];
        let key1 = derive_key("secret123", &salt);
        let key2 = derive_key("secret123", &salt);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_key_derivation_varies_with_inputs() {
        let salt = [7u8; SALT_SIZE];
        let other_salt = [8u8; SALT_SIZE];

        assert_ne!(derive_key("secret123", &salt), derive_key("secret124", &salt));
        assert_ne!(
            derive_key("secret123", &salt),
            derive_key("secret123", &other_salt)
        );
    }

    #[test]
    fn test_encryption_decryption() {
        let key = derive_key("p@ss", &generate_salt());
        let plaintext = b"Hello, World! This is a secret message.";

        let ciphertext = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&ciphertext, &key).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
        assert_eq!(ciphertext.len(), plaintext.len() + ENCRYPTION_OVERHEAD);
    }

    #[test]
    fn test_wrong_key_fails() {
        let salt = generate_salt();
        let key1 = derive_key("secret123", &salt);
        let key2 = derive_key("secret124", &salt);

        let ciphertext = encrypt(b"Secret message", &key1).unwrap();
        assert!(matches!(
            decrypt(&ciphertext, &key2),
            Err(PackageError::Crypto(_))
        ));
    }

    #[test]
    fn test_tampered_data_fails() {
        let key = derive_key("p@ss", &generate_salt());
        let mut ciphertext = encrypt(b"Important data", &key).unwrap();

        ciphertext[NONCE_SIZE + 5] ^= 0xFF;
        assert!(matches!(
            decrypt(&ciphertext, &key),
            Err(PackageError::Crypto(_))
        ));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = derive_key("p@ss", &generate_salt());
        assert!(matches!(
            decrypt(&[0u8; ENCRYPTION_OVERHEAD - 1], &key),
            Err(PackageError::Crypto(_))
        ));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = derive_key("p@ss", &generate_salt());
        let plaintext = b"Same message";

        let ciphertext1 = encrypt(plaintext, &key).unwrap();
        let ciphertext2 = encrypt(plaintext, &key).unwrap();

        assert_ne!(&ciphertext1[..NONCE_SIZE], &ciphertext2[..NONCE_SIZE]);
        assert_eq!(decrypt(&ciphertext1, &key).unwrap(), plaintext);
        assert_eq!(decrypt(&ciphertext2, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = derive_key("p@ss", &generate_salt());
        let ciphertext = encrypt(b"", &key).unwrap();
        assert_eq!(ciphertext.len(), ENCRYPTION_OVERHEAD);
        assert!(decrypt(&ciphertext, &key).unwrap().is_empty());
    }
}
