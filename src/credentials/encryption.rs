//! AES-256-GCM sealing of stored tokens.
//!
//! Each value gets its own random nonce; ciphertext and nonce are both
//! base64-encoded for the TEXT columns they land in.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Master key size in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Seals and opens token values with a fixed master key.
///
/// Constructed once from the base64 key in the environment and owned by the
/// credential store for the life of the process.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32-byte master key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64)
            .context("Failed to decode base64 encryption key")?;

        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Encrypts a token value with a fresh random nonce.
    ///
    /// Returns `(ciphertext, nonce)`, both base64-encoded.
    pub fn seal(&self, plaintext: &str) -> Result<(String, String)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok((BASE64.encode(&ciphertext), BASE64.encode(nonce)))
    }

    /// Decrypts a sealed token value.
    ///
    /// Fails if the key or nonce does not match, or the ciphertext was
    /// tampered with.
    pub fn open(&self, ciphertext: &str, nonce: &str) -> Result<String> {
        let ciphertext_bytes = BASE64
            .decode(ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce_bytes = BASE64.decode(nonce).context("Failed to decode nonce")?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext_bytes.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }
}
