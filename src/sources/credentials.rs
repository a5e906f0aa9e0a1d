// src/sources/credentials.rs

//! Reversible encryption for stored source passwords
//!
//! Passwords are encrypted with AES-256-CBC (PKCS7 padding). A random IV is
//! prepended to the ciphertext and the whole thing is base64-encoded so it
//! can live in a configuration attribute. The key is derived from a fixed
//! entropy string and a per-user secret, so a file copied to another account
//! cannot be decrypted there.

use crate::error::{Error, Result};
use aes::Aes256;
use base64::{Engine as _, engine::general_purpose};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const ENTROPY: &[u8] = b"stowage-credentials";
const BLOCK_SIZE: usize = 16;

/// Encrypts and decrypts passwords with a key bound to a secret
#[derive(Clone)]
pub struct PasswordProtector {
    key: [u8; 32],
}

impl std::fmt::Debug for PasswordProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordProtector").finish_non_exhaustive()
    }
}

impl PasswordProtector {
    /// Derive the key from an explicit secret
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ENTROPY);
        hasher.update(secret);
        Self {
            key: hasher.finalize().into(),
        }
    }

    /// Derive the key from the current user's name and home directory
    pub fn for_current_user() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let home = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self::from_secret(format!("{}\0{}", user, home).as_bytes())
    }

    pub fn encrypt(&self, plain_text: &str) -> Result<String> {
        let iv: [u8; BLOCK_SIZE] = rand::random();
        let data = plain_text.as_bytes();

        let mut buffer = vec![0u8; data.len() + BLOCK_SIZE];
        buffer[..data.len()].copy_from_slice(data);

        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| Error::Credential(format!("Failed to create cipher: {}", e)))?;
        let encrypted_len = cipher
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, data.len())
            .map_err(|_| Error::Credential("Encryption failed".to_string()))?
            .len();

        let mut output = Vec::with_capacity(BLOCK_SIZE + encrypted_len);
        output.extend_from_slice(&iv);
        output.extend_from_slice(&buffer[..encrypted_len]);
        Ok(general_purpose::STANDARD.encode(output))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let bytes = general_purpose::STANDARD
            .decode(encrypted.trim())
            .map_err(|e| Error::Credential(format!("Invalid base64: {}", e)))?;

        if bytes.len() < BLOCK_SIZE * 2 || bytes.len() % BLOCK_SIZE != 0 {
            return Err(Error::Credential("Encrypted value has an invalid length".to_string()));
        }

        let (iv, ciphertext) = bytes.split_at(BLOCK_SIZE);
        let mut buffer = ciphertext.to_vec();

        let cipher = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| Error::Credential(format!("Failed to create cipher: {}", e)))?;
        let decrypted = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|_| Error::Credential("Decryption failed: invalid padding".to_string()))?;

        String::from_utf8(decrypted.to_vec())
            .map_err(|_| Error::Credential("Decrypted value is not valid UTF-8".to_string()))
    }
}
