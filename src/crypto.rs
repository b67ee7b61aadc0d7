//! Primitives needed to open the encrypted exports of other apps.
//! Nothing here encrypts our own data.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

pub type Key = Zeroizing<[u8; KEY_LEN]>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication tag mismatch: wrong key or tampered data.
    #[error("authentication failed")]
    Authentication,
    #[error("invalid key length {0}")]
    KeyLength(usize),
    #[error("invalid nonce length {0}")]
    NonceLength(usize),
    #[error("invalid scrypt parameters: {0}")]
    KdfParams(String),
}

/// AES-256-GCM decryption of `ciphertext || tag`.
pub fn aes_gcm_open(key: &[u8], nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::NonceLength(nonce.len()));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Authentication)
}

/// AES-256-GCM encryption; returns `ciphertext || tag`.
pub fn aes_gcm_seal(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::NonceLength(nonce.len()));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::Authentication)
}

pub fn sha256_key(password: &[u8]) -> Key {
    let digest = Sha256::digest(password);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest);
    key
}

/// scrypt with the cost given as `n` (must be a power of two).
pub fn scrypt_key(password: &[u8], salt: &[u8], n: u64, r: u32, p: u32) -> Result<Key, CryptoError> {
    if n < 2 || !n.is_power_of_two() {
        return Err(CryptoError::KdfParams(format!("n = {n} is not a power of two")));
    }
    let log_n = n.trailing_zeros() as u8;
    let params = scrypt::Params::new(log_n, r, p, KEY_LEN)
        .map_err(|e| CryptoError::KdfParams(e.to_string()))?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt::scrypt(password, salt, &params, key.as_mut_slice())
        .map_err(|e| CryptoError::KdfParams(e.to_string()))?;
    Ok(key)
}
