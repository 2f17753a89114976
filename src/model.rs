//! Offline model utilities: hashing, key generation and model file
//! encryption.
//!
//! An encrypted model is the AES-256-GCM ciphertext of the model file with
//! the 16-byte tag appended, sealed under an all-zero nonce. Every model gets
//! its own key, so the fixed nonce is never reused under one key.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::ModelToolError;

/// Model key length in bytes.
pub const MODEL_KEY_LEN: usize = 32;

/// A model encryption key. Wiped on drop.
pub type ModelKey = Zeroizing<[u8; MODEL_KEY_LEN]>;

/// Lowercase hex SHA-256 of the model bytes. This is the service identifier
/// an enclave reports for the model it has loaded.
pub fn hash_model(model: &[u8]) -> String {
    hex::encode(Sha256::digest(model))
}

pub fn hash_model_file(path: &Path) -> Result<String, ModelToolError> {
    Ok(hash_model(&fs::read(path)?))
}

/// 32 random bytes clamped as a Curve25519 secret.
pub fn generate_model_key() -> ModelKey {
    let mut key = Zeroizing::new([0u8; MODEL_KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut key[..]);
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;
    key
}

pub fn parse_model_key(hex_key: &str) -> Result<ModelKey, ModelToolError> {
    let raw = Zeroizing::new(hex::decode(hex_key.trim())?);
    model_key_from_slice(&raw)
}

pub fn model_key_from_slice(raw: &[u8]) -> Result<ModelKey, ModelToolError> {
    if raw.len() != MODEL_KEY_LEN {
        return Err(ModelToolError::InvalidKeyLength(raw.len()));
    }
    let mut key = Zeroizing::new([0u8; MODEL_KEY_LEN]);
    key.copy_from_slice(raw);
    Ok(key)
}

pub fn read_model_key_file(path: &Path) -> Result<ModelKey, ModelToolError> {
    let contents = Zeroizing::new(fs::read_to_string(path)?);
    parse_model_key(&contents)
}

pub fn write_model_key_file(path: &Path, key: &ModelKey) -> Result<(), ModelToolError> {
    let encoded = Zeroizing::new(hex::encode(&key[..]));
    fs::write(path, encoded.as_bytes())?;
    Ok(())
}

pub fn encrypt_model(key: &ModelKey, model: &[u8]) -> Result<Vec<u8>, ModelToolError> {
    cipher(key)
        .encrypt(&zero_nonce(), model)
        .map_err(|_| ModelToolError::EncryptFailed)
}

pub fn decrypt_model(key: &[u8], encrypted: &[u8]) -> Result<Vec<u8>, ModelToolError> {
    let key = model_key_from_slice(key)?;
    cipher(&key)
        .decrypt(&zero_nonce(), encrypted)
        .map_err(|_| ModelToolError::DecryptFailed)
}

fn cipher(key: &ModelKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]))
}

fn zero_nonce() -> Nonce<aes_gcm::aead::consts::U12> {
    *Nonce::from_slice(&[0u8; 12])
}

/// Result of [`encrypt_model_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedModelInfo {
    /// Hash of the plaintext model (the enclave's service identifier).
    pub model_hash: String,
    /// A new key was generated and written to the key file.
    pub key_generated: bool,
}

/// Encrypt `input` into `output` with the key in `key_path`, generating and
/// writing a fresh key first if the key file does not exist.
pub fn encrypt_model_file(
    input: &Path,
    output: &Path,
    key_path: &Path,
) -> Result<EncryptedModelInfo, ModelToolError> {
    let key_generated = !key_path.exists();
    let key = if key_generated {
        let key = generate_model_key();
        write_model_key_file(key_path, &key)?;
        tracing::info!(path = %key_path.display(), "generated model key");
        key
    } else {
        read_model_key_file(key_path)?
    };

    let model = fs::read(input)?;
    let encrypted = encrypt_model(&key, &model)?;
    fs::write(output, encrypted)?;

    Ok(EncryptedModelInfo {
        model_hash: hash_model(&model),
        key_generated,
    })
}
