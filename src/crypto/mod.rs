pub mod kex;
pub mod seal;

/// AEAD key length in bytes (ChaCha20-Poly1305).
pub const KEY_LEN: usize = 32;

/// AEAD nonce length in bytes.
pub const IV_LEN: usize = 12;

/// AEAD tag length in bytes.
pub const TAG_LEN: usize = 16;

/// 32-byte symmetric key.
pub type SymmetricKey = [u8; KEY_LEN];

/// 32-byte X25519 public key.
pub type PublicKey = [u8; 32];

/// 12-byte AEAD nonce.
pub type Iv = [u8; IV_LEN];
