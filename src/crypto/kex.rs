use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};
use zeroize::Zeroizing;

use super::{Iv, PublicKey, SymmetricKey};
use crate::error::CryptoError;

const SALT_CONTEXT: &[u8] = b"confonnx-channel-v1";
const CLIENT_TO_ENCLAVE: &[u8] = b"client-to-enclave key";
const ENCLAVE_TO_CLIENT: &[u8] = b"enclave-to-client key";
const CLIENT_IV: &[u8] = b"client iv";

/// An X25519 key pair. The secret is zeroized on drop by `x25519-dalek`.
pub struct KeyPair {
    pub secret: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = DalekPublic::from(&secret).to_bytes();
        Self { secret, public }
    }
}

/// Directional keys for one key version.
pub struct ChannelKeys {
    pub client_to_enclave: Zeroizing<SymmetricKey>,
    pub enclave_to_client: Zeroizing<SymmetricKey>,
    /// Base IV for client requests; each request XORs its counter in.
    pub client_iv: Iv,
}

/// HKDF salt binding the key version and both public keys.
pub fn channel_salt(
    key_version: u32,
    enclave_public: &PublicKey,
    client_public: &PublicKey,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SALT_CONTEXT);
    hasher.update(key_version.to_be_bytes());
    hasher.update(enclave_public);
    hasher.update(client_public);
    hasher.finalize().into()
}

/// Quote report data: `SHA256(enclave_public | service_id | client_nonce)`.
pub fn report_data(
    enclave_public: &PublicKey,
    service_id: &[u8],
    client_nonce: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(enclave_public);
    hasher.update(service_id);
    hasher.update(client_nonce);
    hasher.finalize().into()
}

/// Perform X25519 Diffie-Hellman and derive both directional keys via HKDF.
///
/// Both sides get identical output since the salt orders the public keys by
/// role, not by who is computing.
pub fn derive_channel_keys(
    our_secret: &StaticSecret,
    their_public: &PublicKey,
    salt: &[u8; 32],
) -> Result<ChannelKeys, CryptoError> {
    let shared_secret = our_secret.diffie_hellman(&DalekPublic::from(*their_public));
    if !shared_secret.was_contributory() {
        return Err(CryptoError::NonContributoryKey);
    }

    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret.as_bytes());

    let mut client_to_enclave = Zeroizing::new([0u8; 32]);
    let mut enclave_to_client = Zeroizing::new([0u8; 32]);
    let mut client_iv = [0u8; 12];

    hkdf.expand(CLIENT_TO_ENCLAVE, &mut client_to_enclave[..])
        .map_err(|_| CryptoError::HkdfExpandFailed)?;
    hkdf.expand(ENCLAVE_TO_CLIENT, &mut enclave_to_client[..])
        .map_err(|_| CryptoError::HkdfExpandFailed)?;
    hkdf.expand(CLIENT_IV, &mut client_iv)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;

    Ok(ChannelKeys {
        client_to_enclave,
        enclave_to_client,
        client_iv,
    })
}
