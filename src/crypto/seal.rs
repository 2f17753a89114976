use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use super::{Iv, SymmetricKey, IV_LEN};
use crate::error::CryptoError;

/// IV for the request with the given counter: the base IV with the counter
/// (big-endian) XORed into its last eight bytes.
pub fn request_iv(base: &Iv, counter: u64) -> Iv {
    let mut iv = *base;
    for (b, c) in iv[IV_LEN - 8..].iter_mut().zip(counter.to_be_bytes()) {
        *b ^= c;
    }
    iv
}

/// A fresh random IV.
pub fn random_iv() -> Iv {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt `plaintext` under `key`. Returns ciphertext with the tag appended.
pub fn seal(
    key: &SymmetricKey,
    iv: &Iv,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::SealFailed)
}

/// Decrypt and authenticate `ciphertext` (tag appended) under `key`.
pub fn open(
    key: &SymmetricKey,
    iv: &Iv,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::TAG_LEN;

    const KEY: SymmetricKey = [0x42; 32];
    const IV: Iv = [0xAA; 12];

    #[test]
    fn seal_then_open() {
        let plaintext = b"hello confidential world";
        let ciphertext = seal(&KEY, &IV, b"header", plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
        let recovered = open(&KEY, &IV, b"header", &ciphertext).unwrap();
        assert_eq!(&recovered, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut ciphertext = seal(&KEY, &IV, b"", b"secret").unwrap();
        ciphertext[0] ^= 0xFF;
        assert!(matches!(open(&KEY, &IV, b"", &ciphertext), Err(CryptoError::OpenFailed)));
    }

    #[test]
    fn wrong_aad_fails() {
        let ciphertext = seal(&KEY, &IV, b"kind=3", b"secret").unwrap();
        assert!(matches!(
            open(&KEY, &IV, b"kind=4", &ciphertext),
            Err(CryptoError::OpenFailed)
        ));
    }

    #[test]
    fn request_ivs_are_distinct() {
        let base = [0u8; 12];
        assert_eq!(request_iv(&base, 0), base);
        let iv1 = request_iv(&base, 1);
        assert_eq!(iv1[11], 1);
        assert_eq!(&iv1[..11], &[0u8; 11]);
        assert_ne!(request_iv(&IV, 1), request_iv(&IV, 2));
        assert_eq!(&request_iv(&IV, u64::MAX)[..4], &IV[..4]);
    }
}
