use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;

use super::wire::{self, KeyRequest, KeyResponse, Message, MessageKind, SealedRequest};
use super::{ChannelEngine, HandledMessage};
use crate::attestation::types::{ExpectedIdentity, Quote};
use crate::attestation::QuoteVerifier;
use crate::crypto::kex::{self, ChannelKeys, KeyPair};
use crate::crypto::seal;
use crate::error::{AttestError, ChannelError, CryptoError};

/// Keys negotiated for one server key version.
struct Epoch {
    version: u32,
    keys: ChannelKeys,
}

/// Software channel engine: X25519 + HKDF-SHA256 + ChaCha20-Poly1305.
///
/// Keeps the current and the previous key epoch so that a response to a
/// request sealed before a re-handshake still opens. The request counter is
/// never reset, so no IV repeats under a key that is negotiated twice.
pub struct SoftwareChannel {
    expected: ExpectedIdentity,
    verifier: Option<Arc<dyn QuoteVerifier>>,
    key_pair: KeyPair,
    pending_nonce: Option<[u8; 32]>,
    current: Option<Epoch>,
    previous: Option<Epoch>,
    counter: u64,
}

impl fmt::Debug for SoftwareChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareChannel")
            .field("expected", &self.expected)
            .field("has_verifier", &self.verifier.is_some())
            .field("key_version", &self.key_version())
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl SoftwareChannel {
    pub fn new(expected: ExpectedIdentity) -> Self {
        Self {
            expected,
            verifier: None,
            key_pair: KeyPair::generate(),
            pending_nonce: None,
            current: None,
            previous: None,
            counter: 0,
        }
    }

    /// Verify enclave quotes with `verifier`.
    pub fn with_verifier(mut self, verifier: Arc<dyn QuoteVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Server key version requests are currently sealed under.
    pub fn key_version(&self) -> Option<u32> {
        self.current.as_ref().map(|e| e.version)
    }

    fn epoch(&self, version: u32) -> Option<&Epoch> {
        [self.current.as_ref(), self.previous.as_ref()]
            .into_iter()
            .flatten()
            .find(|e| e.version == version)
    }

    fn verify_enclave(
        &self,
        resp: &KeyResponse,
        client_nonce: &[u8; 32],
    ) -> Result<(), ChannelError> {
        let report_data = kex::report_data(&resp.public_key, &resp.service_id, client_nonce);

        match (&resp.quote, &self.verifier) {
            (Some(raw), Some(verifier)) => {
                if !self.expected.requires_quote() {
                    tracing::warn!(
                        "expected enclave signer / hash not provided, \
                         skipping identity verification"
                    );
                }
                let identity = verifier.verify(&Quote::new(raw.clone()))?;
                self.expected.verify(&identity, &report_data)?;
            }
            (Some(_), None) => {
                if self.expected.requires_quote() {
                    return Err(AttestError::NoVerifier.into());
                }
                tracing::warn!("no quote verifier configured, enclave identity not verified");
            }
            (None, _) => {
                if self.expected.requires_quote() {
                    return Err(AttestError::MissingQuote.into());
                }
            }
        }

        if !self.expected.service_id.is_empty() && resp.service_id != self.expected.service_id {
            return Err(ChannelError::ServiceIdMismatch {
                expected: hex::encode(&self.expected.service_id),
                actual: hex::encode(&resp.service_id),
            });
        }
        Ok(())
    }

    fn install_key(&mut self, resp: KeyResponse) -> Result<(), ChannelError> {
        let client_nonce = self.pending_nonce.take().ok_or_else(|| {
            ChannelError::UnexpectedMessage {
                expected: "response (4)",
                actual: "key_response (2) without a pending key request".into(),
            }
        })?;
        self.verify_enclave(&resp, &client_nonce)?;

        let salt = kex::channel_salt(resp.key_version, &resp.public_key, &self.key_pair.public);
        let keys = kex::derive_channel_keys(&self.key_pair.secret, &resp.public_key, &salt)?;
        let epoch = Epoch {
            version: resp.key_version,
            keys,
        };

        match self.current.take() {
            Some(old) if old.version != epoch.version => self.previous = Some(old),
            _ => {}
        }
        self.current = Some(epoch);
        tracing::debug!(key_version = resp.key_version, "channel key installed");
        Ok(())
    }
}

impl ChannelEngine for SoftwareChannel {
    fn make_key_request(&mut self) -> Result<Bytes, ChannelError> {
        let mut nonce = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        self.pending_nonce = Some(nonce);
        Ok(wire::encode_key_request(&KeyRequest { nonce }))
    }

    fn handle_message(&mut self, raw: &[u8]) -> Result<HandledMessage, ChannelError> {
        match wire::parse_message(raw)? {
            Message::KeyResponse(resp) => {
                self.install_key(resp)?;
                Ok(HandledMessage::default())
            }
            Message::Response(resp) => {
                let epoch = self
                    .epoch(resp.key_version)
                    .ok_or(ChannelError::UnknownKeyVersion(resp.key_version))?;
                let plaintext = seal::open(
                    &epoch.keys.enclave_to_client,
                    &resp.iv,
                    &wire::aad(MessageKind::Response, resp.key_version),
                    &resp.ciphertext,
                )?;
                Ok(HandledMessage {
                    data: Some(Bytes::from(plaintext)),
                    key_outdated: resp.key_outdated,
                })
            }
            other => Err(ChannelError::UnexpectedMessage {
                expected: "key_response (2) or response (4)",
                actual: format!("{:?}", other.kind()),
            }),
        }
    }

    fn make_request(&mut self, payload: &[u8]) -> Result<Bytes, ChannelError> {
        let epoch = self.current.as_ref().ok_or(ChannelError::NoKey)?;
        let counter = self.counter;
        self.counter = counter.checked_add(1).ok_or(CryptoError::NonceOverflow)?;

        let iv = seal::request_iv(&epoch.keys.client_iv, counter);
        let ciphertext = seal::seal(
            &epoch.keys.client_to_enclave,
            &iv,
            &wire::aad(MessageKind::Request, epoch.version),
            payload,
        )?;
        Ok(wire::encode_request(&SealedRequest {
            key_version: epoch.version,
            client_public: self.key_pair.public,
            iv,
            ciphertext: Bytes::from(ciphertext),
        }))
    }
}
