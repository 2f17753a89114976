use bytes::Bytes;

use crate::error::{RequestError, TransportError};

/// How often a protected request is resent after the enclave rejected it as
/// undecryptable. Each resend is preceded by a forced handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum resends after a cryptographic rejection (excludes the initial
    /// attempt).
    pub max_crypto_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_crypto_retries: 1,
        }
    }
}

impl RetryPolicy {
    /// A policy that performs no retries (single attempt only).
    pub fn none() -> Self {
        Self {
            max_crypto_retries: 0,
        }
    }
}

/// Classified result of one send.
#[derive(Debug)]
pub enum Outcome {
    Delivered(Bytes),
    /// The server answered with error code 2.
    CryptoRejected(RequestError),
    Failed(TransportError),
}

impl Outcome {
    pub fn classify(result: Result<Bytes, TransportError>) -> Self {
        match result {
            Ok(body) => Outcome::Delivered(body),
            Err(TransportError::Rejected(e)) if e.is_crypto_rejection() => {
                Outcome::CryptoRejected(e)
            }
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// What the driver does after an [`Outcome`].
#[derive(Debug)]
pub enum Next {
    Done(Result<Bytes, TransportError>),
    /// Force a handshake and resend the same payload.
    Rehandshake(RequestError),
}

/// Decide the next step given the outcome and the resends already spent.
pub fn decide(outcome: Outcome, policy: &RetryPolicy, retries_used: u32) -> Next {
    match outcome {
        Outcome::Delivered(body) => Next::Done(Ok(body)),
        Outcome::CryptoRejected(e) if retries_used < policy.max_crypto_retries => {
            Next::Rehandshake(e)
        }
        Outcome::CryptoRejected(e) => Next::Done(Err(TransportError::Rejected(e))),
        Outcome::Failed(e) => Next::Done(Err(e)),
    }
}
