pub mod types;

#[cfg(feature = "mock")]
pub mod mock;

use crate::error::AttestError;
use types::{EnclaveIdentity, Quote};

/// Produces quotes binding caller-chosen report data (runs inside the enclave).
pub trait QuoteProvider: Send + Sync {
    fn quote(&self, report_data: &[u8; 32]) -> Result<Quote, AttestError>;
}

/// Checks a quote's authenticity and extracts the enclave identity claims
/// (runs on the client). Policy on the claims is applied by
/// [`ExpectedIdentity`](types::ExpectedIdentity).
pub trait QuoteVerifier: Send + Sync {
    fn verify(&self, quote: &Quote) -> Result<EnclaveIdentity, AttestError>;
}
