use crate::error::AttestError;

/// Raw quote bytes as returned by the enclave (opaque to the channel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub raw: Vec<u8>,
}

impl Quote {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }
}

/// Claims extracted from a verified quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclaveIdentity {
    /// Measurement of the enclave code (MRENCLAVE).
    pub unique_id: Vec<u8>,
    /// Hash of the enclave signing key (MRSIGNER).
    pub signer_id: Vec<u8>,
    pub product_id: u16,
    pub security_version: u16,
    pub debug: bool,
    /// Data the enclave bound into the quote.
    pub report_data: [u8; 32],
}

/// Enclave identity the client is willing to trust.
///
/// Empty byte strings are not checked. `service_id` is the expected loaded
/// model hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedIdentity {
    pub enclave_hash: Vec<u8>,
    pub signer: Vec<u8>,
    pub service_id: Vec<u8>,
    pub allow_debug: bool,
}

impl ExpectedIdentity {
    /// Whether any check needs a quote to be evaluated.
    pub fn requires_quote(&self) -> bool {
        !self.enclave_hash.is_empty() || !self.signer.is_empty()
    }

    /// Check a verified identity against the expectations and the report data
    /// the channel computed for this key exchange.
    pub fn verify(
        &self,
        identity: &EnclaveIdentity,
        expected_report_data: &[u8; 32],
    ) -> Result<(), AttestError> {
        if !self.enclave_hash.is_empty() && identity.unique_id != self.enclave_hash {
            return Err(mismatch("hash", &self.enclave_hash, &identity.unique_id));
        }
        if !self.signer.is_empty() && identity.signer_id != self.signer {
            return Err(mismatch("signer", &self.signer, &identity.signer_id));
        }
        if identity.product_id != 1 {
            return Err(AttestError::VerificationFailed(format!(
                "product id check failed: {}",
                identity.product_id
            )));
        }
        if identity.security_version < 1 {
            return Err(AttestError::VerificationFailed(format!(
                "security version check failed: {}",
                identity.security_version
            )));
        }
        if identity.debug && !self.allow_debug {
            return Err(AttestError::DebugEnclave);
        }
        if &identity.report_data != expected_report_data {
            return Err(mismatch("quote data", expected_report_data, &identity.report_data));
        }
        Ok(())
    }
}

fn mismatch(what: &'static str, expected: &[u8], actual: &[u8]) -> AttestError {
    AttestError::IdentityMismatch {
        what,
        expected: hex::encode(expected),
        actual: hex::encode(actual),
    }
}
