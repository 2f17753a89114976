use bytes::{Buf, BufMut, BytesMut};

use super::types::{EnclaveIdentity, Quote};
use super::{QuoteProvider, QuoteVerifier};
use crate::error::AttestError;

const MARKER: &[u8] = b"MOCK_QUOTE_V1\0";

/// Mock quote provider for testing. Emits the configured identity claims and
/// the report data in a length-prefixed layout behind a marker.
///
/// # Security Warning
///
/// Quotes from this provider carry **no signature** and must never be trusted
/// in production. It is only compiled with `features = ["mock"]`.
#[derive(Debug, Clone)]
pub struct MockQuoteProvider {
    pub unique_id: Vec<u8>,
    pub signer_id: Vec<u8>,
    pub product_id: u16,
    pub security_version: u16,
    pub debug: bool,
}

impl MockQuoteProvider {
    pub fn new(unique_id: Vec<u8>, signer_id: Vec<u8>) -> Self {
        Self {
            unique_id,
            signer_id,
            product_id: 1,
            security_version: 1,
            debug: false,
        }
    }
}

impl Default for MockQuoteProvider {
    fn default() -> Self {
        Self::new(vec![0x5A; 32], vec![0xA5; 32])
    }
}

impl QuoteProvider for MockQuoteProvider {
    fn quote(&self, report_data: &[u8; 32]) -> Result<Quote, AttestError> {
        let mut raw = BytesMut::new();
        raw.put_slice(MARKER);
        for field in [&self.unique_id, &self.signer_id] {
            raw.put_u32_le(field.len() as u32);
            raw.put_slice(field);
        }
        raw.put_u16_le(self.product_id);
        raw.put_u16_le(self.security_version);
        raw.put_u8(self.debug as u8);
        raw.put_slice(report_data);
        Ok(Quote::new(raw.to_vec()))
    }
}

/// Mock quote verifier. Accepts any quote produced by [`MockQuoteProvider`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockQuoteVerifier;

impl MockQuoteVerifier {
    pub fn new() -> Self {
        Self
    }
}

impl QuoteVerifier for MockQuoteVerifier {
    fn verify(&self, quote: &Quote) -> Result<EnclaveIdentity, AttestError> {
        let Some(mut cursor) = quote.raw.strip_prefix(MARKER) else {
            return Err(AttestError::VerificationFailed(
                "not a mock quote".to_string(),
            ));
        };

        let mut fields = Vec::with_capacity(2);
        for _ in 0..2 {
            if cursor.remaining() < 4 {
                return Err(truncated());
            }
            let len = cursor.get_u32_le() as usize;
            if cursor.remaining() < len {
                return Err(truncated());
            }
            fields.push(cursor[..len].to_vec());
            cursor.advance(len);
        }

        if cursor.remaining() != 2 + 2 + 1 + 32 {
            return Err(truncated());
        }
        let product_id = cursor.get_u16_le();
        let security_version = cursor.get_u16_le();
        let debug = cursor.get_u8() != 0;
        let mut report_data = [0u8; 32];
        cursor.copy_to_slice(&mut report_data);

        let signer_id = fields.pop().unwrap_or_default();
        let unique_id = fields.pop().unwrap_or_default();
        Ok(EnclaveIdentity {
            unique_id,
            signer_id,
            product_id,
            security_version,
            debug,
            report_data,
        })
    }
}

fn truncated() -> AttestError {
    AttestError::VerificationFailed("truncated mock quote".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_roundtrip() {
        let provider = MockQuoteProvider::new(vec![1; 32], vec![2; 32]);
        let quote = provider.quote(&[7; 32]).unwrap();
        let identity = MockQuoteVerifier::new().verify(&quote).unwrap();
        assert_eq!(identity.unique_id, vec![1; 32]);
        assert_eq!(identity.signer_id, vec![2; 32]);
        assert_eq!(identity.product_id, 1);
        assert_eq!(identity.security_version, 1);
        assert!(!identity.debug);
        assert_eq!(identity.report_data, [7; 32]);
    }

    #[test]
    fn mock_rejects_foreign_quote() {
        let result = MockQuoteVerifier.verify(&Quote::new(b"INVALID".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn mock_rejects_truncated() {
        let mut quote = MockQuoteProvider::default().quote(&[0; 32]).unwrap();
        quote.raw.truncate(quote.raw.len() - 1);
        assert!(MockQuoteVerifier.verify(&quote).is_err());
    }
}
