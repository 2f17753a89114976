use std::fmt;

/// Machine-readable error code carried in the server's JSON error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    UnknownError,
    /// The enclave could not decrypt or authenticate the payload under any key
    /// it holds. The only code the session retries on.
    Crypto,
    ModelLoading,
    SessionAlreadyInitialized,
    SessionInitialization,
    PayloadParse,
    Inference,
    OutputBufferTooSmall,
    OutputSerialization,
    Attestation,
    KeyRefresh,
    UnknownRequestType,
    ModelAlreadyInitialized,
    /// A numeric code outside the table (the server uses -1 for auth failures).
    Other(i64),
    /// The body was not a structured error.
    Unknown,
}

impl ErrorCode {
    pub fn from_i64(v: i64) -> Self {
        match v {
            0 => Self::Success,
            1 => Self::UnknownError,
            2 => Self::Crypto,
            3 => Self::ModelLoading,
            4 => Self::SessionAlreadyInitialized,
            5 => Self::SessionInitialization,
            6 => Self::PayloadParse,
            7 => Self::Inference,
            8 => Self::OutputBufferTooSmall,
            9 => Self::OutputSerialization,
            10 => Self::Attestation,
            11 => Self::KeyRefresh,
            12 => Self::UnknownRequestType,
            13 => Self::ModelAlreadyInitialized,
            other => Self::Other(other),
        }
    }

    /// Numeric wire value, `None` for [`ErrorCode::Unknown`].
    pub fn as_i64(self) -> Option<i64> {
        let v = match self {
            Self::Success => 0,
            Self::UnknownError => 1,
            Self::Crypto => 2,
            Self::ModelLoading => 3,
            Self::SessionAlreadyInitialized => 4,
            Self::SessionInitialization => 5,
            Self::PayloadParse => 6,
            Self::Inference => 7,
            Self::OutputBufferTooSmall => 8,
            Self::OutputSerialization => 9,
            Self::Attestation => 10,
            Self::KeyRefresh => 11,
            Self::UnknownRequestType => 12,
            Self::ModelAlreadyInitialized => 13,
            Self::Other(v) => v,
            Self::Unknown => return None,
        };
        Some(v)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_i64() {
            Some(v) => write!(f, "{v}"),
            None => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_values_roundtrip() {
        for v in -1..=14 {
            assert_eq!(ErrorCode::from_i64(v).as_i64(), Some(v));
        }
        assert_eq!(ErrorCode::from_i64(2), ErrorCode::Crypto);
        assert_eq!(ErrorCode::from_i64(99), ErrorCode::Other(99));
    }

    #[test]
    fn display() {
        assert_eq!(ErrorCode::Crypto.to_string(), "2");
        assert_eq!(ErrorCode::Other(-1).to_string(), "-1");
        assert_eq!(ErrorCode::Unknown.to_string(), "unknown");
    }
}
