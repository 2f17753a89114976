use std::io;

use crate::transport::status::ErrorCode;

/// Errors from building a [`SessionConfig`](crate::SessionConfig) or from
/// caller-supplied arguments, raised before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("only one of bearer token or basic credentials can be specified")]
    ConflictingAuth,

    #[error("server URL must not be empty")]
    EmptyUrl,

    #[error("invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{field} is not valid hex: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("{field} must be > 0")]
    ZeroTimeout { field: &'static str },

    #[error("HTTP client initialization failed: {0}")]
    HttpClient(String),
}

/// A request the server answered with a non-success HTTP status.
///
/// The body is parsed as `{"error_code": <int>, "error_message": <str>}`. When
/// it has a different shape the code is [`ErrorCode::Unknown`] and the message
/// is the raw body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("HTTP status={status}, error code={code}, error message={message}")]
pub struct RequestError {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
}

impl RequestError {
    /// Build from a status code and the raw response body.
    pub fn from_body(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            error_code: i64,
            error_message: String,
        }

        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => Self {
                status,
                code: ErrorCode::from_i64(parsed.error_code),
                message: parsed.error_message,
            },
            Err(_) => Self {
                status,
                code: ErrorCode::Unknown,
                message: body.to_string(),
            },
        }
    }

    /// Whether the enclave could not decrypt or authenticate the payload under
    /// any key it currently holds.
    pub fn is_crypto_rejection(&self) -> bool {
        self.code == ErrorCode::Crypto
    }
}

/// Errors from the Transport Adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to read response from {url}: {message}")]
    Body { url: String, message: String },

    #[error(transparent)]
    Rejected(#[from] RequestError),
}

/// Errors from symmetric and key-agreement primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("HKDF expand failed: invalid length")]
    HkdfExpandFailed,

    #[error("AEAD encryption failed")]
    SealFailed,

    #[error("AEAD decryption failed: ciphertext is invalid or tampered")]
    OpenFailed,

    #[error("nonce overflow: maximum request counter reached")]
    NonceOverflow,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("non-contributory key exchange: peer sent small-subgroup or identity point")]
    NonContributoryKey,
}

/// Errors from quote generation and enclave identity verification.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("quote generation failed: {0}")]
    GenerationFailed(String),

    #[error("quote verification failed: {0}")]
    VerificationFailed(String),

    #[error("enclave {what} mismatch: expected={expected} actual={actual}")]
    IdentityMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("debug-enabled enclave rejected")]
    DebugEnclave,

    #[error("no quote received from server, cannot verify identity")]
    MissingQuote,

    #[error("cannot verify enclave identity without quote verification support")]
    NoVerifier,
}

/// Errors raised by a Channel Engine while building or handling messages.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid magic bytes: expected 0xCF4E, got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message kind: 0x{0:02X}")]
    UnknownKind(u8),

    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: String,
    },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("no channel key established; issue a key request first")]
    NoKey,

    #[error("no channel key with version {0}")]
    UnknownKeyVersion(u32),

    #[error("enclave service identifier mismatch: expected={expected} actual={actual}")]
    ServiceIdMismatch { expected: String, actual: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Attestation(#[from] AttestError),
}

/// Errors from the tensor codec.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("unknown dtype tag: {0}")]
    UnknownDType(u8),

    #[error("unsupported element type: {0}")]
    UnsupportedType(String),

    #[error("dtype mismatch: tensor holds {actual}, requested {requested}")]
    DTypeMismatch {
        actual: &'static str,
        requested: &'static str,
    },

    #[error("tensor shape overflow: dimensions produce more elements than representable")]
    ShapeOverflow,

    #[error("too many dimensions: {0} (max 32)")]
    TooManyDims(usize),

    #[error("tensor data size mismatch: expected {expected} bytes, got {actual}")]
    DataSizeMismatch { expected: usize, actual: usize },

    #[error("invalid tensor name: {0}")]
    InvalidName(#[from] std::string::FromUtf8Error),

    #[error("tensor name too long: {0} bytes")]
    NameTooLong(usize),

    #[error("duplicate tensor name: {0}")]
    DuplicateName(String),

    #[error("incomplete tensor header")]
    IncompleteHeader,

    #[error("tensor padding contains non-zero bytes")]
    InvalidPadding,

    #[error("{0} trailing bytes after tensor map")]
    TrailingBytes(usize),

    #[error("invalid JSON tensor {name}: {reason}")]
    Json { name: String, reason: String },
}

/// Errors from the session protocol driver itself.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("predict requires at least one input tensor")]
    EmptyInputs,

    #[error("enclave response carried no payload")]
    MissingResponseData,

    #[error("channel engine lock poisoned by a panicking caller")]
    Poisoned,
}

/// Errors from the offline model utilities.
#[derive(Debug, thiserror::Error)]
pub enum ModelToolError {
    #[error("model key is not valid hex: {0}")]
    InvalidKeyHex(#[from] hex::FromHexError),

    #[error("invalid model key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    #[error("model encryption failed")]
    EncryptFailed,

    #[error("model decryption failed: wrong key or corrupted file")]
    DecryptFailed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Model(#[from] ModelToolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The structured server rejection behind this error, if any.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            Error::Transport(TransportError::Rejected(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self {
        Error::Transport(TransportError::Rejected(e))
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Channel(ChannelError::Crypto(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
