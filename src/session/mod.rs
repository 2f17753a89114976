pub mod driver;
pub mod retry;
pub mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::attestation::types::ExpectedIdentity;
use crate::attestation::QuoteVerifier;
use crate::error::ConfigError;
use crate::transport::normalize_endpoint;

pub use driver::Session;
#[cfg(feature = "http")]
pub use driver::HttpSession;
pub use retry::RetryPolicy;
pub use state::{SessionState, SessionStats};

/// Credentials attached to every request. Bearer and basic are exclusive.
#[derive(Debug)]
pub enum Credentials {
    Bearer(SecretString),
    Basic { user: String, password: SecretString },
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        match self {
            Self::Bearer(token) => {
                Self::Bearer(SecretString::from(token.expose_secret().to_owned()))
            }
            Self::Basic { user, password } => Self::Basic {
                user: user.clone(),
                password: SecretString::from(password.expose_secret().to_owned()),
            },
        }
    }
}

/// Configuration for a session against one endpoint.
///
/// The channel is always X25519 + HKDF-SHA256 + ChaCha20-Poly1305.
#[non_exhaustive]
#[derive(Clone)]
pub struct SessionConfig {
    /// Base URL, normalized to end with `/`.
    pub url: String,

    pub auth: Option<Credentials>,

    /// Expected enclave measurement (empty: unchecked).
    pub expected_enclave_hash: Vec<u8>,

    /// Expected enclave signer (empty: unchecked).
    pub expected_signer: Vec<u8>,

    /// Expected hash of the model the enclave serves, i.e. its service
    /// identifier (empty: unchecked).
    pub expected_model_hash: Vec<u8>,

    /// Accept enclaves running in debug mode.
    pub allow_debug: bool,

    /// TCP connect timeout (default: 10s).
    pub connect_timeout: Duration,

    /// Whole-request timeout (default: 60s).
    pub request_timeout: Duration,

    /// Crypto-rejection retries for inference (default: one).
    pub retry_policy: RetryPolicy,

    /// Quote verification capability. Without one, identity expectations
    /// other than the model hash cannot be met.
    pub quote_verifier: Option<Arc<dyn QuoteVerifier>>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("auth", &self.auth)
            .field("expected_enclave_hash", &hex::encode(&self.expected_enclave_hash))
            .field("expected_signer", &hex::encode(&self.expected_signer))
            .field("expected_model_hash", &hex::encode(&self.expected_model_hash))
            .field("allow_debug", &self.allow_debug)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("quote_verifier", &self.quote_verifier.is_some())
            .finish()
    }
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Identity expectations handed to the channel engine.
    pub fn expected_identity(&self) -> ExpectedIdentity {
        ExpectedIdentity {
            enclave_hash: self.expected_enclave_hash.clone(),
            signer: self.expected_signer.clone(),
            service_id: self.expected_model_hash.clone(),
            allow_debug: self.allow_debug,
        }
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    url: String,
    bearer_token: Option<SecretString>,
    basic_auth: Option<(String, SecretString)>,
    enclave_hash: Option<String>,
    signer: Option<String>,
    model_hash: Option<String>,
    allow_debug: bool,
    connect_timeout: Duration,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    quote_verifier: Option<Arc<dyn QuoteVerifier>>,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            url: String::new(),
            bearer_token: None,
            basic_auth: None,
            enclave_hash: None,
            signer: None,
            model_hash: None,
            allow_debug: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
            quote_verifier: None,
        }
    }
}

impl SessionConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), SecretString::from(password.into())));
        self
    }

    /// Expected enclave measurement, hex-encoded.
    pub fn expected_enclave_hash(mut self, hex: impl Into<String>) -> Self {
        self.enclave_hash = Some(hex.into());
        self
    }

    /// Expected enclave signer, hex-encoded.
    pub fn expected_signer(mut self, hex: impl Into<String>) -> Self {
        self.signer = Some(hex.into());
        self
    }

    /// Expected model hash, hex-encoded (as printed by `hash_model`).
    pub fn expected_model_hash(mut self, hex: impl Into<String>) -> Self {
        self.model_hash = Some(hex.into());
        self
    }

    pub fn allow_debug(mut self, allow: bool) -> Self {
        self.allow_debug = allow;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn quote_verifier(mut self, verifier: Arc<dyn QuoteVerifier>) -> Self {
        self.quote_verifier = Some(verifier);
        self
    }

    /// Build the `SessionConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        let auth = match (self.bearer_token, self.basic_auth) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingAuth),
            (Some(token), None) => Some(Credentials::Bearer(token)),
            (None, Some((user, password))) => Some(Credentials::Basic { user, password }),
            (None, None) => None,
        };
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "connect_timeout",
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "request_timeout",
            });
        }

        Ok(SessionConfig {
            url: normalize_endpoint(&self.url),
            auth,
            expected_enclave_hash: decode_hex("expected_enclave_hash", self.enclave_hash)?,
            expected_signer: decode_hex("expected_signer", self.signer)?,
            expected_model_hash: decode_hex("expected_model_hash", self.model_hash)?,
            allow_debug: self.allow_debug,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            retry_policy: self.retry_policy,
            quote_verifier: self.quote_verifier,
        })
    }
}

fn decode_hex(field: &'static str, value: Option<String>) -> Result<Vec<u8>, ConfigError> {
    match value {
        Some(v) => hex::decode(v.trim()).map_err(|e| ConfigError::InvalidHex {
            field,
            reason: e.to_string(),
        }),
        None => Ok(Vec::new()),
    }
}
