pub mod attestation;
pub mod channel;
pub mod crypto;
pub mod error;
pub mod model;
pub mod session;
pub mod tensor;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use error::{Error, RequestError, Result, TransportError};
pub use session::{RetryPolicy, Session, SessionConfig, SessionStats};
pub use tensor::{DType, Tensor, TensorMap};
pub use transport::status::ErrorCode;
pub use transport::Transport;

pub use attestation::types::{EnclaveIdentity, ExpectedIdentity, Quote};
pub use attestation::{QuoteProvider, QuoteVerifier};
pub use channel::{ChannelEngine, HandledMessage, SoftwareChannel};

#[cfg(feature = "http")]
pub use session::HttpSession;
#[cfg(feature = "http")]
pub use transport::http::HttpTransport;

#[cfg(feature = "mock")]
pub use attestation::mock::{MockQuoteProvider, MockQuoteVerifier};
#[cfg(feature = "mock")]
pub use channel::mock::{EnclaveFault, EnclaveModel, LinearModel, MockEnclave, MockHost};
