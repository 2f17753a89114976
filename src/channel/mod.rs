pub mod engine;
pub mod wire;

#[cfg(feature = "mock")]
pub mod mock;

use bytes::Bytes;

use crate::error::ChannelError;

pub use engine::SoftwareChannel;

/// Outcome of handing a server message to a [`ChannelEngine`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandledMessage {
    /// Decrypted payload, `None` for key exchange responses.
    pub data: Option<Bytes>,
    /// The key the response was protected with has been superseded on the
    /// server.
    pub key_outdated: bool,
}

/// The attested-channel cryptography a session drives.
///
/// The engine owns all key material. A session calls it under a lock, so
/// implementations need not be internally synchronized.
pub trait ChannelEngine: Send {
    /// Start a key exchange. The returned message is sent to the score path.
    fn make_key_request(&mut self) -> Result<Bytes, ChannelError>;

    /// Process a key exchange response (installing the negotiated key) or a
    /// protected response (decrypting it).
    fn handle_message(&mut self, raw: &[u8]) -> Result<HandledMessage, ChannelError>;

    /// Protect `payload` under the current key.
    fn make_request(&mut self, payload: &[u8]) -> Result<Bytes, ChannelError>;
}

impl<E: ChannelEngine + ?Sized> ChannelEngine for Box<E> {
    fn make_key_request(&mut self) -> Result<Bytes, ChannelError> {
        (**self).make_key_request()
    }

    fn handle_message(&mut self, raw: &[u8]) -> Result<HandledMessage, ChannelError> {
        (**self).handle_message(raw)
    }

    fn make_request(&mut self, payload: &[u8]) -> Result<Bytes, ChannelError> {
        (**self).make_request(payload)
    }
}
