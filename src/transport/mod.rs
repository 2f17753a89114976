pub mod status;

/// reqwest-backed HTTP transport.
#[cfg(feature = "http")]
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Endpoint path for both key exchange and inference messages.
pub const SCORE_PATH: &str = "score";

/// Endpoint path for model key provisioning.
pub const PROVISION_MODEL_KEY_PATH: &str = "provisionModelKey";

/// One opaque request/response exchange against a path below the server's
/// base URL.
///
/// Implementations attach headers and credentials themselves and must report a
/// non-success status as [`TransportError::Rejected`] so the session can tell
/// a cryptographic rejection apart from connectivity problems.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, path: &str, payload: Bytes) -> Result<Bytes, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, path: &str, payload: Bytes) -> Result<Bytes, TransportError> {
        (**self).send(path, payload).await
    }
}

/// Append a trailing `/` so paths join below the base instead of replacing
/// its last segment.
pub fn normalize_endpoint(url: &str) -> String {
    let url = url.trim();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
