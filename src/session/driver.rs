use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use super::retry::{decide, Next, Outcome, RetryPolicy};
use super::state::{SessionState, SessionStats};
use crate::channel::ChannelEngine;
use crate::error::{Result, SessionError};
use crate::tensor::codec::{decode_tensor_map, encode_tensor_map};
use crate::tensor::TensorMap;
use crate::transport::{normalize_endpoint, Transport, PROVISION_MODEL_KEY_PATH, SCORE_PATH};

/// A client's secure session with one enclave-backed endpoint.
///
/// Handshakes happen on demand: before the first request, after the server
/// signals that the key in use was superseded, and once more when the server
/// rejects a request as undecryptable. Share across tasks via `Arc`.
pub struct Session<E, T> {
    endpoint: String,
    channel: Mutex<E>,
    handshake_gate: tokio::sync::Mutex<()>,
    state: SessionState,
    transport: T,
    retry_policy: RetryPolicy,
}

impl<E, T> std::fmt::Debug for Session<E, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl<E: ChannelEngine, T: Transport> Session<E, T> {
    pub fn new(endpoint: &str, engine: E, transport: T) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint),
            channel: Mutex::new(engine),
            handshake_gate: tokio::sync::Mutex::new(()),
            state: SessionState::new(),
            transport,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy for [`predict`](Self::predict).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Base URL, always ending with `/`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn key_outdated(&self) -> bool {
        self.state.key_outdated()
    }

    /// Handshakes completed minus one; `-1` before the first.
    pub fn key_rollover_count(&self) -> i64 {
        self.state.rollover_count()
    }

    /// Requests that succeeded on a retry after a cryptographic rejection.
    pub fn key_invalid_count(&self) -> u64 {
        self.state.invalid_count()
    }

    pub fn stats(&self) -> SessionStats {
        self.state.snapshot()
    }

    fn engine(&self) -> std::result::Result<MutexGuard<'_, E>, SessionError> {
        self.channel.lock().map_err(|_| SessionError::Poisoned)
    }

    /// Run a key exchange if the key is outdated, or unconditionally when
    /// `force` is set. Concurrent callers are serialized; a non-forced caller
    /// that waited for another caller's handshake does not start its own.
    pub async fn establish_channel_if_needed(&self, force: bool) -> Result<()> {
        if !force && !self.state.key_outdated() {
            return Ok(());
        }

        let _gate = self.handshake_gate.lock().await;
        if !force && !self.state.key_outdated() {
            tracing::trace!("handshake completed by a concurrent caller");
            return Ok(());
        }

        tracing::info!(endpoint = %self.endpoint, forced = force, "handshake started");
        let key_request = self.engine()?.make_key_request()?;
        let response = self.transport.send(SCORE_PATH, key_request).await?;
        let rollover_count = {
            let mut engine = self.engine()?;
            engine.handle_message(&response)?;
            self.state.record_handshake()
        };
        tracing::info!(rollover_count, "handshake done");
        Ok(())
    }

    /// Run inference on `inputs` and return the model's outputs.
    pub async fn predict(&self, inputs: &TensorMap) -> Result<TensorMap> {
        if inputs.is_empty() {
            return Err(SessionError::EmptyInputs.into());
        }
        let payload = encode_tensor_map(inputs)?;

        let data = self
            .exchange(SCORE_PATH, &payload, self.retry_policy)
            .await?
            .ok_or(SessionError::MissingResponseData)?;
        Ok(decode_tensor_map(data)?)
    }

    /// Send the model decryption key to the enclave. Never retried: a
    /// rejection surfaces to the caller as is.
    pub async fn provision_model_key(&self, model_key: &[u8]) -> Result<()> {
        self.exchange(PROVISION_MODEL_KEY_PATH, model_key, RetryPolicy::none())
            .await?;
        tracing::info!("model key provisioned");
        Ok(())
    }

    async fn exchange(
        &self,
        path: &str,
        payload: &[u8],
        policy: RetryPolicy,
    ) -> Result<Option<Bytes>> {
        self.establish_channel_if_needed(false).await?;

        let mut retries = 0;
        loop {
            let (request, generation) = {
                let mut engine = self.engine()?;
                (engine.make_request(payload)?, self.state.rollover_count())
            };
            tracing::debug!(path, bytes = request.len(), "request sent");

            let outcome = Outcome::classify(self.transport.send(path, request).await);
            match decide(outcome, &policy, retries) {
                Next::Done(result) => {
                    let response = result?;
                    if retries > 0 {
                        let invalid_count = self.state.record_key_invalid();
                        tracing::debug!(path, invalid_count, "retried request accepted");
                    }
                    return self.open_response(&response, generation);
                }
                Next::Rehandshake(rejection) => {
                    retries += 1;
                    self.state.mark_outdated();
                    tracing::warn!(
                        path,
                        attempt = retries,
                        error = %rejection,
                        "retry triggered"
                    );
                    self.establish_channel_if_needed(true).await?;
                }
            }
        }
    }

    fn open_response(&self, raw: &[u8], generation: i64) -> Result<Option<Bytes>> {
        let handled = self.engine()?.handle_message(raw)?;
        if handled.key_outdated && self.state.mark_outdated_since(generation) {
            tracing::info!(rollover_count = generation, "key rollover signalled");
        }
        Ok(handled.data)
    }
}

/// Session over HTTP with the software channel engine.
#[cfg(feature = "http")]
pub type HttpSession =
    Session<crate::channel::SoftwareChannel, crate::transport::http::HttpTransport>;

#[cfg(feature = "http")]
impl HttpSession {
    /// Build the transport and channel engine described by `config`. Fails
    /// before any network activity if the configuration is unusable.
    pub fn from_config(config: &super::SessionConfig) -> Result<Self> {
        let transport = crate::transport::http::HttpTransport::from_config(config)?;
        let mut channel = crate::channel::SoftwareChannel::new(config.expected_identity());
        if let Some(verifier) = &config.quote_verifier {
            channel = channel.with_verifier(std::sync::Arc::clone(verifier));
        }
        Ok(Session::new(&config.url, channel, transport).with_retry_policy(config.retry_policy))
    }
}
