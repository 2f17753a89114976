//! In-process enclave peer for tests and demos.
//!
//! # Security Warning
//!
//! Nothing here is protected by hardware. Only compiled with
//! `features = ["mock"]`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;

use super::wire::{
    self, KeyRequest, KeyResponse, Message, MessageKind, SealedRequest, SealedResponse,
};
use crate::attestation::QuoteProvider;
use crate::crypto::kex::{self, KeyPair};
use crate::crypto::seal;
use crate::error::{RequestError, TransportError};
use crate::model;
use crate::tensor::codec::{decode_tensor_map, encode_tensor_map};
use crate::tensor::{Tensor, TensorMap};
use crate::transport::status::ErrorCode;
use crate::transport::{Transport, PROVISION_MODEL_KEY_PATH, SCORE_PATH};

/// A structured failure, rendered the way the server reports errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclaveFault {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
}

impl EnclaveFault {
    /// An error raised inside the enclave (HTTP 400).
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: 400,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self {
            status: 404,
            code: ErrorCode::Other(-1),
            message: format!("unknown endpoint: {path}"),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: 401,
            code: ErrorCode::Other(-1),
            message: "Invalid authorization key".into(),
        }
    }

    /// JSON error body: `{"error_code": .., "error_message": ..}`.
    pub fn body(&self) -> String {
        serde_json::json!({
            "error_code": self.code.as_i64().unwrap_or(-1),
            "error_message": self.message,
        })
        .to_string()
    }
}

impl From<EnclaveFault> for RequestError {
    fn from(fault: EnclaveFault) -> Self {
        RequestError::from_body(fault.status, &fault.body())
    }
}

/// The computation an enclave serves.
pub trait EnclaveModel: Send + Sync {
    fn run(&self, inputs: &TensorMap) -> Result<TensorMap, EnclaveFault>;
}

impl<F> EnclaveModel for F
where
    F: Fn(&TensorMap) -> Result<TensorMap, EnclaveFault> + Send + Sync,
{
    fn run(&self, inputs: &TensorMap) -> Result<TensorMap, EnclaveFault> {
        self(inputs)
    }
}

/// `output = input · weights` over f32 matrices.
#[derive(Debug, Clone)]
pub struct LinearModel {
    input: String,
    output: String,
    weights: Vec<f32>,
    in_features: usize,
    out_features: usize,
}

impl LinearModel {
    /// `weights` is given row by row, `in_features × out_features`.
    pub fn new(input: &str, output: &str, weights: &[&[f32]]) -> Self {
        let out_features = weights.first().map_or(0, |row| row.len());
        Self {
            input: input.to_string(),
            output: output.to_string(),
            weights: weights.iter().flat_map(|row| row.iter().copied()).collect(),
            in_features: weights.len(),
            out_features,
        }
    }

    /// The `X [m,2] · W [[1],[2]] → Y [m,1]` model.
    pub fn golden() -> Self {
        Self::new("X", "Y", &[&[1.0], &[2.0]])
    }
}

impl EnclaveModel for LinearModel {
    fn run(&self, inputs: &TensorMap) -> Result<TensorMap, EnclaveFault> {
        let x = inputs.get(&self.input).ok_or_else(|| {
            EnclaveFault::new(ErrorCode::Inference, format!("missing input {}", self.input))
        })?;
        let rows = match x.shape() {
            [m, k] if *k as usize == self.in_features => *m as usize,
            other => {
                return Err(EnclaveFault::new(
                    ErrorCode::Inference,
                    format!("invalid input shape {other:?}"),
                ))
            }
        };
        let values = x
            .to_vec::<f32>()
            .map_err(|e| EnclaveFault::new(ErrorCode::Inference, e.to_string()))?;

        let mut out = vec![0f32; rows * self.out_features];
        for r in 0..rows {
            for c in 0..self.out_features {
                out[r * self.out_features + c] = (0..self.in_features)
                    .map(|k| {
                        values[r * self.in_features + k] * self.weights[k * self.out_features + c]
                    })
                    .sum();
            }
        }

        let y = Tensor::from_vec(vec![rows as u32, self.out_features as u32], &out)
            .map_err(|e| EnclaveFault::new(ErrorCode::OutputSerialization, e.to_string()))?;
        Ok(TensorMap::from([(self.output.clone(), y)]))
    }
}

struct EnclaveKey {
    version: u32,
    key_pair: KeyPair,
}

impl EnclaveKey {
    fn new(version: u32) -> Self {
        Self {
            version,
            key_pair: KeyPair::generate(),
        }
    }
}

/// Server side of the channel: holds a rotating key ring, answers key
/// requests and serves a model.
///
/// Requests under the previous key version are still served but flagged
/// outdated. Any other version fails with error code 2.
pub struct MockEnclave {
    current: EnclaveKey,
    previous: Option<EnclaveKey>,
    service_id: Vec<u8>,
    quote_provider: Option<Arc<dyn QuoteProvider>>,
    model: Arc<dyn EnclaveModel>,
    encrypted_model: Option<Vec<u8>>,
    model_loaded: bool,
}

impl MockEnclave {
    pub fn new(model: impl EnclaveModel + 'static) -> Self {
        Self {
            current: EnclaveKey::new(1),
            previous: None,
            service_id: Vec::new(),
            quote_provider: None,
            model: Arc::new(model),
            encrypted_model: None,
            model_loaded: true,
        }
    }

    pub fn with_service_id(mut self, service_id: Vec<u8>) -> Self {
        self.service_id = service_id;
        self
    }

    pub fn with_quote_provider(mut self, provider: Arc<dyn QuoteProvider>) -> Self {
        self.quote_provider = Some(provider);
        self
    }

    /// Serve nothing until the model key is provisioned and `encrypted`
    /// decrypts under it.
    pub fn with_encrypted_model(mut self, encrypted: Vec<u8>) -> Self {
        self.encrypted_model = Some(encrypted);
        self.model_loaded = false;
        self
    }

    pub fn key_version(&self) -> u32 {
        self.current.version
    }

    pub fn model_loaded(&self) -> bool {
        self.model_loaded
    }

    /// Replace the current key; the old one is kept as the previous version.
    pub fn rotate_key(&mut self) {
        let next = EnclaveKey::new(self.current.version.wrapping_add(1));
        self.previous = Some(std::mem::replace(&mut self.current, next));
        tracing::debug!(key_version = self.current.version, "enclave key rotated");
    }

    /// Answer one request to `path`.
    pub fn handle(&mut self, path: &str, body: &[u8]) -> Result<Bytes, EnclaveFault> {
        if path != SCORE_PATH && path != PROVISION_MODEL_KEY_PATH {
            return Err(EnclaveFault::not_found(path));
        }
        let msg = wire::parse_message(body)
            .map_err(|e| EnclaveFault::new(ErrorCode::PayloadParse, e.to_string()))?;
        match (path, msg) {
            (SCORE_PATH, Message::KeyRequest(req)) => self.key_response(&req),
            (SCORE_PATH, Message::Request(req)) => {
                let (plaintext, version, outdated) = self.open_request(&req)?;
                let outputs = self.predict(plaintext)?;
                self.seal_response(&req, version, outdated, &outputs)
            }
            (PROVISION_MODEL_KEY_PATH, Message::Request(req)) => {
                let (plaintext, version, outdated) = self.open_request(&req)?;
                self.provision(&plaintext)?;
                self.seal_response(&req, version, outdated, &[])
            }
            (SCORE_PATH | PROVISION_MODEL_KEY_PATH, other) => Err(EnclaveFault::new(
                ErrorCode::UnknownRequestType,
                format!("unexpected message kind {:?}", other.kind()),
            )),
            (other, _) => Err(EnclaveFault::not_found(other)),
        }
    }

    fn key_response(&self, req: &KeyRequest) -> Result<Bytes, EnclaveFault> {
        let public_key = self.current.key_pair.public;
        let quote = match &self.quote_provider {
            Some(provider) => {
                let report_data = kex::report_data(&public_key, &self.service_id, &req.nonce);
                let quote = provider
                    .quote(&report_data)
                    .map_err(|e| EnclaveFault::new(ErrorCode::Attestation, e.to_string()))?;
                Some(quote.raw)
            }
            None => None,
        };
        let mut nonce = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        Ok(wire::encode_key_response(&KeyResponse {
            key_version: self.current.version,
            nonce,
            public_key,
            service_id: self.service_id.clone(),
            quote,
        }))
    }

    fn key_for(&self, version: u32) -> Option<(&EnclaveKey, bool)> {
        if version == self.current.version {
            return Some((&self.current, false));
        }
        self.previous
            .as_ref()
            .filter(|k| k.version == version)
            .map(|k| (k, true))
    }

    fn open_request(&self, req: &SealedRequest) -> Result<(Vec<u8>, u32, bool), EnclaveFault> {
        let (key, outdated) = self.key_for(req.key_version).ok_or_else(|| {
            EnclaveFault::new(ErrorCode::Crypto, "key with specified version not found")
        })?;
        let salt = kex::channel_salt(req.key_version, &key.key_pair.public, &req.client_public);
        let keys = kex::derive_channel_keys(&key.key_pair.secret, &req.client_public, &salt)
            .map_err(|e| EnclaveFault::new(ErrorCode::Crypto, e.to_string()))?;
        let plaintext = seal::open(
            &keys.client_to_enclave,
            &req.iv,
            &wire::aad(MessageKind::Request, req.key_version),
            &req.ciphertext,
        )
        .map_err(|e| EnclaveFault::new(ErrorCode::Crypto, e.to_string()))?;
        Ok((plaintext, req.key_version, outdated))
    }

    fn seal_response(
        &self,
        req: &SealedRequest,
        version: u32,
        outdated: bool,
        plaintext: &[u8],
    ) -> Result<Bytes, EnclaveFault> {
        let (key, _) = self
            .key_for(version)
            .ok_or_else(|| EnclaveFault::new(ErrorCode::Crypto, "key vanished during request"))?;
        let salt = kex::channel_salt(version, &key.key_pair.public, &req.client_public);
        let keys = kex::derive_channel_keys(&key.key_pair.secret, &req.client_public, &salt)
            .map_err(|e| EnclaveFault::new(ErrorCode::Crypto, e.to_string()))?;
        let iv = seal::random_iv();
        let ciphertext = seal::seal(
            &keys.enclave_to_client,
            &iv,
            &wire::aad(MessageKind::Response, version),
            plaintext,
        )
        .map_err(|e| EnclaveFault::new(ErrorCode::Crypto, e.to_string()))?;
        Ok(wire::encode_response(&SealedResponse {
            key_version: version,
            key_outdated: outdated,
            iv,
            ciphertext: Bytes::from(ciphertext),
        }))
    }

    fn predict(&self, plaintext: Vec<u8>) -> Result<Vec<u8>, EnclaveFault> {
        if !self.model_loaded {
            return Err(EnclaveFault::new(
                ErrorCode::ModelLoading,
                "model not loaded, provision the model key first",
            ));
        }
        let inputs = decode_tensor_map(Bytes::from(plaintext))
            .map_err(|e| EnclaveFault::new(ErrorCode::PayloadParse, e.to_string()))?;
        let outputs = self.model.run(&inputs)?;
        let encoded = encode_tensor_map(&outputs)
            .map_err(|e| EnclaveFault::new(ErrorCode::OutputSerialization, e.to_string()))?;
        Ok(encoded.to_vec())
    }

    fn provision(&mut self, key: &[u8]) -> Result<(), EnclaveFault> {
        let encrypted = match (&self.encrypted_model, self.model_loaded) {
            (Some(encrypted), false) => encrypted,
            _ => {
                return Err(EnclaveFault::new(
                    ErrorCode::ModelAlreadyInitialized,
                    "model already initialized",
                ))
            }
        };
        model::decrypt_model(key, encrypted)
            .map_err(|e| EnclaveFault::new(ErrorCode::ModelLoading, e.to_string()))?;
        self.model_loaded = true;
        tracing::debug!("model key provisioned");
        Ok(())
    }
}

/// Hosts a [`MockEnclave`] the way the server process does: requests go to
/// the current enclave instance, which can be rotated or replaced.
pub struct MockHost {
    enclave: Mutex<MockEnclave>,
    factory: Box<dyn Fn() -> MockEnclave + Send + Sync>,
    key_requests: AtomicU64,
    requests: AtomicU64,
}

impl MockHost {
    /// `factory` builds the enclave now and again on every [`restart`](Self::restart).
    pub fn new(factory: impl Fn() -> MockEnclave + Send + Sync + 'static) -> Self {
        Self {
            enclave: Mutex::new(factory()),
            factory: Box::new(factory),
            key_requests: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }

    fn enclave(&self) -> MutexGuard<'_, MockEnclave> {
        self.enclave.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the enclave with a fresh instance; all keys are lost.
    pub fn restart(&self) {
        *self.enclave() = (self.factory)();
        tracing::debug!("mock enclave restarted");
    }

    pub fn rotate_key(&self) {
        self.enclave().rotate_key();
    }

    pub fn key_version(&self) -> u32 {
        self.enclave().key_version()
    }

    /// Key exchanges answered so far.
    pub fn key_requests(&self) -> u64 {
        self.key_requests.load(Ordering::SeqCst)
    }

    /// Total requests received so far, key exchanges included.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn handle(&self, path: &str, body: &[u8]) -> Result<Bytes, EnclaveFault> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if body.get(3) == Some(&(MessageKind::KeyRequest as u8)) {
            self.key_requests.fetch_add(1, Ordering::SeqCst);
        }
        self.enclave().handle(path, body)
    }

    /// Rotate the enclave key every `interval`, first after one interval.
    pub fn spawn_rollover(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                host.rotate_key();
            }
        })
    }
}

#[async_trait]
impl Transport for MockHost {
    async fn send(&self, path: &str, payload: Bytes) -> Result<Bytes, TransportError> {
        self.handle(path, &payload)
            .map_err(|fault| TransportError::Rejected(fault.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::types::ExpectedIdentity;
    use crate::channel::{ChannelEngine, SoftwareChannel};

    fn golden_inputs() -> Bytes {
        let x = Tensor::from_vec(vec![3, 2], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        encode_tensor_map(&TensorMap::from([("X".to_string(), x)])).unwrap()
    }

    fn connect(enclave: &mut MockEnclave) -> SoftwareChannel {
        let mut channel = SoftwareChannel::new(ExpectedIdentity::default());
        let req = channel.make_key_request().unwrap();
        let resp = enclave.handle(SCORE_PATH, &req).unwrap();
        channel.handle_message(&resp).unwrap();
        channel
    }

    #[test]
    fn golden_linear_model() {
        let mut enclave = MockEnclave::new(LinearModel::golden());
        let mut channel = connect(&mut enclave);

        let req = channel.make_request(&golden_inputs()).unwrap();
        let resp = enclave.handle(SCORE_PATH, &req).unwrap();
        let handled = channel.handle_message(&resp).unwrap();
        assert!(!handled.key_outdated);

        let outputs = decode_tensor_map(handled.data.unwrap()).unwrap();
        assert_eq!(outputs["Y"].shape(), &[3, 1]);
        assert_eq!(outputs["Y"].to_vec::<f32>().unwrap(), vec![5.0, 11.0, 17.0]);
    }

    #[test]
    fn previous_key_is_flagged_outdated() {
        let mut enclave = MockEnclave::new(LinearModel::golden());
        let mut channel = connect(&mut enclave);
        enclave.rotate_key();

        let req = channel.make_request(&golden_inputs()).unwrap();
        let handled = channel
            .handle_message(&enclave.handle(SCORE_PATH, &req).unwrap())
            .unwrap();
        assert!(handled.key_outdated);

        enclave.rotate_key();
        let req = channel.make_request(&golden_inputs()).unwrap();
        let fault = enclave.handle(SCORE_PATH, &req).unwrap_err();
        assert_eq!(fault.code, ErrorCode::Crypto);
        assert_eq!(fault.status, 400);
    }

    #[test]
    fn provisioning_unlocks_model() {
        let key = model::generate_model_key();
        let encrypted = model::encrypt_model(&key, b"model").unwrap();
        let mut enclave = MockEnclave::new(LinearModel::golden()).with_encrypted_model(encrypted);
        let mut channel = connect(&mut enclave);

        let req = channel.make_request(&golden_inputs()).unwrap();
        assert_eq!(
            enclave.handle(SCORE_PATH, &req).unwrap_err().code,
            ErrorCode::ModelLoading
        );

        let wrong = model::generate_model_key();
        let req = channel.make_request(&wrong[..]).unwrap();
        assert_eq!(
            enclave.handle(PROVISION_MODEL_KEY_PATH, &req).unwrap_err().code,
            ErrorCode::ModelLoading
        );

        let req = channel.make_request(&key[..]).unwrap();
        enclave.handle(PROVISION_MODEL_KEY_PATH, &req).unwrap();
        assert!(enclave.model_loaded());

        let req = channel.make_request(&key[..]).unwrap();
        assert_eq!(
            enclave.handle(PROVISION_MODEL_KEY_PATH, &req).unwrap_err().code,
            ErrorCode::ModelAlreadyInitialized
        );
    }

    #[test]
    fn fault_body_parses_back() {
        let err: RequestError = EnclaveFault::new(ErrorCode::Crypto, "boom").into();
        assert_eq!(err.status, 400);
        assert!(err.is_crypto_rejection());
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn unknown_path() {
        let host = MockHost::new(|| MockEnclave::new(LinearModel::golden()));
        let mut channel = SoftwareChannel::new(ExpectedIdentity::default());
        let req = channel.make_key_request().unwrap();
        let fault = host.handle("other", &req).unwrap_err();
        assert_eq!(fault.status, 404);
        assert_eq!(host.key_requests(), 1);
    }
}
