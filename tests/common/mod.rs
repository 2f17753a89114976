//! Test doubles for driving a session without real cryptography: a framing
//! engine and an in-process server that tracks key versions the way the
//! enclave host does.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use confidential_inference_client::error::ChannelError;
use confidential_inference_client::tensor::TensorMap;
use confidential_inference_client::transport::PROVISION_MODEL_KEY_PATH;
use confidential_inference_client::{
    ChannelEngine, HandledMessage, RequestError, Tensor, Transport, TransportError,
};

const KEY_REQUEST: &[u8] = b"KEYREQ";
const KEY_RESPONSE: &[u8] = b"KEY";
const REQUEST: &[u8] = b"REQ";
const RESPONSE: &[u8] = b"RSP";

fn split_version<'a>(raw: &'a [u8], tag: &[u8]) -> Option<(u32, &'a [u8])> {
    let rest = raw.strip_prefix(tag)?;
    if rest.len() < 4 {
        return None;
    }
    let (version, rest) = rest.split_at(4);
    Some((u32::from_be_bytes(version.try_into().ok()?), rest))
}

/// Plaintext engine: tags each request with the key version it was built
/// under and nothing more.
#[derive(Debug, Default)]
pub struct FakeEngine {
    version: Option<u32>,
}

impl ChannelEngine for FakeEngine {
    fn make_key_request(&mut self) -> Result<Bytes, ChannelError> {
        Ok(Bytes::from_static(KEY_REQUEST))
    }

    fn handle_message(&mut self, raw: &[u8]) -> Result<HandledMessage, ChannelError> {
        if let Some((_, payload)) = split_version(raw, RESPONSE) {
            let (outdated, data) = payload
                .split_first()
                .ok_or_else(|| ChannelError::Malformed("empty response".into()))?;
            return Ok(HandledMessage {
                data: Some(Bytes::copy_from_slice(data)),
                key_outdated: *outdated == 1,
            });
        }
        if let Some((version, _)) = split_version(raw, KEY_RESPONSE) {
            self.version = Some(version);
            return Ok(HandledMessage::default());
        }
        Err(ChannelError::Malformed("unrecognized message".into()))
    }

    fn make_request(&mut self, payload: &[u8]) -> Result<Bytes, ChannelError> {
        let version = self.version.ok_or(ChannelError::NoKey)?;
        let mut buf = BytesMut::with_capacity(REQUEST.len() + 4 + payload.len());
        buf.put_slice(REQUEST);
        buf.put_u32(version);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}

#[derive(Debug)]
struct Keys {
    current: u32,
    previous: Option<u32>,
    next: u32,
    faults: VecDeque<RequestError>,
    fail_key_exchange: bool,
    rotate_at: Option<u64>,
}

impl Keys {
    fn rotate(&mut self) {
        self.previous = Some(self.current);
        self.current = self.next;
        self.next += 1;
    }
}

/// Echo server with a two-version key ring. Requests under the previous
/// version are answered and flagged outdated; any other version is rejected
/// with error code 2.
#[derive(Debug)]
pub struct FakeServer {
    keys: Mutex<Keys>,
    key_requests: AtomicU64,
    data_requests: AtomicU64,
    handshake_delay: Duration,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Keys {
                current: 1,
                previous: None,
                next: 2,
                faults: VecDeque::new(),
                fail_key_exchange: false,
                rotate_at: None,
            }),
            key_requests: AtomicU64::new(0),
            data_requests: AtomicU64::new(0),
            handshake_delay: Duration::ZERO,
        }
    }

    /// Key exchanges take `delay` to answer.
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    fn keys(&self) -> std::sync::MutexGuard<'_, Keys> {
        self.keys.lock().unwrap()
    }

    pub fn rotate(&self) {
        self.keys().rotate();
    }

    /// Lose every key, as a restarted enclave does.
    pub fn restart(&self) {
        let mut keys = self.keys();
        keys.current = keys.next;
        keys.next += 1;
        keys.previous = None;
    }

    /// Rotate once, right before answering data request number `n` (1-based).
    pub fn rotate_at(&self, n: u64) {
        self.keys().rotate_at = Some(n);
    }

    /// Answer the next data request with a structured error carrying `code`.
    pub fn inject(&self, code: i64) {
        let body = format!(r#"{{"error_code": {code}, "error_message": "injected"}}"#);
        self.keys().faults.push_back(RequestError::from_body(400, &body));
    }

    pub fn fail_key_exchange(&self, fail: bool) {
        self.keys().fail_key_exchange = fail;
    }

    pub fn key_version(&self) -> u32 {
        self.keys().current
    }

    pub fn key_requests(&self) -> u64 {
        self.key_requests.load(Ordering::SeqCst)
    }

    pub fn data_requests(&self) -> u64 {
        self.data_requests.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> u64 {
        self.key_requests() + self.data_requests()
    }

    fn key_response(&self) -> Result<Bytes, TransportError> {
        let keys = self.keys();
        if keys.fail_key_exchange {
            return Err(RequestError::from_body(
                400,
                r#"{"error_code": 10, "error_message": "quote generation failed"}"#,
            )
            .into());
        }
        let mut buf = BytesMut::new();
        buf.put_slice(KEY_RESPONSE);
        buf.put_u32(keys.current);
        Ok(buf.freeze())
    }

    fn data_response(&self, path: &str, raw: &[u8]) -> Result<Bytes, TransportError> {
        let n = self.data_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let mut keys = self.keys();
        if keys.rotate_at == Some(n) {
            keys.rotate();
        }
        if let Some(fault) = keys.faults.pop_front() {
            return Err(fault.into());
        }

        let (version, payload) = split_version(raw, REQUEST).ok_or_else(|| {
            RequestError::from_body(400, r#"{"error_code": 6, "error_message": "bad request"}"#)
        })?;
        let outdated = if version == keys.current {
            false
        } else if keys.previous == Some(version) {
            true
        } else {
            return Err(RequestError::from_body(
                400,
                r#"{"error_code": 2, "error_message": "key with specified version not found"}"#,
            )
            .into());
        };

        let mut buf = BytesMut::new();
        buf.put_slice(RESPONSE);
        buf.put_u32(version);
        buf.put_u8(outdated as u8);
        if path != PROVISION_MODEL_KEY_PATH {
            buf.put_slice(payload);
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, path: &str, payload: Bytes) -> Result<Bytes, TransportError> {
        if payload.as_ref() == KEY_REQUEST {
            self.key_requests.fetch_add(1, Ordering::SeqCst);
            if !self.handshake_delay.is_zero() {
                tokio::time::sleep(self.handshake_delay).await;
            }
            return self.key_response();
        }
        self.data_response(path, &payload)
    }
}

/// A one-tensor input map; the echo server hands it back unchanged.
pub fn sample_inputs(seed: f32) -> TensorMap {
    let x = Tensor::from_vec(vec![1, 3], &[seed, seed + 1.0, seed + 2.0]).unwrap();
    TensorMap::from([("X".to_string(), x)])
}

/// `X = [[1,2],[3,4],[5,6]]`.
pub fn golden_inputs() -> TensorMap {
    let x = Tensor::from_vec(vec![3, 2], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    TensorMap::from([("X".to_string(), x)])
}
