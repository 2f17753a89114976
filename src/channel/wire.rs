//! Message layout shared by [`SoftwareChannel`](super::SoftwareChannel) and
//! the mock enclave.
//!
//! ```text
//! magic u16 BE (0xCF4E) | version u8 | kind u8 | body
//!
//! KeyRequest  (1): client_nonce[32]
//! KeyResponse (2): key_version u32 | enclave_nonce[32] | enclave_pub[32]
//!                  | service_id (u16 len + bytes) | quote (u32 len + bytes, 0 = none)
//! Request     (3): key_version u32 | client_pub[32] | iv[12] | ciphertext (u32 len + bytes)
//! Response    (4): key_version u32 | key_outdated u8 | iv[12] | ciphertext (u32 len + bytes)
//! ```
//!
//! For requests and responses the first [`AAD_LEN`] bytes are the AEAD
//! associated data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::{Iv, PublicKey, IV_LEN};
use crate::error::ChannelError;

/// Magic bytes: 0xCF 0x4E.
pub const MAGIC: u16 = 0xCF4E;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed prefix: magic + version + kind.
pub const PREFIX_SIZE: usize = 4;

/// Associated data length for sealed messages: prefix + key version.
pub const AAD_LEN: usize = PREFIX_SIZE + 4;

/// Maximum message size: 32 MiB.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Maximum service identifier length (a hash in practice).
const MAX_SERVICE_ID_SIZE: usize = 1024;

/// Maximum quote size accepted during key exchange (64 KiB).
const MAX_QUOTE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    KeyRequest = 0x01,
    KeyResponse = 0x02,
    Request = 0x03,
    Response = 0x04,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Result<Self, ChannelError> {
        match v {
            0x01 => Ok(Self::KeyRequest),
            0x02 => Ok(Self::KeyResponse),
            0x03 => Ok(Self::Request),
            0x04 => Ok(Self::Response),
            other => Err(ChannelError::UnknownKind(other)),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::KeyRequest => "key_request (1)",
            Self::KeyResponse => "key_response (2)",
            Self::Request => "request (3)",
            Self::Response => "response (4)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub nonce: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResponse {
    pub key_version: u32,
    pub nonce: [u8; 32],
    pub public_key: PublicKey,
    pub service_id: Vec<u8>,
    pub quote: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRequest {
    pub key_version: u32,
    pub client_public: PublicKey,
    pub iv: Iv,
    pub ciphertext: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedResponse {
    pub key_version: u32,
    pub key_outdated: bool,
    pub iv: Iv,
    pub ciphertext: Bytes,
}

/// Any decoded channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeyRequest(KeyRequest),
    KeyResponse(KeyResponse),
    Request(SealedRequest),
    Response(SealedResponse),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::KeyRequest(_) => MessageKind::KeyRequest,
            Message::KeyResponse(_) => MessageKind::KeyResponse,
            Message::Request(_) => MessageKind::Request,
            Message::Response(_) => MessageKind::Response,
        }
    }
}

/// Associated data for a sealed message of `kind` under `key_version`.
pub fn aad(kind: MessageKind, key_version: u32) -> [u8; AAD_LEN] {
    let mut out = [0u8; AAD_LEN];
    out[..2].copy_from_slice(&MAGIC.to_be_bytes());
    out[2] = PROTOCOL_VERSION;
    out[3] = kind as u8;
    out[4..].copy_from_slice(&key_version.to_be_bytes());
    out
}

fn put_prefix(buf: &mut BytesMut, kind: MessageKind) {
    buf.put_u16(MAGIC);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(kind as u8);
}

// -- Encoders --

pub fn encode_key_request(msg: &KeyRequest) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREFIX_SIZE + 32);
    put_prefix(&mut buf, MessageKind::KeyRequest);
    buf.put_slice(&msg.nonce);
    buf.freeze()
}

pub fn encode_key_response(msg: &KeyResponse) -> Bytes {
    let quote = msg.quote.as_deref().unwrap_or_default();
    let mut buf = BytesMut::with_capacity(
        PREFIX_SIZE + 4 + 32 + 32 + 2 + msg.service_id.len() + 4 + quote.len(),
    );
    put_prefix(&mut buf, MessageKind::KeyResponse);
    buf.put_u32(msg.key_version);
    buf.put_slice(&msg.nonce);
    buf.put_slice(&msg.public_key);
    buf.put_u16(msg.service_id.len() as u16);
    buf.put_slice(&msg.service_id);
    buf.put_u32(quote.len() as u32);
    buf.put_slice(quote);
    buf.freeze()
}

pub fn encode_request(msg: &SealedRequest) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(AAD_LEN + 32 + IV_LEN + 4 + msg.ciphertext.len());
    put_prefix(&mut buf, MessageKind::Request);
    buf.put_u32(msg.key_version);
    buf.put_slice(&msg.client_public);
    buf.put_slice(&msg.iv);
    buf.put_u32(msg.ciphertext.len() as u32);
    buf.put_slice(&msg.ciphertext);
    buf.freeze()
}

pub fn encode_response(msg: &SealedResponse) -> Bytes {
    let mut buf = BytesMut::with_capacity(AAD_LEN + 1 + IV_LEN + 4 + msg.ciphertext.len());
    put_prefix(&mut buf, MessageKind::Response);
    buf.put_u32(msg.key_version);
    buf.put_u8(msg.key_outdated as u8);
    buf.put_slice(&msg.iv);
    buf.put_u32(msg.ciphertext.len() as u32);
    buf.put_slice(&msg.ciphertext);
    buf.freeze()
}

// -- Decoder --

/// Decode any channel message, enforcing exact lengths.
pub fn parse_message(raw: &[u8]) -> Result<Message, ChannelError> {
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(ChannelError::TooLarge {
            size: raw.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    if raw.len() < PREFIX_SIZE {
        return Err(ChannelError::Malformed(format!(
            "message too short: {} bytes",
            raw.len()
        )));
    }

    let mut cursor = raw;
    let magic = cursor.get_u16();
    if magic != MAGIC {
        return Err(ChannelError::InvalidMagic(magic));
    }
    let version = cursor.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(ChannelError::UnsupportedVersion(version));
    }
    let kind = MessageKind::from_u8(cursor.get_u8())?;

    let msg = match kind {
        MessageKind::KeyRequest => Message::KeyRequest(KeyRequest {
            nonce: take_array(&mut cursor, kind)?,
        }),
        MessageKind::KeyResponse => {
            let key_version = take_u32(&mut cursor, kind)?;
            let nonce = take_array(&mut cursor, kind)?;
            let public_key = take_array(&mut cursor, kind)?;
            let sid_len = take_u16(&mut cursor, kind)? as usize;
            if sid_len > MAX_SERVICE_ID_SIZE {
                return Err(ChannelError::Malformed(format!(
                    "service identifier too large: {sid_len} bytes (max {MAX_SERVICE_ID_SIZE})"
                )));
            }
            let service_id = take_slice(&mut cursor, sid_len, kind)?.to_vec();
            let quote_len = take_u32(&mut cursor, kind)? as usize;
            if quote_len > MAX_QUOTE_SIZE {
                return Err(ChannelError::Malformed(format!(
                    "quote too large: {quote_len} bytes (max {MAX_QUOTE_SIZE})"
                )));
            }
            let quote = take_slice(&mut cursor, quote_len, kind)?;
            Message::KeyResponse(KeyResponse {
                key_version,
                nonce,
                public_key,
                service_id,
                quote: (!quote.is_empty()).then(|| quote.to_vec()),
            })
        }
        MessageKind::Request => {
            let key_version = take_u32(&mut cursor, kind)?;
            let client_public = take_array(&mut cursor, kind)?;
            let iv = take_array(&mut cursor, kind)?;
            let ct_len = take_u32(&mut cursor, kind)? as usize;
            let ciphertext = Bytes::copy_from_slice(take_slice(&mut cursor, ct_len, kind)?);
            Message::Request(SealedRequest {
                key_version,
                client_public,
                iv,
                ciphertext,
            })
        }
        MessageKind::Response => {
            let key_version = take_u32(&mut cursor, kind)?;
            let key_outdated = match take_slice(&mut cursor, 1, kind)?[0] {
                0 => false,
                1 => true,
                other => {
                    return Err(ChannelError::Malformed(format!(
                        "invalid key_outdated flag: {other}"
                    )))
                }
            };
            let iv = take_array(&mut cursor, kind)?;
            let ct_len = take_u32(&mut cursor, kind)? as usize;
            let ciphertext = Bytes::copy_from_slice(take_slice(&mut cursor, ct_len, kind)?);
            Message::Response(SealedResponse {
                key_version,
                key_outdated,
                iv,
                ciphertext,
            })
        }
    };

    if cursor.has_remaining() {
        return Err(ChannelError::Malformed(format!(
            "{}: {} trailing bytes",
            kind.label(),
            cursor.remaining()
        )));
    }
    Ok(msg)
}

/// Decode and require a specific kind.
pub fn expect_kind(raw: &[u8], expected: MessageKind) -> Result<Message, ChannelError> {
    let msg = parse_message(raw)?;
    if msg.kind() != expected {
        return Err(ChannelError::UnexpectedMessage {
            expected: expected.label(),
            actual: msg.kind().label().to_string(),
        });
    }
    Ok(msg)
}

fn take_slice<'a>(
    cursor: &mut &'a [u8],
    len: usize,
    kind: MessageKind,
) -> Result<&'a [u8], ChannelError> {
    if cursor.len() < len {
        return Err(ChannelError::Malformed(format!(
            "{} truncated: need {len} more bytes, have {}",
            kind.label(),
            cursor.len()
        )));
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

fn take_array<const N: usize>(
    cursor: &mut &[u8],
    kind: MessageKind,
) -> Result<[u8; N], ChannelError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take_slice(cursor, N, kind)?);
    Ok(out)
}

fn take_u16(cursor: &mut &[u8], kind: MessageKind) -> Result<u16, ChannelError> {
    take_array::<2>(cursor, kind).map(u16::from_be_bytes)
}

fn take_u32(cursor: &mut &[u8], kind: MessageKind) -> Result<u32, ChannelError> {
    take_array::<4>(cursor, kind).map(u32::from_be_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> SealedResponse {
        SealedResponse {
            key_version: 7,
            key_outdated: true,
            iv: [3; 12],
            ciphertext: Bytes::from_static(b"ciphertext-with-tag"),
        }
    }

    #[test]
    fn key_response_roundtrip() {
        let msg = KeyResponse {
            key_version: 42,
            nonce: [1; 32],
            public_key: [2; 32],
            service_id: vec![0xAB; 32],
            quote: Some(b"quote".to_vec()),
        };
        let decoded = parse_message(&encode_key_response(&msg)).unwrap();
        assert_eq!(decoded, Message::KeyResponse(msg));
    }

    #[test]
    fn empty_quote_decodes_as_none() {
        let msg = KeyResponse {
            key_version: 0,
            nonce: [0; 32],
            public_key: [9; 32],
            service_id: Vec::new(),
            quote: None,
        };
        let decoded = parse_message(&encode_key_response(&msg)).unwrap();
        assert_eq!(decoded, Message::KeyResponse(msg));
    }

    #[test]
    fn aad_is_message_prefix() {
        let msg = sample_response();
        let encoded = encode_response(&msg);
        assert_eq!(&encoded[..AAD_LEN], &aad(MessageKind::Response, 7));
    }

    #[test]
    fn invalid_magic() {
        let mut raw = encode_key_request(&KeyRequest { nonce: [0; 32] }).to_vec();
        raw[0] = 0xFF;
        assert!(matches!(parse_message(&raw), Err(ChannelError::InvalidMagic(_))));
    }

    #[test]
    fn unsupported_version() {
        let mut raw = encode_key_request(&KeyRequest { nonce: [0; 32] }).to_vec();
        raw[2] = 2;
        assert!(matches!(
            parse_message(&raw),
            Err(ChannelError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn unknown_kind() {
        let mut raw = encode_key_request(&KeyRequest { nonce: [0; 32] }).to_vec();
        raw[3] = 0x09;
        assert!(matches!(parse_message(&raw), Err(ChannelError::UnknownKind(0x09))));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut raw = encode_response(&sample_response()).to_vec();
        raw.push(0);
        assert!(matches!(parse_message(&raw), Err(ChannelError::Malformed(_))));
    }

    #[test]
    fn truncation_rejected_everywhere() {
        let raw = encode_response(&sample_response());
        for len in 0..raw.len() {
            assert!(parse_message(&raw[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn bad_outdated_flag() {
        let mut raw = encode_response(&sample_response()).to_vec();
        raw[AAD_LEN] = 2;
        assert!(matches!(parse_message(&raw), Err(ChannelError::Malformed(_))));
    }

    #[test]
    fn kind_mismatch() {
        let raw = encode_response(&sample_response());
        let err = expect_kind(&raw, MessageKind::KeyResponse).unwrap_err();
        assert!(matches!(err, ChannelError::UnexpectedMessage { .. }));
    }
}
