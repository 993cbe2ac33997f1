//! Envelope payload codec and stream framing.
//!
//! Every frame on the wire is a 4-byte big-endian length followed by that many
//! payload bytes. A zero-length frame is a keep-alive and never reaches the
//! caller. An envelope payload is four length-prefixed fields in the order
//! `to`, `sender`, `protocol_id`, `message`, each a big-endian `u32` length
//! followed by the raw bytes.

use crate::error::WireError;
use bytes::{Buf, BufMut};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tether_types::envelope::Envelope;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame payload size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Size of the frame length header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Answers whether a protocol id is known to the local agent.
///
/// Injected into [`EnvelopeCodec`] to reject envelopes for unknown protocols
/// at decode time.
pub trait ProtocolLookup: Send + Sync {
    fn contains(&self, protocol_id: &str) -> bool;
}

impl ProtocolLookup for HashSet<String> {
    fn contains(&self, protocol_id: &str) -> bool {
        HashSet::contains(self, protocol_id)
    }
}

/// Envelope <-> payload codec with optional protocol validation.
#[derive(Clone, Default)]
pub struct EnvelopeCodec {
    protocols: Option<Arc<dyn ProtocolLookup>>,
}

impl fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("validates_protocols", &self.protocols.is_some())
            .finish()
    }
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec that rejects envelopes whose protocol id `lookup` does not know.
    pub fn with_protocols(lookup: Arc<dyn ProtocolLookup>) -> Self {
        Self {
            protocols: Some(lookup),
        }
    }

    pub fn encode(&self, envelope: &Envelope) -> Vec<u8> {
        encode_envelope(envelope)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Envelope, WireError> {
        let envelope = decode_envelope(payload)?;
        if let Some(lookup) = &self.protocols {
            if !lookup.contains(envelope.protocol_id()) {
                return Err(WireError::MalformedEnvelope(format!(
                    "unknown protocol id '{}'",
                    envelope.protocol_id()
                )));
            }
        }
        Ok(envelope)
    }
}

/// Encode an envelope into its payload bytes (no frame header).
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let fields: [&[u8]; 4] = [
        envelope.to.as_bytes(),
        envelope.sender.as_bytes(),
        envelope.protocol_id().as_bytes(),
        envelope.message(),
    ];
    let total = fields.iter().map(|f| 4 + f.len()).sum();
    let mut buf = Vec::with_capacity(total);
    for field in fields {
        buf.put_u32(field.len() as u32);
        buf.put_slice(field);
    }
    buf
}

/// Decode envelope payload bytes produced by [`encode_envelope`].
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, WireError> {
    let mut buf = payload;
    let to = take_text(&mut buf, "to")?;
    let sender = take_text(&mut buf, "sender")?;
    let protocol_id = take_text(&mut buf, "protocol_id")?;
    let message = take_field(&mut buf, "message")?.to_vec();
    if buf.has_remaining() {
        return Err(WireError::MalformedEnvelope(format!(
            "{} trailing bytes after message",
            buf.remaining()
        )));
    }
    Ok(Envelope::new(to, sender, protocol_id, message))
}

fn take_field<'a>(buf: &mut &'a [u8], name: &str) -> Result<&'a [u8], WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::MalformedEnvelope(format!(
            "missing length of field '{name}'"
        )));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(WireError::MalformedEnvelope(format!(
            "field '{name}' declares {len} bytes but only {} remain",
            buf.remaining()
        )));
    }
    let (field, rest) = buf.split_at(len);
    *buf = rest;
    Ok(field)
}

fn take_text(buf: &mut &[u8], name: &str) -> Result<String, WireError> {
    let field = take_field(buf, name)?;
    String::from_utf8(field.to_vec())
        .map_err(|_| WireError::MalformedEnvelope(format!("field '{name}' is not UTF-8")))
}

/// Decode the 4-byte big-endian length header.
pub fn decode_length(header: &[u8; FRAME_HEADER_LEN]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Prefix `payload` with its length header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = check_size(payload.len())?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u32(len);
    frame.put_slice(payload);
    Ok(frame)
}

fn check_size(len: usize) -> Result<u32, WireError> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_FRAME_SIZE => Ok(len),
        _ => Err(WireError::MessageTooLarge {
            size: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_FRAME_SIZE,
        }),
    }
}

/// Write one frame. An empty payload writes a keep-alive.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next non-empty frame payload, skipping keep-alives.
///
/// A clean EOF before a header maps to [`WireError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        let mut header = [0u8; FRAME_HEADER_LEN];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(WireError::ConnectionClosed);
            }
            Err(e) => return Err(WireError::Io(e)),
        }

        let len = decode_length(&header);
        if len == 0 {
            continue;
        }
        if len > MAX_FRAME_SIZE {
            return Err(WireError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        return Ok(body);
    }
}
