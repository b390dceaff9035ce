//! # Wire Codec
//!
//! Every frame is length-prefixed and carries a version byte and a type tag,
//! so a reader can reject foreign versions and unknown kinds without
//! guessing at the payload.
//!
//! ```text
//! ┌────────────┬─────────┬────────────┬────────────┬───────────┬───────────┐
//! │ len u32 BE │ version │ frame kind │ tag_len u16│ tag bytes │ payload   │
//! └────────────┴─────────┴────────────┴────────────┴───────────┴───────────┘
//!                └──────────────────── len bytes ──────────────────────────┘
//! ```
//!
//! Frame kind 0 is the handshake (16 byte manager id, empty tag); kind 1 is an
//! event (tag = kind name, payload = bincode).

use crate::event::{EventDescriptor, SharedEvent, WireEvent};
use crate::forwarding::ForwardRequest;
use crate::ids::ManagerId;
use crate::Event;
use dashmap::DashMap;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Default upper bound on a frame body.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const FRAME_HANDSHAKE: u8 = 0;
const FRAME_EVENT: u8 = 1;
const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown event tag: {0}")]
    UnknownTag(String),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown frame kind {0}")]
    UnknownFrameKind(u8),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("event kind {0} is local-only")]
    LocalOnly(&'static str),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("payload encoding failed: {0}")]
    Bincode(#[from] bincode::Error),
}

impl CodecError {
    /// Short label used for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownTag(_) => "unknown_tag",
            Self::UnsupportedVersion(_) => "version",
            Self::UnknownFrameKind(_) => "frame_kind",
            Self::FrameTooLarge { .. } => "too_large",
            Self::Malformed(_) => "malformed",
            Self::LocalOnly(_) => "local_only",
            Self::Io(_) => "io",
            Self::Bincode(_) => "payload",
        }
    }
}

/// One decoded frame.
#[derive(Debug)]
pub enum Frame {
    Handshake(ManagerId),
    Event(SharedEvent),
}

/// Serialize an event payload. Used by [`impl_event!`](crate::impl_event).
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(value)?)
}

type Decoder = fn(&[u8]) -> Result<SharedEvent, CodecError>;

fn decode_as<E: WireEvent>(payload: &[u8]) -> Result<SharedEvent, CodecError> {
    let event: E = bincode::deserialize(payload)?;
    Ok(Arc::new(event))
}

/// Maps wire tags to decoders.
pub struct CodecRegistry {
    decoders: DashMap<&'static str, (Decoder, &'static EventDescriptor)>,
}

impl CodecRegistry {
    /// Registry knowing only the bus's own control events.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            decoders: DashMap::new(),
        };
        registry.register::<ForwardRequest>();
        registry
    }

    /// Make `E` decodable. Returns `false` if its tag was already known.
    pub fn register<E: WireEvent>(&self) -> bool {
        let descriptor = E::kind();
        self.decoders
            .insert(descriptor.name(), (decode_as::<E> as Decoder, descriptor))
            .is_none()
    }

    #[must_use]
    pub fn is_registered(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    /// Descriptor behind a tag.
    #[must_use]
    pub fn descriptor(&self, tag: &str) -> Option<&'static EventDescriptor> {
        self.decoders.get(tag).map(|entry| entry.1)
    }

    pub fn decode(&self, tag: &str, payload: &[u8]) -> Result<SharedEvent, CodecError> {
        let decoder = self
            .decoders
            .get(tag)
            .map(|entry| entry.0)
            .ok_or_else(|| CodecError::UnknownTag(tag.to_string()))?;
        decoder(payload)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_frame(kind: u8, tag: &str, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let tag_len = u16::try_from(tag.len()).map_err(|_| CodecError::Malformed("tag too long"))?;
    let body_len = 1 + 1 + 2 + tag.len() + payload.len();
    let len = u32::try_from(body_len).map_err(|_| CodecError::FrameTooLarge {
        len: body_len,
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body_len);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.push(WIRE_VERSION);
    frame.push(kind);
    frame.extend_from_slice(&tag_len.to_be_bytes());
    frame.extend_from_slice(tag.as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Encode a handshake frame, length prefix included.
pub fn encode_handshake(id: ManagerId) -> Result<Vec<u8>, CodecError> {
    encode_frame(FRAME_HANDSHAKE, "", id.as_bytes())
}

/// Encode an event frame, length prefix included.
pub fn encode_event(event: &dyn Event) -> Result<Vec<u8>, CodecError> {
    let descriptor = event.descriptor();
    if descriptor.is_local_only() {
        return Err(CodecError::LocalOnly(descriptor.name()));
    }
    let payload = event.encode()?;
    encode_frame(FRAME_EVENT, descriptor.name(), &payload)
}

/// Decode a frame body (everything after the length prefix).
pub fn decode_frame(body: &[u8], registry: &CodecRegistry) -> Result<Frame, CodecError> {
    let [version, kind, tag_hi, tag_lo, rest @ ..] = body else {
        return Err(CodecError::Malformed("truncated header"));
    };
    if *version != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(*version));
    }

    let tag_len = u16::from_be_bytes([*tag_hi, *tag_lo]) as usize;
    if rest.len() < tag_len {
        return Err(CodecError::Malformed("truncated tag"));
    }
    let (tag, payload) = rest.split_at(tag_len);

    match *kind {
        FRAME_HANDSHAKE => {
            let bytes: [u8; 16] = payload
                .try_into()
                .map_err(|_| CodecError::Malformed("handshake id must be 16 bytes"))?;
            Ok(Frame::Handshake(ManagerId::from_bytes(bytes)))
        }
        FRAME_EVENT => {
            let tag = std::str::from_utf8(tag).map_err(|_| CodecError::Malformed("tag is not utf-8"))?;
            registry.decode(tag, payload).map(Frame::Event)
        }
        other => Err(CodecError::UnknownFrameKind(other)),
    }
}

/// Reads frames from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            max_frame_len,
        }
    }

    /// Next frame, or `None` on a clean end of stream at a frame boundary.
    pub async fn read_frame(
        &mut self,
        registry: &CodecRegistry,
    ) -> Result<Option<Frame>, CodecError> {
        let mut header = [0u8; HEADER_LEN];
        // EOF is clean only before the first byte of a frame.
        match self.inner.read(&mut header[..1]).await {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        match self.inner.read_exact(&mut header[1..]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CodecError::Malformed("truncated length"));
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        decode_frame(&body, registry).map(Some)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to an async byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_handshake(&mut self, id: ManagerId) -> Result<(), CodecError> {
        let frame = encode_handshake(id)?;
        self.write_frame(&frame).await
    }

    pub async fn write_event(&mut self, event: &dyn Event) -> Result<(), CodecError> {
        let frame = encode_event(event)?;
        self.write_frame(&frame).await
    }

    /// Write an already encoded frame body with its length prefix.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), CodecError> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
