//! Frame encoding and incremental decoding

use crate::protocol::{PayloadKind, RpcMessage, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN, MAGIC_NUMBER};
use crate::serializer::SerializerKind;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use courier_core::{Error, Result};

/// One complete frame lifted off the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: PayloadKind,
    pub serializer: SerializerKind,
    pub body: Bytes,
}

impl Frame {
    /// Deserialize the body with the serializer named in the header
    pub fn into_message(self) -> Result<RpcMessage> {
        match self.kind {
            PayloadKind::Request => Ok(RpcMessage::Request(self.serializer.deserialize(&self.body)?)),
            PayloadKind::Response => {
                Ok(RpcMessage::Response(self.serializer.deserialize(&self.body)?))
            }
        }
    }
}

/// Length-prefixed frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set maximum body size
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Wrap an already encoded body in a frame
    pub fn encode(&self, kind: PayloadKind, body: &[u8], serializer: SerializerKind) -> Result<Bytes> {
        if body.len() > self.max_frame_size {
            return Err(Error::InvalidArgument(format!(
                "Frame body size {} exceeds maximum size {}",
                body.len(),
                self.max_frame_size
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_u32(MAGIC_NUMBER);
        buf.put_u32(kind.code());
        buf.put_u32(serializer.code());
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);
        Ok(buf.freeze())
    }

    /// Serialize `message` and wrap it in a frame
    pub fn encode_message(&self, message: &RpcMessage, serializer: SerializerKind) -> Result<Bytes> {
        let body = match message {
            RpcMessage::Request(request) => serializer.serialize(request)?,
            RpcMessage::Response(response) => serializer.serialize(response)?,
        };
        self.encode(message.kind(), &body, serializer)
    }

    /// Take one frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered; surplus bytes stay
    /// in `buf` for the next call. Header errors are unrecoverable for the
    /// connection that owns the buffer.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = read_u32(buf, 0);
        if magic != MAGIC_NUMBER {
            return Err(Error::Protocol(format!("Unknown magic number: {:#010x}", magic)));
        }

        let kind = PayloadKind::from_code(read_u32(buf, 4))?;
        let serializer = SerializerKind::from_code(read_u32(buf, 8))?;
        let body_len = read_u32(buf, 12) as usize;

        if body_len > self.max_frame_size {
            return Err(Error::Protocol(format!(
                "Frame body size {} exceeds maximum size {}",
                body_len, self.max_frame_size
            )));
        }

        if buf.len() < HEADER_LEN + body_len {
            buf.reserve(HEADER_LEN + body_len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let body = buf.split_to(body_len).freeze();

        Ok(Some(Frame {
            kind,
            serializer,
            body,
        }))
    }
}

fn read_u32(buf: &BytesMut, offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
