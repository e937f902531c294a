//! Request framing (length-prefixed header record + raw args).
//!
//! Layout: `[ header_len : u32 ][ header_bytes ][ arg_bytes ]`. Only the
//! length prefix is a raw integer; `arg_size` travels inside the header
//! record. Responses are not framed: a response body is delimited by peer
//! close.

use std::io::Read;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::header::{HeaderError, RpcHeader, decode_header, encode_header};
use crate::error::Transience;

/// Inclusive upper bound on the header segment length and on `arg_size`.
pub const MAX_SEGMENT_BYTES: u32 = 1 << 24;

pub const LEN_PREFIX_BYTES: usize = 4;

/// Byte order of the `header_len` prefix.
///
/// The wire default is little-endian; both peers must agree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    fn decode_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        }
    }

    fn encode_u32(self, value: u32) -> [u8; 4] {
        match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("header record: {0}")]
    Header(#[from] HeaderError),
    #[error("header length {got} exceeds cap {MAX_SEGMENT_BYTES}")]
    HeaderTooLarge { got: u64 },
    #[error("arg size {got} exceeds cap {MAX_SEGMENT_BYTES}")]
    ArgsTooLarge { got: u64 },
    #[error("header length cannot be zero")]
    EmptyHeader,
}

impl WireError {
    pub fn transience(&self) -> Transience {
        match self {
            WireError::Io(_) => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}

/// A fully decoded request frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFrame {
    pub service: String,
    pub method: String,
    pub args: Bytes,
}

/// Outcome of a stateless decode attempt over a buffer.
#[derive(Debug)]
pub enum Decoded {
    /// Fewer bytes than one complete frame; nothing was consumed.
    NeedMore,
    /// One complete frame; `consumed` bytes of the buffer were used.
    Frame {
        frame: RequestFrame,
        consumed: usize,
    },
}

/// Encodes one request frame. Fails without emitting bytes when either
/// segment exceeds the cap.
pub fn encode_request(
    endian: Endian,
    service: &str,
    method: &str,
    args: &[u8],
) -> Result<Vec<u8>, WireError> {
    if args.len() as u64 > MAX_SEGMENT_BYTES as u64 {
        return Err(WireError::ArgsTooLarge {
            got: args.len() as u64,
        });
    }
    let header = RpcHeader {
        service: service.to_string(),
        method: method.to_string(),
        arg_size: args.len() as u32,
    };
    let header_bytes = encode_header(&header)?;
    if header_bytes.len() as u64 > MAX_SEGMENT_BYTES as u64 {
        return Err(WireError::HeaderTooLarge {
            got: header_bytes.len() as u64,
        });
    }

    let mut buf = Vec::with_capacity(LEN_PREFIX_BYTES + header_bytes.len() + args.len());
    buf.extend_from_slice(&endian.encode_u32(header_bytes.len() as u32));
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(args);
    Ok(buf)
}

/// Stateless decode of one request frame from the front of `buf`.
///
/// The caller owns buffering: keep appending bytes and re-invoking until a
/// frame or an error comes back. Declared sizes are validated before the
/// corresponding bytes are awaited, so an oversized declaration fails
/// immediately rather than stalling the read loop.
pub fn decode_request(endian: Endian, buf: &[u8]) -> Result<Decoded, WireError> {
    if buf.len() < LEN_PREFIX_BYTES {
        return Ok(Decoded::NeedMore);
    }
    let header_len = endian.decode_u32([buf[0], buf[1], buf[2], buf[3]]);
    if header_len == 0 {
        return Err(WireError::EmptyHeader);
    }
    if header_len > MAX_SEGMENT_BYTES {
        return Err(WireError::HeaderTooLarge {
            got: header_len as u64,
        });
    }

    let header_end = LEN_PREFIX_BYTES + header_len as usize;
    if buf.len() < header_end {
        return Ok(Decoded::NeedMore);
    }
    let header = decode_header(&buf[LEN_PREFIX_BYTES..header_end])?;
    if header.arg_size > MAX_SEGMENT_BYTES {
        return Err(WireError::ArgsTooLarge {
            got: header.arg_size as u64,
        });
    }

    let frame_end = header_end + header.arg_size as usize;
    if buf.len() < frame_end {
        return Ok(Decoded::NeedMore);
    }

    Ok(Decoded::Frame {
        frame: RequestFrame {
            service: header.service,
            method: header.method,
            args: Bytes::copy_from_slice(&buf[header_end..frame_end]),
        },
        consumed: frame_end,
    })
}

/// Blocking read of one request frame from a stream.
///
/// Returns `Ok(None)` when the peer closes before sending any bytes, and an
/// `UnexpectedEof` io error when it closes mid-frame.
pub fn read_request<R: Read>(endian: Endian, reader: &mut R) -> Result<Option<RequestFrame>, WireError> {
    let mut buf: Vec<u8> = Vec::with_capacity(512);
    let mut chunk = [0u8; 4096];
    loop {
        if let Decoded::Frame { frame, .. } = decode_request(endian, &buf)? {
            return Ok(Some(frame));
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "request frame truncated",
            )
            .into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
