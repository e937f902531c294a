//! RPC header record (CBOR map).

use std::convert::Infallible;

use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

/// Upper bound on a service or method name inside the header.
pub const MAX_NAME_BYTES: usize = 1024;

/// Upper bound on header map entries; known fields plus growth room.
pub const MAX_HEADER_FIELDS: u64 = 16;

/// The structured record carried inside a request frame's header segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcHeader {
    pub service: String,
    pub method: String,
    pub arg_size: u32,
}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("cbor encode: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
    #[error("name field exceeds {MAX_NAME_BYTES} bytes")]
    NameTooLong,
    #[error("header map exceeds {MAX_HEADER_FIELDS} fields")]
    TooManyFields,
    #[error("trailing bytes after header record")]
    TrailingBytes,
}

pub fn encode_header(header: &RpcHeader) -> Result<Vec<u8>, HeaderError> {
    if header.service.len() > MAX_NAME_BYTES || header.method.len() > MAX_NAME_BYTES {
        return Err(HeaderError::NameTooLong);
    }
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(3)?;
    enc.str("service")?;
    enc.str(&header.service)?;
    enc.str("method")?;
    enc.str(&header.method)?;
    enc.str("arg_size")?;
    enc.u32(header.arg_size)?;
    Ok(buf)
}

/// Decodes a header record from exactly `bytes`; trailing bytes are an error.
pub fn decode_header(bytes: &[u8]) -> Result<RpcHeader, HeaderError> {
    let mut dec = Decoder::new(bytes);
    let len = dec.map()?.ok_or(HeaderError::IndefiniteLength)?;
    if len > MAX_HEADER_FIELDS {
        return Err(HeaderError::TooManyFields);
    }

    let mut service = None;
    let mut method = None;
    let mut arg_size = None;

    for _ in 0..len {
        let key = decode_text(&mut dec)?;
        match key {
            "service" => service = Some(decode_text(&mut dec)?.to_string()),
            "method" => method = Some(decode_text(&mut dec)?.to_string()),
            "arg_size" => arg_size = Some(decode_u32(&mut dec, "arg_size")?),
            _ => {
                if is_indefinite(&dec)? {
                    return Err(HeaderError::IndefiniteLength);
                }
                dec.skip()?;
            }
        }
    }

    if dec.datatype().is_ok() {
        return Err(HeaderError::TrailingBytes);
    }

    Ok(RpcHeader {
        service: service.ok_or(HeaderError::MissingField("service"))?,
        method: method.ok_or(HeaderError::MissingField("method"))?,
        arg_size: arg_size.ok_or(HeaderError::MissingField("arg_size"))?,
    })
}

fn decode_text<'a>(dec: &mut Decoder<'a>) -> Result<&'a str, HeaderError> {
    let ty = dec.datatype()?;
    if matches!(ty, Type::StringIndef) {
        return Err(HeaderError::IndefiniteLength);
    }
    let s = dec.str()?;
    if s.len() > MAX_NAME_BYTES {
        return Err(HeaderError::NameTooLong);
    }
    Ok(s)
}

fn decode_u32(dec: &mut Decoder, field: &'static str) -> Result<u32, HeaderError> {
    let value = dec.u64()?;
    u32::try_from(value).map_err(|_| HeaderError::InvalidField {
        field,
        reason: format!("value {value} out of range for u32"),
    })
}

fn is_indefinite(dec: &Decoder) -> Result<bool, HeaderError> {
    let ty = dec.datatype()?;
    Ok(matches!(
        ty,
        Type::BytesIndef | Type::StringIndef | Type::ArrayIndef | Type::MapIndef
    ))
}
