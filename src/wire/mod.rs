//! Wire protocol shared by caller and provider.

pub mod frame;
pub mod header;

pub use frame::{
    Decoded, Endian, LEN_PREFIX_BYTES, MAX_SEGMENT_BYTES, RequestFrame, WireError, decode_request,
    encode_request, read_request,
};
pub use header::{HeaderError, RpcHeader, decode_header, encode_header};
