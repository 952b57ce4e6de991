//! Ogg page framing: the CRC-32 engine and the on-wire page codec.
//!
//! A physical Ogg stream is a sequence of pages. Every page starts with the
//! capture pattern "OggS", carries a fixed little-endian header, a segment
//! table of up to 255 one-byte lengths, and a payload of up to 65025 bytes.
//! The checksum covers the whole page with the checksum slot zeroed.
//!
//! This crate is pure: it encodes into and decodes from byte buffers and
//! never touches I/O. The streaming engines live in the `oggplex` crate.

pub mod codec;
pub mod crc;
pub mod error;

pub use codec::{
    decode_page, encode_page, Page, PageHeader, CAPTURE_PATTERN, HEADER_SIZE, MAX_PAGE_PAYLOAD,
    MAX_SEGMENTS,
};
pub use crc::{Crc32, OGG_CRC, OGG_POLYNOMIAL};
pub use error::{PageError, Result};
