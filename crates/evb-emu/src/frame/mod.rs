// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FED fragment framing.
//!
//! A fragment is one front-end driver's contribution to an event:
//!
//! ```text
//! +----------------+---------------------------+----------------+
//! | header (8 B)   | payload (n * 8 B)         | trailer (8 B)  |
//! +----------------+---------------------------+----------------+
//! ```
//!
//! The trailer carries the total length in 8-byte words, which is the only
//! way to delimit fragments packed back to back: a reader walks trailers
//! backward from the end of a buffer.

pub mod crc;
pub mod fragment;
pub mod header;
pub mod trailer;

pub use crc::{crc16_ccitt, fragment_crc};
pub use fragment::{split_fragments, Fragment, FragmentParams, FragmentRef};
pub use header::FedHeader;
pub use trailer::FedTrailer;

/// Encoded FED header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Encoded FED trailer size in bytes.
pub const TRAILER_SIZE: usize = 8;

/// Fragment lengths are counted in 64-bit words.
pub const BYTES_IN_WORD: usize = 8;

/// Header, one payload word, trailer.
pub const MIN_WORDS_IN_FRAGMENT: u32 = 3;

/// Largest length the 24-bit trailer field can express.
pub const MAX_WORDS_IN_FRAGMENT: u32 = 0x00FF_FFFF;

#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
