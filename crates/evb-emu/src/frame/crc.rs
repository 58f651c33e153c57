// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CRC-16/CCITT-FALSE checksum for fragment integrity.
//!
//! # Parameters (CRC-16/CCITT-FALSE)
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | Polynomial | 0x1021 |
//! | Init | 0xFFFF |
//! | RefIn | false |
//! | RefOut | false |
//! | XorOut | 0x0000 |
//!
//! # Test Vector
//!
//! ```
//! use evb_emu::frame::crc16_ccitt;
//!
//! assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
//! ```

use super::{FedTrailer, TRAILER_SIZE};

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Precomputed lookup table, generated at compile time.
const CRC_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

#[inline]
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_ccitt_update(INIT, data)
}

/// Continue a running CRC over more data.
#[inline]
#[must_use]
pub fn crc16_ccitt_update(crc: u16, data: &[u8]) -> u16 {
    let mut crc = crc;
    for &byte in data {
        let index = ((crc >> 8) ^ u16::from(byte)) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

/// CRC of a whole fragment, computed as if its trailer CRC field were zero.
///
/// The fragment bytes are not modified.
#[must_use]
pub fn fragment_crc(fragment: &[u8]) -> u16 {
    if fragment.len() < TRAILER_SIZE {
        return crc16_ccitt(fragment);
    }
    let split = fragment.len() - TRAILER_SIZE;
    let mut trailer = [0u8; TRAILER_SIZE];
    trailer.copy_from_slice(&fragment[split..]);
    FedTrailer::clear_crc(&mut trailer);
    crc16_ccitt_update(crc16_ccitt(&fragment[..split]), &trailer)
}

/// Compute and store the fragment CRC into its trailer.
pub(crate) fn seal_fragment(fragment: &mut [u8]) {
    let crc = fragment_crc(fragment);
    let split = fragment.len() - TRAILER_SIZE;
    FedTrailer::store_crc(&mut fragment[split..], crc);
}
