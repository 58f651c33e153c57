// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FED header codec.
//!
//! # Wire Format
//!
//! Two little-endian 32-bit words:
//!
//! ```text
//! word 0 (source):  bx_id[31:20] | source_id[19:8] | version[7:4] | H[3] | 0[2:0]
//! word 1 (eventid): 0x5[31:28]   | evt_type[27:24] | lvl1_id[23:0]
//! ```

use super::{read_u32, write_u32, HEADER_SIZE};
use crate::error::FramingError;

/// Control id carried in the high nibble of the event-id word.
pub const HEADER_CONTROL_ID: u32 = 0x5;

const CONTROL_MASK: u32 = 0xF000_0000;
const CONTROL_SHIFT: u32 = 28;
const EVT_TYPE_MASK: u32 = 0x0F00_0000;
const EVT_TYPE_SHIFT: u32 = 24;
const LVL1_MASK: u32 = 0x00FF_FFFF;

const BX_MASK: u32 = 0xFFF0_0000;
const BX_SHIFT: u32 = 20;
const SOURCE_MASK: u32 = 0x000F_FF00;
const SOURCE_SHIFT: u32 = 8;
const VERSION_MASK: u32 = 0x0000_00F0;
const VERSION_SHIFT: u32 = 4;
const MORE_HEADERS_BIT: u32 = 0x0000_0008;

/// Decoded FED header fields.
///
/// Field widths: event type 4 bits, lvl1 id 24 bits, bunch crossing 12 bits,
/// source id 12 bits, version 4 bits. Wider values are truncated on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FedHeader {
    pub event_type: u8,
    pub lvl1_id: u32,
    pub bx_id: u16,
    pub source_id: u16,
    pub version: u8,
    pub more_headers: bool,
}

impl FedHeader {
    /// Encode into the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        let source = ((u32::from(self.bx_id) << BX_SHIFT) & BX_MASK)
            | ((u32::from(self.source_id) << SOURCE_SHIFT) & SOURCE_MASK)
            | ((u32::from(self.version) << VERSION_SHIFT) & VERSION_MASK)
            | if self.more_headers { MORE_HEADERS_BIT } else { 0 };
        let eventid = (HEADER_CONTROL_ID << CONTROL_SHIFT)
            | ((u32::from(self.event_type) << EVT_TYPE_SHIFT) & EVT_TYPE_MASK)
            | (self.lvl1_id & LVL1_MASK);
        write_u32(buf, 0, source);
        write_u32(buf, 4, eventid);
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Decode and validate the control id.
    pub fn decode(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < HEADER_SIZE {
            return Err(FramingError::TooShort {
                len: buf.len(),
                needed: HEADER_SIZE,
            });
        }
        let source = read_u32(buf, 0);
        let eventid = read_u32(buf, 4);
        if (eventid & CONTROL_MASK) >> CONTROL_SHIFT != HEADER_CONTROL_ID {
            return Err(FramingError::BadHeaderControlId { word: eventid });
        }
        Ok(Self {
            event_type: ((eventid & EVT_TYPE_MASK) >> EVT_TYPE_SHIFT) as u8,
            lvl1_id: eventid & LVL1_MASK,
            bx_id: ((source & BX_MASK) >> BX_SHIFT) as u16,
            source_id: ((source & SOURCE_MASK) >> SOURCE_SHIFT) as u16,
            version: ((source & VERSION_MASK) >> VERSION_SHIFT) as u8,
            more_headers: source & MORE_HEADERS_BIT != 0,
        })
    }

    /// True when `buf` starts with a header carrying the fixed control id.
    pub fn check(buf: &[u8]) -> bool {
        buf.len() >= HEADER_SIZE
            && (read_u32(buf, 4) & CONTROL_MASK) >> CONTROL_SHIFT == HEADER_CONTROL_ID
    }

    /// Rewrite only the lvl1 id of an encoded header in place.
    pub fn overwrite_lvl1(buf: &mut [u8], lvl1_id: u32) -> Result<(), FramingError> {
        let mut header = Self::decode(buf)?;
        header.lvl1_id = lvl1_id & LVL1_MASK;
        header.encode_into(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> FedHeader {
        FedHeader {
            event_type: 1,
            lvl1_id: 0x00AB_CDEF,
            bx_id: 0x0FFF,
            source_id: 812,
            version: 3,
            more_headers: true,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let h = sample();
        assert_eq!(FedHeader::decode(&h.encode()).unwrap(), h);
    }

    #[test]
    fn test_header_word_layout() {
        let bytes = FedHeader {
            event_type: 1,
            lvl1_id: 7,
            ..Default::default()
        }
        .encode();
        assert_eq!(&bytes[4..8], &0x5100_0007u32.to_le_bytes());
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_check_rejects_bad_control_id() {
        let mut bytes = sample().encode();
        assert!(FedHeader::check(&bytes));
        bytes[7] = 0xA0;
        assert!(!FedHeader::check(&bytes));
        assert!(matches!(
            FedHeader::decode(&bytes),
            Err(FramingError::BadHeaderControlId { .. })
        ));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            FedHeader::decode(&[0u8; 5]),
            Err(FramingError::TooShort { len: 5, needed: 8 })
        );
        assert!(!FedHeader::check(&[]));
    }

    #[test]
    fn test_overwrite_lvl1_keeps_other_fields() {
        let mut bytes = sample().encode();
        FedHeader::overwrite_lvl1(&mut bytes, 42).unwrap();
        let h = FedHeader::decode(&bytes).unwrap();
        assert_eq!(h.lvl1_id, 42);
        assert_eq!(h.source_id, 812);
        assert_eq!(h.bx_id, 0x0FFF);
    }

    fn any_header() -> impl Strategy<Value = FedHeader> {
        (
            0u8..16,
            0u32..=LVL1_MASK,
            0u16..0x1000,
            0u16..0x1000,
            0u8..16,
            any::<bool>(),
        )
            .prop_map(
                |(event_type, lvl1_id, bx_id, source_id, version, more_headers)| FedHeader {
                    event_type,
                    lvl1_id,
                    bx_id,
                    source_id,
                    version,
                    more_headers,
                },
            )
    }

    proptest! {
        #[test]
        fn header_roundtrips_every_field(h in any_header()) {
            let bytes = h.encode();
            prop_assert!(FedHeader::check(&bytes));
            prop_assert_eq!(FedHeader::decode(&bytes).unwrap(), h);
        }

        #[test]
        fn header_with_other_control_id_fails_check(
            h in any_header(),
            control in 0u8..16,
        ) {
            prop_assume!(u32::from(control) != HEADER_CONTROL_ID);
            let mut bytes = h.encode();
            bytes[7] = (bytes[7] & 0x0F) | (control << 4);
            prop_assert!(!FedHeader::check(&bytes));
            prop_assert!(FedHeader::decode(&bytes).is_err());
        }
    }
}
