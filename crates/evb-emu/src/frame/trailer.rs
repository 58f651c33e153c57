// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FED trailer codec.
//!
//! # Wire Format
//!
//! ```text
//! word 0 (conscheck): crc[31:16] | status[11:8] | tts[7:4] | T[3] | 0[2:0]
//! word 1 (eventsize): 0xA[31:28] | length_words[23:0]
//! ```

use super::{read_u32, write_u32, BYTES_IN_WORD, TRAILER_SIZE};
use crate::error::FramingError;

/// Control id carried in the high nibble of the event-size word.
pub const TRAILER_CONTROL_ID: u32 = 0xA;

const CONTROL_MASK: u32 = 0xF000_0000;
const CONTROL_SHIFT: u32 = 28;
const LENGTH_MASK: u32 = 0x00FF_FFFF;

const CRC_MASK: u32 = 0xFFFF_0000;
const CRC_SHIFT: u32 = 16;
const STATUS_MASK: u32 = 0x0000_0F00;
const STATUS_SHIFT: u32 = 8;
const TTS_MASK: u32 = 0x0000_00F0;
const TTS_SHIFT: u32 = 4;
const MORE_TRAILERS_BIT: u32 = 0x0000_0008;

/// Decoded FED trailer fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FedTrailer {
    /// Whole fragment length, header and trailer included, in 8-byte words.
    pub length_words: u32,
    pub crc: u16,
    pub status: u8,
    pub tts: u8,
    pub more_trailers: bool,
}

impl FedTrailer {
    /// Encode into the first [`TRAILER_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`TRAILER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        let conscheck = ((u32::from(self.crc) << CRC_SHIFT) & CRC_MASK)
            | ((u32::from(self.status) << STATUS_SHIFT) & STATUS_MASK)
            | ((u32::from(self.tts) << TTS_SHIFT) & TTS_MASK)
            | if self.more_trailers { MORE_TRAILERS_BIT } else { 0 };
        let eventsize = (TRAILER_CONTROL_ID << CONTROL_SHIFT) | (self.length_words & LENGTH_MASK);
        write_u32(buf, 0, conscheck);
        write_u32(buf, 4, eventsize);
    }

    pub fn encode(&self) -> [u8; TRAILER_SIZE] {
        let mut buf = [0u8; TRAILER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < TRAILER_SIZE {
            return Err(FramingError::TooShort {
                len: buf.len(),
                needed: TRAILER_SIZE,
            });
        }
        let conscheck = read_u32(buf, 0);
        let eventsize = read_u32(buf, 4);
        if (eventsize & CONTROL_MASK) >> CONTROL_SHIFT != TRAILER_CONTROL_ID {
            return Err(FramingError::BadTrailerControlId { word: eventsize });
        }
        Ok(Self {
            length_words: eventsize & LENGTH_MASK,
            crc: ((conscheck & CRC_MASK) >> CRC_SHIFT) as u16,
            status: ((conscheck & STATUS_MASK) >> STATUS_SHIFT) as u8,
            tts: ((conscheck & TTS_MASK) >> TTS_SHIFT) as u8,
            more_trailers: conscheck & MORE_TRAILERS_BIT != 0,
        })
    }

    pub fn check(buf: &[u8]) -> bool {
        buf.len() >= TRAILER_SIZE
            && (read_u32(buf, 4) & CONTROL_MASK) >> CONTROL_SHIFT == TRAILER_CONTROL_ID
    }

    /// Fragment length in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.length_words as usize * BYTES_IN_WORD
    }

    /// Clear the CRC bits of an encoded trailer in place.
    pub(crate) fn clear_crc(buf: &mut [u8]) {
        let conscheck = read_u32(buf, 0) & !CRC_MASK;
        write_u32(buf, 0, conscheck);
    }

    /// Store `crc` into an encoded trailer in place.
    pub(crate) fn store_crc(buf: &mut [u8], crc: u16) {
        let conscheck = (read_u32(buf, 0) & !CRC_MASK) | (u32::from(crc) << CRC_SHIFT);
        write_u32(buf, 0, conscheck);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_trailer_roundtrip() {
        let t = FedTrailer {
            length_words: 0x00FF_FFFF,
            crc: 0xBEEF,
            status: 0xF,
            tts: 0x8,
            more_trailers: true,
        };
        assert_eq!(FedTrailer::decode(&t.encode()).unwrap(), t);
    }

    #[test]
    fn test_trailer_word_layout() {
        let bytes = FedTrailer {
            length_words: 3,
            ..Default::default()
        }
        .encode();
        assert_eq!(&bytes[4..8], &0xA000_0003u32.to_le_bytes());
        assert_eq!(FedTrailer::decode(&bytes).unwrap().byte_len(), 24);
    }

    #[test]
    fn test_check_and_short_buffer() {
        let bytes = FedTrailer::default().encode();
        assert!(FedTrailer::check(&bytes));
        assert!(!FedTrailer::check(&[0u8; 8]));
        assert!(matches!(
            FedTrailer::decode(&bytes[..3]),
            Err(FramingError::TooShort { len: 3, .. })
        ));
    }

    #[test]
    fn test_store_and_clear_crc() {
        let mut bytes = FedTrailer {
            length_words: 9,
            status: 2,
            ..Default::default()
        }
        .encode();
        FedTrailer::store_crc(&mut bytes, 0x1234);
        let t = FedTrailer::decode(&bytes).unwrap();
        assert_eq!(t.crc, 0x1234);
        assert_eq!(t.status, 2);
        FedTrailer::clear_crc(&mut bytes);
        assert_eq!(FedTrailer::decode(&bytes).unwrap().crc, 0);
    }

    fn any_trailer() -> impl Strategy<Value = FedTrailer> {
        (0u32..=LENGTH_MASK, any::<u16>(), 0u8..16, 0u8..16, any::<bool>()).prop_map(
            |(length_words, crc, status, tts, more_trailers)| FedTrailer {
                length_words,
                crc,
                status,
                tts,
                more_trailers,
            },
        )
    }

    proptest! {
        #[test]
        fn trailer_roundtrips_every_field(t in any_trailer()) {
            let bytes = t.encode();
            prop_assert!(FedTrailer::check(&bytes));
            prop_assert_eq!(FedTrailer::decode(&bytes).unwrap(), t);
        }

        #[test]
        fn trailer_with_other_control_id_fails_check(
            t in any_trailer(),
            control in 0u8..16,
        ) {
            prop_assume!(u32::from(control) != TRAILER_CONTROL_ID);
            let mut bytes = t.encode();
            bytes[7] = (bytes[7] & 0x0F) | (control << 4);
            prop_assert!(!FedTrailer::check(&bytes));
            prop_assert!(FedTrailer::decode(&bytes).is_err());
        }
    }
}
