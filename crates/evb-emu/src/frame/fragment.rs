// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fragment construction and borrowed fragment views.

use super::crc::{fragment_crc, seal_fragment};
use super::{
    FedHeader, FedTrailer, BYTES_IN_WORD, HEADER_SIZE, MAX_WORDS_IN_FRAGMENT,
    MIN_WORDS_IN_FRAGMENT, TRAILER_SIZE,
};
use crate::error::FramingError;

/// Smallest valid fragment in bytes.
pub const MIN_FRAGMENT_BYTES: usize = MIN_WORDS_IN_FRAGMENT as usize * BYTES_IN_WORD;

/// Parameters of a synthesized fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentParams {
    pub event_type: u8,
    pub lvl1_id: u32,
    pub bx_id: u16,
    pub source_id: u16,
    pub version: u8,
    pub more_headers: bool,
    /// Whole fragment length in 8-byte words.
    pub length_words: u32,
    /// CRC written into the trailer unless the owner computes a real one.
    pub crc: u16,
    pub status: u8,
    pub tts: u8,
    pub more_trailers: bool,
}

impl FragmentParams {
    /// Physics event (type 1) with every other field zero.
    pub fn new(lvl1_id: u32, source_id: u16, length_words: u32) -> Self {
        Self {
            event_type: 1,
            lvl1_id,
            bx_id: 0,
            source_id,
            version: 0,
            more_headers: false,
            length_words,
            crc: 0,
            status: 0,
            tts: 0,
            more_trailers: false,
        }
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.length_words as usize * BYTES_IN_WORD
    }

    fn header(&self) -> FedHeader {
        FedHeader {
            event_type: self.event_type,
            lvl1_id: self.lvl1_id,
            bx_id: self.bx_id,
            source_id: self.source_id,
            version: self.version,
            more_headers: self.more_headers,
        }
    }

    fn trailer(&self) -> FedTrailer {
        FedTrailer {
            length_words: self.length_words,
            crc: self.crc,
            status: self.status,
            tts: self.tts,
            more_trailers: self.more_trailers,
        }
    }

    /// Encode the fragment into `out`, which must be exactly `byte_len()` long.
    pub(crate) fn write_into(&self, out: &mut [u8], compute_crc: bool) {
        self.header().encode_into(&mut out[..HEADER_SIZE]);
        let payload_end = out.len() - TRAILER_SIZE;
        for (k, word) in out[HEADER_SIZE..payload_end]
            .chunks_exact_mut(BYTES_IN_WORD)
            .enumerate()
        {
            word.copy_from_slice(&payload_word(self.source_id, self.lvl1_id, k).to_le_bytes());
        }
        self.trailer().encode_into(&mut out[payload_end..]);
        if compute_crc {
            seal_fragment(out);
        }
    }

    pub(crate) fn check_length(&self) -> Result<(), FramingError> {
        if self.length_words < MIN_WORDS_IN_FRAGMENT {
            return Err(FramingError::TooShort {
                len: self.byte_len(),
                needed: MIN_FRAGMENT_BYTES,
            });
        }
        if self.length_words > MAX_WORDS_IN_FRAGMENT {
            return Err(FramingError::LengthMismatch {
                declared: self.byte_len(),
                actual: MAX_WORDS_IN_FRAGMENT as usize * BYTES_IN_WORD,
            });
        }
        Ok(())
    }
}

/// Deterministic payload word `k` of a synthesized fragment.
#[inline]
pub fn payload_word(source_id: u16, lvl1_id: u32, k: usize) -> u64 {
    (u64::from(source_id) << 40) | (u64::from(lvl1_id & 0x00FF_FFFF) << 16) | (k as u64 & 0xFFFF)
}

/// An owned, validated fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    bytes: Vec<u8>,
}

impl Fragment {
    pub fn build(params: &FragmentParams, compute_crc: bool) -> Result<Self, FramingError> {
        params.check_length()?;
        let mut bytes = vec![0u8; params.byte_len()];
        params.write_into(&mut bytes, compute_crc);
        Ok(Self { bytes })
    }

    /// Take ownership of pre-built fragment bytes after validating the framing.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FramingError> {
        validate(&bytes)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_view(&self) -> FragmentRef<'_> {
        FragmentRef { bytes: &self.bytes }
    }
}

/// A fragment borrowed from a larger buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRef<'a> {
    bytes: &'a [u8],
}

impl<'a> FragmentRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, FramingError> {
        validate(bytes)?;
        Ok(Self { bytes })
    }

    /// Wrap bytes already known to hold one well-formed fragment.
    pub(crate) fn trusted(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn header(&self) -> Result<FedHeader, FramingError> {
        FedHeader::decode(self.bytes)
    }

    pub fn trailer(&self) -> Result<FedTrailer, FramingError> {
        FedTrailer::decode(&self.bytes[self.bytes.len().saturating_sub(TRAILER_SIZE)..])
    }

    pub fn payload(&self) -> &'a [u8] {
        let end = self.bytes.len().saturating_sub(TRAILER_SIZE);
        &self.bytes[HEADER_SIZE.min(end)..end]
    }

    /// True when the stored CRC matches the recomputed one.
    pub fn verify_crc(&self) -> bool {
        self.trailer()
            .map(|t| t.crc == fragment_crc(self.bytes))
            .unwrap_or(false)
    }
}

/// Validate one complete fragment and return its decoded header and trailer.
pub fn validate(bytes: &[u8]) -> Result<(FedHeader, FedTrailer), FramingError> {
    if bytes.len() < MIN_FRAGMENT_BYTES {
        return Err(FramingError::TooShort {
            len: bytes.len(),
            needed: MIN_FRAGMENT_BYTES,
        });
    }
    if bytes.len() % BYTES_IN_WORD != 0 {
        return Err(FramingError::Misaligned { len: bytes.len() });
    }
    let header = FedHeader::decode(bytes)?;
    let trailer = FedTrailer::decode(&bytes[bytes.len() - TRAILER_SIZE..])?;
    if trailer.byte_len() != bytes.len() {
        return Err(FramingError::LengthMismatch {
            declared: trailer.byte_len(),
            actual: bytes.len(),
        });
    }
    Ok((header, trailer))
}

/// Split back-to-back fragments by walking trailers backward from the end.
///
/// Fragments are returned in buffer order.
pub fn split_fragments(bytes: &[u8]) -> Result<Vec<FragmentRef<'_>>, FramingError> {
    let mut out = Vec::new();
    let mut end = bytes.len();
    while end > 0 {
        let start = previous_fragment_start(bytes, end)?;
        if !FedHeader::check(&bytes[start..end]) {
            return Err(FramingError::BadHeaderControlId {
                word: super::read_u32(bytes, start + 4),
            });
        }
        out.push(FragmentRef::trusted(&bytes[start..end]));
        end = start;
    }
    out.reverse();
    Ok(out)
}

/// Start offset of the fragment whose trailer ends at `end`.
pub(crate) fn previous_fragment_start(bytes: &[u8], end: usize) -> Result<usize, FramingError> {
    if end < HEADER_SIZE + TRAILER_SIZE {
        return Err(FramingError::TooShort {
            len: end,
            needed: HEADER_SIZE + TRAILER_SIZE,
        });
    }
    let trailer = FedTrailer::decode(&bytes[end - TRAILER_SIZE..end])?;
    let len = trailer.byte_len();
    if len < MIN_FRAGMENT_BYTES || len > end {
        return Err(FramingError::LengthMismatch {
            declared: len,
            actual: end,
        });
    }
    Ok(end - len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_minimal_fragment() {
        let frag = Fragment::build(&FragmentParams::new(5, 17, 3), false).unwrap();
        assert_eq!(frag.as_bytes().len(), 24);
        let view = frag.as_view();
        let header = view.header().unwrap();
        assert_eq!(header.event_type, 1);
        assert_eq!(header.lvl1_id, 5);
        assert_eq!(header.source_id, 17);
        assert_eq!(view.trailer().unwrap().length_words, 3);
        assert_eq!(view.payload(), &payload_word(17, 5, 0).to_le_bytes());
    }

    #[test]
    fn test_build_rejects_short_length() {
        assert!(matches!(
            Fragment::build(&FragmentParams::new(1, 1, 2), false),
            Err(FramingError::TooShort { .. })
        ));
    }

    #[test]
    fn test_crc_is_verifiable() {
        let frag = Fragment::build(&FragmentParams::new(99, 700, 40), true).unwrap();
        assert!(frag.as_view().verify_crc());

        let unsealed = Fragment::build(&FragmentParams::new(99, 700, 40), false).unwrap();
        assert_eq!(
            fragment_crc(unsealed.as_bytes()),
            frag.as_view().trailer().unwrap().crc
        );
    }

    #[test]
    fn test_from_bytes_validation() {
        let good = Fragment::build(&FragmentParams::new(1, 2, 4), false)
            .unwrap()
            .into_bytes();
        assert!(Fragment::from_bytes(good.clone()).is_ok());

        let mut truncated = good.clone();
        truncated.truncate(24);
        assert!(Fragment::from_bytes(truncated).is_err());

        let mut misaligned = good;
        misaligned.push(0);
        assert_eq!(
            Fragment::from_bytes(misaligned),
            Err(FramingError::Misaligned { len: 33 })
        );

        assert!(matches!(
            FragmentRef::new(&[0u8; 10]),
            Err(FramingError::TooShort { len: 10, .. })
        ));
    }

    #[test]
    fn test_two_word_fragment_rejected() {
        let mut bytes = FedHeader {
            source_id: 4,
            ..Default::default()
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(
            &FedTrailer {
                length_words: 2,
                ..Default::default()
            }
            .encode(),
        );
        assert_eq!(
            validate(&bytes),
            Err(FramingError::TooShort {
                len: 16,
                needed: MIN_FRAGMENT_BYTES,
            })
        );
        assert!(Fragment::from_bytes(bytes.clone()).is_err());
        assert!(split_fragments(&bytes).is_err());
    }

    #[test]
    fn test_split_fragments_in_order() {
        let mut buf = Vec::new();
        for (src, words) in [(1u16, 3u32), (2, 10), (3, 5)] {
            buf.extend_from_slice(
                Fragment::build(&FragmentParams::new(8, src, words), false)
                    .unwrap()
                    .as_bytes(),
            );
        }
        let frags = split_fragments(&buf).unwrap();
        let ids: Vec<u16> = frags.iter().map(|f| f.header().unwrap().source_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(frags[1].len(), 80);
    }

    #[test]
    fn test_split_fragments_detects_garbage() {
        let mut buf = vec![0u8; 8];
        buf.extend_from_slice(
            Fragment::build(&FragmentParams::new(8, 1, 3), false)
                .unwrap()
                .as_bytes(),
        );
        assert!(split_fragments(&buf).is_err());
        assert!(split_fragments(&[]).unwrap().is_empty());
    }
}
