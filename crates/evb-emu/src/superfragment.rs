// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SuperFragment: an append-only arena of back-to-back fragments.
//!
//! The buffer is allocated once and reused across events through
//! [`SuperFragment::reset`]. There is no forward index: fragments are located
//! by walking trailers backward from the write cursor, so the last fragment is
//! O(1) and an arbitrary one is O(used fragments).

use crate::error::{CapacityExceeded, FramingError, PushError};
use crate::frame::fragment::{self, previous_fragment_start, validate, FragmentRef};
use crate::frame::FragmentParams;

/// Default byte capacity of a freshly created superfragment.
pub const INITIAL_SUPERFRAGMENT_BYTES: usize = 20_000;

/// Default fragment-count capacity.
pub const DEFAULT_SUPERFRAGMENT_LENGTH: usize = 16;

/// Encoded FRL header size in bytes.
pub const FRL_HEADER_SIZE: usize = 24;

/// Low 24 bits of `segsize` hold the byte count.
pub const FRL_SEGSIZE_MASK: u32 = 0x00FF_FFFF;
/// Set on the final block of a superfragment.
pub const FRL_LAST_SEGMENT: u32 = 0x8000_0000;
pub const FRL_CRC_INVALID: u32 = 0x4000_0000;
pub const FRL_FLUSHED_BLOCK: u32 = 0x2000_0000;
pub const FRL_FED_CRC_INVALID: u32 = 0x1000_0000;

/// FRL-style sub-header prefixed to each transport block payload.
///
/// Six little-endian `u32` fields: source, trigno, segno, reserved,
/// segsize (with flags in the high byte), reserved_2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrlHeader {
    pub source: u32,
    pub trigno: u32,
    pub segno: u32,
    pub segsize: u32,
}

impl FrlHeader {
    pub fn encode_into(&self, buf: &mut [u8]) {
        let words = [self.source, self.trigno, self.segno, 0, self.segsize, 0];
        for (chunk, word) in buf[..FRL_HEADER_SIZE].chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < FRL_HEADER_SIZE {
            return Err(FramingError::TooShort {
                len: buf.len(),
                needed: FRL_HEADER_SIZE,
            });
        }
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok(Self {
            source: word(0),
            trigno: word(4),
            segno: word(8),
            segsize: word(16),
        })
    }

    /// Byte count carried in the block, flags stripped.
    #[inline]
    pub fn data_len(&self) -> usize {
        (self.segsize & FRL_SEGSIZE_MASK) as usize
    }

    #[inline]
    pub fn is_last_segment(&self) -> bool {
        self.segsize & FRL_LAST_SEGMENT != 0
    }
}

/// Append-only fragment arena with a fixed byte and fragment-count capacity.
#[derive(Debug, Clone)]
pub struct SuperFragment {
    buffer: Box<[u8]>,
    cursor: usize,
    max_fragments: usize,
    used_fragments: usize,
    in_use: bool,
    compute_crc: bool,
    frl: FrlHeader,
}

impl SuperFragment {
    pub fn new(byte_capacity: usize, max_fragments: usize) -> Self {
        Self {
            buffer: vec![0u8; byte_capacity].into_boxed_slice(),
            cursor: 0,
            max_fragments,
            used_fragments: 0,
            in_use: false,
            compute_crc: false,
            frl: FrlHeader::default(),
        }
    }

    pub fn with_fragment_capacity(max_fragments: usize) -> Self {
        Self::new(INITIAL_SUPERFRAGMENT_BYTES, max_fragments)
    }

    fn reserve(&self, len: usize) -> Result<(), CapacityExceeded> {
        let available = self.buffer.len() - self.cursor;
        if len > available {
            return Err(CapacityExceeded::Bytes {
                needed: len,
                available,
            });
        }
        if self.used_fragments >= self.max_fragments {
            return Err(CapacityExceeded::Fragments {
                max: self.max_fragments,
            });
        }
        Ok(())
    }

    fn commit(&mut self, len: usize) {
        self.cursor += len;
        self.used_fragments += 1;
        self.frl.segsize += len as u32;
    }

    /// Synthesize a fragment from `params` and append it.
    ///
    /// Nothing is written when the fragment does not fit.
    pub fn try_push(&mut self, params: &FragmentParams) -> Result<(), PushError> {
        params.check_length()?;
        let len = params.byte_len();
        self.reserve(len)?;
        let start = self.cursor;
        params.write_into(&mut self.buffer[start..start + len], self.compute_crc);
        self.commit(len);
        Ok(())
    }

    pub fn push(&mut self, params: &FragmentParams) -> bool {
        self.try_push(params).is_ok()
    }

    /// Append pre-built fragment bytes (playback path).
    pub fn try_push_raw(&mut self, bytes: &[u8]) -> Result<(), PushError> {
        validate(bytes)?;
        self.reserve(bytes.len())?;
        let start = self.cursor;
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
        self.commit(bytes.len());
        Ok(())
    }

    pub fn push_raw(&mut self, bytes: &[u8]) -> bool {
        self.try_push_raw(bytes).is_ok()
    }

    /// Fragment `index` counted from the end (0 is the last pushed).
    ///
    /// Out-of-range indices clamp to the first fragment. `None` when empty.
    pub fn fragment_at(&self, index: usize) -> Option<FragmentRef<'_>> {
        if self.used_fragments == 0 {
            return None;
        }
        let steps = index.min(self.used_fragments - 1);
        let mut end = self.cursor;
        for _ in 0..steps {
            end = previous_fragment_start(&self.buffer, end).ok()?;
        }
        let start = previous_fragment_start(&self.buffer, end).ok()?;
        Some(FragmentRef::trusted(&self.buffer[start..end]))
    }

    pub fn last_fragment(&self) -> Option<FragmentRef<'_>> {
        self.fragment_at(0)
    }

    /// All fragments in push order.
    pub fn fragments(&self) -> Result<Vec<FragmentRef<'_>>, FramingError> {
        fragment::split_fragments(self.as_bytes())
    }

    /// Byte size of every fragment, in push order.
    pub fn fragment_sizes(&self) -> Result<Vec<usize>, FramingError> {
        let mut sizes = Vec::with_capacity(self.used_fragments);
        let mut end = self.cursor;
        while end > 0 {
            let start = previous_fragment_start(&self.buffer, end)?;
            sizes.push(end - start);
            end = start;
        }
        sizes.reverse();
        Ok(sizes)
    }

    /// Rewind without releasing memory.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.used_fragments = 0;
        self.frl = FrlHeader::default();
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.cursor]
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn byte_capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn used_fragments(&self) -> usize {
        self.used_fragments
    }

    #[inline]
    pub fn max_fragments(&self) -> usize {
        self.max_fragments
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used_fragments == 0
    }

    pub fn mark_used(&mut self) {
        self.in_use = true;
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.in_use
    }

    pub fn set_compute_crc(&mut self, enabled: bool) {
        self.compute_crc = enabled;
    }

    #[inline]
    pub fn compute_crc(&self) -> bool {
        self.compute_crc
    }

    pub fn frl(&self) -> &FrlHeader {
        &self.frl
    }

    pub fn set_trigno(&mut self, trigno: u32) {
        self.frl.trigno = trigno;
    }

    pub fn set_segno(&mut self, segno: u32) {
        self.frl.segno = segno;
    }
}

/// Copy `initial` into a superfragment with twice the byte capacity.
///
/// The fragment-count capacity is kept, so expansion only ever helps a push
/// that failed on bytes.
pub fn expand(initial: &SuperFragment) -> SuperFragment {
    let mut expanded = SuperFragment::new(initial.byte_capacity() * 2, initial.max_fragments);
    let used = initial.frl.segsize as usize;
    expanded.buffer[..used].copy_from_slice(&initial.buffer[..used]);
    expanded.cursor = used;
    expanded.used_fragments = initial.used_fragments;
    expanded.frl = FrlHeader {
        source: 0,
        trigno: initial.frl.trigno,
        segno: initial.frl.segno,
        segsize: initial.frl.segsize,
    };
    expanded.in_use = initial.in_use;
    expanded.compute_crc = initial.compute_crc;
    expanded
}
