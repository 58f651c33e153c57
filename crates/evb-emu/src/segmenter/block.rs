// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport block layout.
//!
//! # Wire Format
//!
//! ```text
//! offset  size  field
//!      0     1  version_offset
//!      1     1  msg_flags
//!      2     2  message_size (4-byte words, whole block)
//!      4     4  target_tid[11:0] | initiator_tid[23:12] | function[31:24]
//!      8     4  initiator_context
//!     12     4  transaction_context
//!     16     2  xfunction_code
//!     18     2  organization_id
//!     20     4  bu_resource_id
//!     24     4  fu_transaction_id
//!     28     4  nb_blocks_in_super_fragment
//!     32     4  block_nb
//!     36     4  event_number
//!     40     4  nb_super_fragments_in_event
//!     44     4  super_fragment_nb
//!     48    24  FRL header
//!     72   ...  fragment bytes
//! ```
//!
//! All fields little-endian.

use crate::error::FramingError;
use crate::frame::fragment::split_fragments;
use crate::superfragment::{FrlHeader, FRL_HEADER_SIZE};

/// Encoded block header size in bytes.
pub const BLOCK_HEADER_SIZE: usize = 48;

/// Private-message function code.
pub const FUNCTION_PRIVATE: u8 = 0xFF;

/// Extended function code of an event-data block.
pub const XFUNCTION_TAKE: u16 = 0x000B;

pub const ORGANIZATION_ID: u16 = 0;

/// Largest block the 16-bit word-count field can describe.
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize * 4;

const NB_BLOCKS_OFFSET: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub version_offset: u8,
    pub msg_flags: u8,
    pub message_size_words: u16,
    pub target_tid: u16,
    pub initiator_tid: u16,
    pub function: u8,
    pub initiator_context: u32,
    pub transaction_context: u32,
    pub xfunction_code: u16,
    pub organization_id: u16,
    pub bu_resource_id: u32,
    pub fu_transaction_id: u32,
    pub nb_blocks_in_super_fragment: u32,
    pub block_nb: u32,
    pub event_number: u32,
    pub nb_super_fragments_in_event: u32,
    pub super_fragment_nb: u32,
}

impl BlockHeader {
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.version_offset;
        buf[1] = self.msg_flags;
        buf[2..4].copy_from_slice(&self.message_size_words.to_le_bytes());
        let address = u32::from(self.target_tid & 0x0FFF)
            | (u32::from(self.initiator_tid & 0x0FFF) << 12)
            | (u32::from(self.function) << 24);
        let words = [
            address,
            self.initiator_context,
            self.transaction_context,
        ];
        for (i, w) in words.iter().enumerate() {
            put(buf, 4 + i * 4, *w);
        }
        buf[16..18].copy_from_slice(&self.xfunction_code.to_le_bytes());
        buf[18..20].copy_from_slice(&self.organization_id.to_le_bytes());
        let tail = [
            self.bu_resource_id,
            self.fu_transaction_id,
            self.nb_blocks_in_super_fragment,
            self.block_nb,
            self.event_number,
            self.nb_super_fragments_in_event,
            self.super_fragment_nb,
        ];
        for (i, w) in tail.iter().enumerate() {
            put(buf, 20 + i * 4, *w);
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < BLOCK_HEADER_SIZE {
            return Err(FramingError::TooShort {
                len: buf.len(),
                needed: BLOCK_HEADER_SIZE,
            });
        }
        let address = get(buf, 4);
        Ok(Self {
            version_offset: buf[0],
            msg_flags: buf[1],
            message_size_words: u16::from_le_bytes([buf[2], buf[3]]),
            target_tid: (address & 0x0FFF) as u16,
            initiator_tid: ((address >> 12) & 0x0FFF) as u16,
            function: (address >> 24) as u8,
            initiator_context: get(buf, 8),
            transaction_context: get(buf, 12),
            xfunction_code: u16::from_le_bytes([buf[16], buf[17]]),
            organization_id: u16::from_le_bytes([buf[18], buf[19]]),
            bu_resource_id: get(buf, 20),
            fu_transaction_id: get(buf, 24),
            nb_blocks_in_super_fragment: get(buf, 28),
            block_nb: get(buf, 32),
            event_number: get(buf, 36),
            nb_super_fragments_in_event: get(buf, 40),
            super_fragment_nb: get(buf, 44),
        })
    }
}

#[inline]
fn put(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// One transport block: header, FRL header and packed fragment bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportBlock {
    bytes: Vec<u8>,
}

impl TransportBlock {
    /// Wrap received block bytes after checking both headers decode.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FramingError> {
        BlockHeader::decode(&bytes)?;
        FrlHeader::decode(&bytes[BLOCK_HEADER_SIZE..])?;
        Ok(Self { bytes })
    }

    pub(crate) fn from_raw(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn header(&self) -> BlockHeader {
        // Blocks are built or validated with both headers present.
        BlockHeader::decode(&self.bytes).unwrap_or_default()
    }

    pub fn frl(&self) -> FrlHeader {
        FrlHeader::decode(&self.bytes[BLOCK_HEADER_SIZE.min(self.bytes.len())..])
            .unwrap_or_default()
    }

    /// Fragment bytes carried by this block.
    pub fn data(&self) -> &[u8] {
        let start = (BLOCK_HEADER_SIZE + FRL_HEADER_SIZE).min(self.bytes.len());
        let end = (start + self.frl().data_len()).min(self.bytes.len());
        &self.bytes[start..end]
    }

    pub(crate) fn patch_nb_blocks(&mut self, nb_blocks: u32) {
        put(&mut self.bytes, NB_BLOCKS_OFFSET, nb_blocks);
    }
}

/// Blocks for one event, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockChain {
    blocks: Vec<TransportBlock>,
}

impl BlockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<TransportBlock>) -> Self {
        Self { blocks }
    }

    pub(crate) fn push(&mut self, block: TransportBlock) {
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[TransportBlock] {
        &self.blocks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransportBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total wire bytes of the chain.
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(TransportBlock::len).sum()
    }

    /// Resource id the chain was built from.
    pub fn bu_resource_id(&self) -> Option<u32> {
        self.blocks.first().map(|b| b.header().bu_resource_id)
    }

    /// Rewrite the block count on every block of superfragment `sf`.
    ///
    /// Walks the chain backward and stops at the first block of another
    /// superfragment, since blocks of one superfragment are contiguous.
    pub(crate) fn backpatch(&mut self, super_fragment: u32, nb_blocks: u32) {
        for block in self.blocks.iter_mut().rev() {
            if block.header().super_fragment_nb != super_fragment {
                break;
            }
            block.patch_nb_blocks(nb_blocks);
        }
    }

    /// Indices of the superfragments present in the chain, in order.
    pub fn super_fragment_numbers(&self) -> Vec<u32> {
        let mut out: Vec<u32> = Vec::new();
        for block in &self.blocks {
            let sf = block.header().super_fragment_nb;
            if out.last() != Some(&sf) {
                out.push(sf);
            }
        }
        out
    }

    /// Concatenated fragment bytes of superfragment `sf`, headers stripped.
    pub fn super_fragment_payload(&self, sf: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for block in self
            .blocks
            .iter()
            .filter(|b| b.header().super_fragment_nb == sf)
        {
            out.extend_from_slice(block.data());
        }
        out
    }

    /// Reassemble every superfragment and count the fragments they hold.
    pub fn fragment_count(&self) -> Result<usize, FramingError> {
        let mut total = 0;
        for sf in self.super_fragment_numbers() {
            total += split_fragments(&self.super_fragment_payload(sf))?.len();
        }
        Ok(total)
    }
}

impl IntoIterator for BlockChain {
    type Item = TransportBlock;
    type IntoIter = std::vec::IntoIter<TransportBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

impl<'a> IntoIterator for &'a BlockChain {
    type Item = &'a TransportBlock;
    type IntoIter = std::slice::Iter<'a, TransportBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}
