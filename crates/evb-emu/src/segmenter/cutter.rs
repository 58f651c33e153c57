// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cuts an event into a chain of fixed-size transport blocks.
//!
//! Each non-empty superfragment is laid out independently into one or more
//! blocks. Fragments are copied left to right; a fragment that does not fit
//! carries over to the next block:
//!
//! - when only its trailer is missing, the block closes early and the trailer
//!   opens the next block, so no block ends inside a trailer;
//! - when even its header does not fit, the block closes with a gap rather
//!   than starting the fragment;
//! - a fragment larger than a whole block spans as many blocks as needed.
//!
//! The block count written into every header is first estimated, then
//! backpatched once the real count is known.

use serde::{Deserialize, Serialize};

use super::block::{
    BlockChain, BlockHeader, TransportBlock, BLOCK_HEADER_SIZE, FUNCTION_PRIVATE, MAX_BLOCK_SIZE,
    ORGANIZATION_ID, XFUNCTION_TAKE,
};
use crate::error::SegmentError;
use crate::event::Event;
use crate::frame::fragment::MIN_FRAGMENT_BYTES;
use crate::frame::{BYTES_IN_WORD, HEADER_SIZE, TRAILER_SIZE};
use crate::superfragment::{FrlHeader, SuperFragment, FRL_HEADER_SIZE, FRL_LAST_SEGMENT};

/// Default transport block size in bytes, headers included.
pub const DEFAULT_BLOCK_SIZE: usize = 32_768;

/// Segmentation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// Fragments may span blocks.
    #[default]
    Normal,
    /// Every fragment must fit in one block; whole fragments only.
    Simple,
}

/// Turns events into block chains.
#[derive(Debug, Clone)]
pub struct MessageSegmenter {
    block_size: usize,
    mode: ChainMode,
    initiator_tid: u16,
    target_tid: u16,
}

/// Fields shared by every block of one event.
#[derive(Debug, Clone, Copy)]
struct EventTag {
    bu_resource_id: u32,
    fu_transaction_id: u32,
    event_number: u32,
    nb_super_fragments: u32,
}

/// Layout state of the block being filled.
struct BlockFill {
    bytes: Vec<u8>,
    left: usize,
}

impl BlockFill {
    fn copy(&mut self, room: usize, src: &[u8]) {
        let at = BLOCK_HEADER_SIZE + FRL_HEADER_SIZE + (room - self.left);
        self.bytes[at..at + src.len()].copy_from_slice(src);
        self.left -= src.len();
    }
}

impl MessageSegmenter {
    pub fn new(block_size: usize, mode: ChainMode) -> Result<Self, SegmentError> {
        let min = BLOCK_HEADER_SIZE + FRL_HEADER_SIZE + MIN_FRAGMENT_BYTES;
        if block_size % BYTES_IN_WORD != 0 || block_size < min || block_size > MAX_BLOCK_SIZE {
            return Err(SegmentError::InvalidBlockSize { block_size });
        }
        Ok(Self {
            block_size,
            mode,
            initiator_tid: 0,
            target_tid: 0,
        })
    }

    /// Transport addresses stamped into every block header.
    pub fn with_addresses(mut self, initiator_tid: u16, target_tid: u16) -> Self {
        self.initiator_tid = initiator_tid;
        self.target_tid = target_tid;
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    /// Block size minus the block header.
    pub fn payload_size(&self) -> usize {
        self.block_size - BLOCK_HEADER_SIZE
    }

    /// Fragment bytes one block can carry.
    pub fn room(&self) -> usize {
        self.payload_size() - FRL_HEADER_SIZE
    }

    /// Build the block chain for `event`, addressed to consumer `fu_id`.
    pub fn build_chain(&self, event: &Event, fu_id: u32) -> Result<BlockChain, SegmentError> {
        let tag = EventTag {
            bu_resource_id: event.resource_id(),
            fu_transaction_id: fu_id,
            event_number: event.event_number(),
            nb_super_fragments: event.capacity() as u32,
        };
        let mut chain = BlockChain::new();
        for (index, sf) in event.super_fragments().iter().enumerate() {
            if sf.is_empty() {
                continue;
            }
            match self.mode {
                ChainMode::Normal => self.cut(&tag, index as u32, sf, &mut chain)?,
                ChainMode::Simple => self.cut_simple(&tag, index as u32, sf, &mut chain)?,
            }
        }
        Ok(chain)
    }

    fn open_block(&self, tag: &EventTag, sf_index: u32, block_nb: u32, nb_blocks: u32) -> BlockFill {
        let mut bytes = vec![0u8; self.block_size];
        BlockHeader {
            message_size_words: (self.block_size / 4) as u16,
            target_tid: self.target_tid,
            initiator_tid: self.initiator_tid,
            function: FUNCTION_PRIVATE,
            xfunction_code: XFUNCTION_TAKE,
            organization_id: ORGANIZATION_ID,
            bu_resource_id: tag.bu_resource_id,
            fu_transaction_id: tag.fu_transaction_id,
            nb_blocks_in_super_fragment: nb_blocks,
            block_nb,
            event_number: tag.event_number,
            nb_super_fragments_in_event: tag.nb_super_fragments,
            super_fragment_nb: sf_index,
            ..Default::default()
        }
        .encode_into(&mut bytes);
        BlockFill {
            bytes,
            left: self.room(),
        }
    }

    /// Shrink the block to the bytes used and write its FRL header.
    fn close_block(
        &self,
        mut fill: BlockFill,
        tag: &EventTag,
        sf_index: u32,
        block_nb: u32,
        last: bool,
    ) -> TransportBlock {
        let used = self.room() - fill.left;
        let total = BLOCK_HEADER_SIZE + FRL_HEADER_SIZE + used;
        let mut segsize = used as u32;
        if last {
            segsize |= FRL_LAST_SEGMENT;
        }
        FrlHeader {
            source: sf_index,
            trigno: tag.event_number,
            segno: block_nb,
            segsize,
        }
        .encode_into(&mut fill.bytes[BLOCK_HEADER_SIZE..]);
        fill.bytes[2..4].copy_from_slice(&((total / 4) as u16).to_le_bytes());
        fill.bytes.truncate(total);
        TransportBlock::from_raw(fill.bytes)
    }

    fn cut(
        &self,
        tag: &EventTag,
        sf_index: u32,
        sf: &SuperFragment,
        chain: &mut BlockChain,
    ) -> Result<(), SegmentError> {
        let sizes = sf.fragment_sizes()?;
        let estimate = estimate_blocks(&sizes, self.payload_size());
        let bytes = sf.as_bytes();
        let room = self.room();

        let mut starts = Vec::with_capacity(sizes.len());
        let mut pos = 0;
        for &size in &sizes {
            starts.push(pos);
            pos += size;
        }

        let n = sizes.len();
        let mut idx = 0;
        // Bytes of fragment `idx` already emitted in earlier blocks.
        let mut off = 0;
        let mut block_nb = 0u32;

        loop {
            let mut fill = self.open_block(tag, sf_index, block_nb, estimate);
            let mut closed = false;

            if off > 0 {
                let (start, size) = (starts[idx], sizes[idx]);
                let rem = size - off;
                if rem <= fill.left {
                    fill.copy(room, &bytes[start + off..start + size]);
                    idx += 1;
                    off = 0;
                } else if rem - TRAILER_SIZE <= fill.left {
                    fill.copy(room, &bytes[start + off..start + size - TRAILER_SIZE]);
                    off = size - TRAILER_SIZE;
                    closed = true;
                } else {
                    let take = fill.left;
                    fill.copy(room, &bytes[start + off..start + off + take]);
                    off += take;
                    closed = true;
                }
            }

            if !closed {
                while idx < n {
                    if fill.left < HEADER_SIZE {
                        break;
                    }
                    let (start, size) = (starts[idx], sizes[idx]);
                    if size <= fill.left {
                        fill.copy(room, &bytes[start..start + size]);
                        idx += 1;
                    } else if size - TRAILER_SIZE <= fill.left {
                        fill.copy(room, &bytes[start..start + size - TRAILER_SIZE]);
                        off = size - TRAILER_SIZE;
                        break;
                    } else {
                        let take = fill.left;
                        fill.copy(room, &bytes[start..start + take]);
                        off = take;
                        break;
                    }
                }
            }

            let last = idx == n && off == 0;
            chain.push(self.close_block(fill, tag, sf_index, block_nb, last));
            block_nb += 1;
            if last {
                break;
            }
        }

        if block_nb != estimate {
            tracing::debug!(
                super_fragment = sf_index,
                estimate,
                actual = block_nb,
                "block estimate corrected"
            );
            chain.backpatch(sf_index, block_nb);
        }
        Ok(())
    }

    fn cut_simple(
        &self,
        tag: &EventTag,
        sf_index: u32,
        sf: &SuperFragment,
        chain: &mut BlockChain,
    ) -> Result<(), SegmentError> {
        let sizes = sf.fragment_sizes()?;
        let room = self.room();
        if let Some((index, &size)) = sizes.iter().enumerate().find(|(_, &s)| s > room) {
            tracing::error!(
                super_fragment = sf_index,
                fragment = index,
                size,
                room,
                "fragment too large for simple chain mode"
            );
            return Err(SegmentError::FragmentTooLarge {
                super_fragment: sf_index as usize,
                index,
                size,
                room,
            });
        }

        let estimate = estimate_blocks_simple(&sizes, self.payload_size());
        let bytes = sf.as_bytes();
        let mut pos = 0;
        let mut idx = 0;
        let mut block_nb = 0u32;
        while idx < sizes.len() {
            let mut fill = self.open_block(tag, sf_index, block_nb, estimate);
            while idx < sizes.len() && sizes[idx] <= fill.left {
                fill.copy(room, &bytes[pos..pos + sizes[idx]]);
                pos += sizes[idx];
                idx += 1;
            }
            let last = idx == sizes.len();
            chain.push(self.close_block(fill, tag, sf_index, block_nb, last));
            block_nb += 1;
        }

        if block_nb != estimate {
            tracing::debug!(
                super_fragment = sf_index,
                estimate,
                actual = block_nb,
                "block estimate corrected"
            );
            chain.backpatch(sf_index, block_nb);
        }
        Ok(())
    }
}

/// First-pass block count for the carry-over layout.
///
/// Accumulates fragment sizes and charges one FRL header per block boundary
/// crossed. Trailer deferral and header gaps are not modelled, so the result
/// can be off by one in either direction.
pub fn estimate_blocks(sizes: &[usize], payload: usize) -> u32 {
    let mut current = FRL_HEADER_SIZE;
    let mut total = FRL_HEADER_SIZE;
    for &size in sizes {
        current += size;
        total += size;
        if current > payload {
            current += FRL_HEADER_SIZE * (current / payload);
            if current % payload != 0 {
                total += FRL_HEADER_SIZE * (current / payload);
            } else {
                total += FRL_HEADER_SIZE * (current / payload - 1);
            }
            current %= payload;
        }
    }
    total.div_ceil(payload) as u32
}

/// First-pass block count for whole-fragment packing.
pub fn estimate_blocks_simple(sizes: &[usize], payload: usize) -> u32 {
    let mut blocks = 1;
    let mut current = 0;
    for &size in sizes {
        current += size;
        if current >= payload {
            blocks += 1;
            current = size;
        }
    }
    blocks
}
