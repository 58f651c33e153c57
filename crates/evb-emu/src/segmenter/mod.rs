// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event segmentation into transport block chains.

pub mod block;
pub mod cutter;

pub use block::{BlockChain, BlockHeader, TransportBlock, BLOCK_HEADER_SIZE};
pub use cutter::{ChainMode, MessageSegmenter, DEFAULT_BLOCK_SIZE};
