// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the builder unit.
//!
//! Codec and buffer errors are recovered locally by the execution loop;
//! only [`ActionError`] ever reaches the lifecycle machine, where it is
//! turned into a `Fail` command.

use thiserror::Error;

/// Malformed or undersized fragment bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("buffer too short: {len} bytes, need at least {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("fragment length {len} is not a multiple of the 8-byte word")]
    Misaligned { len: usize },

    #[error("header control id mismatch (word 0x{word:08x})")]
    BadHeaderControlId { word: u32 },

    #[error("trailer control id mismatch (word 0x{word:08x})")]
    BadTrailerControlId { word: u32 },

    #[error("trailer declares {declared} bytes but {actual} are available")]
    LengthMismatch { declared: usize, actual: usize },
}

/// A push that would overflow a superfragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityExceeded {
    #[error("needs {needed} bytes, {available} left")]
    Bytes { needed: usize, available: usize },

    #[error("fragment count capacity {max} reached")]
    Fragments { max: usize },
}

/// Why a superfragment push was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error(transparent)]
    Capacity(#[from] CapacityExceeded),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Task rejected because the queue is at its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task queue full ({max} tasks)")]
pub struct QueueFull {
    pub max: usize,
}

/// Event generation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    /// Upstream data source has no more events.
    #[error("fragment source exhausted")]
    Exhausted,

    /// More FED ids than the event has fragment slots.
    #[error("no fragment slot left for FED {fed_id}")]
    SlotsExhausted { fed_id: u16 },

    #[error("playback fragment rejected: {0}")]
    Framing(#[from] FramingError),
}

/// Segmentation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error(
        "fragment {index} of superfragment {super_fragment} is {size} bytes, \
         block payload holds {room}"
    )]
    FragmentTooLarge {
        super_fragment: usize,
        index: usize,
        size: usize,
        room: usize,
    },

    #[error("block size {block_size} cannot carry a minimal fragment")]
    InvalidBlockSize { block_size: usize },

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// An entry or exit action of a lifecycle state failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{state} action failed: {reason}")]
pub struct ActionError {
    pub state: &'static str,
    pub reason: String,
}

impl ActionError {
    pub fn new(state: &'static str, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: reason.into(),
        }
    }
}

/// A lifecycle command the current state does not accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("command {command} not accepted in state {state}")]
pub struct Rejected {
    pub state: &'static str,
    pub command: &'static str,
}
