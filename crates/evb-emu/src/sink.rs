// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downstream delivery of block chains.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::segmenter::BlockChain;

/// Receives block chains produced by the execution loop.
///
/// Delivery failure is reported through the return value; the loop keeps the
/// event and retries the request later.
pub trait TransportSink: Send + Sync {
    fn send(&self, chain: BlockChain) -> bool;
}

/// Keeps every chain in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    chains: Mutex<Vec<BlockChain>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.lock().is_empty()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<BlockChain> {
        std::mem::take(&mut *self.chains.lock())
    }
}

impl TransportSink for CollectingSink {
    fn send(&self, chain: BlockChain) -> bool {
        self.chains.lock().push(chain);
        true
    }
}

/// Drops chains, counting blocks and bytes.
#[derive(Debug, Default)]
pub struct NullSink {
    chains: AtomicU64,
    bytes: AtomicU64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chains(&self) -> u64 {
        self.chains.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl TransportSink for NullSink {
    fn send(&self, chain: BlockChain) -> bool {
        self.chains.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(chain.total_bytes() as u64, Ordering::Relaxed);
        true
    }
}

/// Forwards chains over a crossbeam channel to an in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<BlockChain>,
}

impl ChannelSink {
    /// Bounded channel; `send` fails instead of blocking when it is full.
    pub fn bounded(capacity: usize) -> (Self, Receiver<BlockChain>) {
        let (tx, rx) = crossbeam::channel::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn unbounded() -> (Self, Receiver<BlockChain>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx }, rx)
    }
}

impl TransportSink for ChannelSink {
    fn send(&self, chain: BlockChain) -> bool {
        match self.tx.try_send(chain) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("consumer channel full");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("consumer channel disconnected");
                false
            }
        }
    }
}
