// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fragment generation.
//!
//! FED ids are dealt round-robin over the superfragments of an event: id `i`
//! lands in slot `i % slots`. A push that overflows a slot's bytes replaces the
//! slot with a doubled copy and retries; running out of fragment-count capacity
//! is an error, since doubling the bytes cannot help.
//!
//! Sizes come from a [`SizeMode`]. The playback mode instead pulls recorded
//! fragment bytes from a [`FragmentSource`].

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{CapacityExceeded, GeneratorError, PushError};
use crate::event::Event;
use crate::frame::{FedHeader, FragmentParams, BYTES_IN_WORD, MIN_WORDS_IN_FRAGMENT};
use crate::superfragment::{expand, SuperFragment};

/// How fragment sizes are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SizeMode {
    /// Every fragment has the same length.
    Fixed {
        #[serde(default = "default_fixed_words")]
        words: u32,
    },

    /// Uniform in `[min_words, max_words)`.
    Uniform {
        #[serde(default = "default_min_words")]
        min_words: u32,
        #[serde(default = "default_max_words")]
        max_words: u32,
    },

    /// Log-normal sizes with the given mean and standard deviation in bytes,
    /// capped at `max_bytes`.
    #[serde(rename = "lognormal")]
    LogNormal {
        #[serde(default = "default_mean_bytes")]
        mean_bytes: f64,
        #[serde(default = "default_width_bytes")]
        width_bytes: f64,
        #[serde(default = "default_max_bytes")]
        max_bytes: u32,
    },

    /// Recorded fragments from a [`FragmentSource`].
    Playback {
        #[serde(default = "default_true")]
        overwrite_event_id: bool,
    },
}

fn default_fixed_words() -> u32 {
    MIN_WORDS_IN_FRAGMENT
}

fn default_min_words() -> u32 {
    MIN_WORDS_IN_FRAGMENT
}

fn default_max_words() -> u32 {
    512
}

fn default_mean_bytes() -> f64 {
    2048.0
}

fn default_width_bytes() -> f64 {
    1024.0
}

fn default_max_bytes() -> u32 {
    65536
}

fn default_true() -> bool {
    true
}

impl Default for SizeMode {
    fn default() -> Self {
        Self::Uniform {
            min_words: default_min_words(),
            max_words: default_max_words(),
        }
    }
}

impl SizeMode {
    /// Largest fragment this mode can synthesize, in words.
    pub fn max_words(&self) -> Option<u32> {
        match *self {
            Self::Fixed { words } => Some(words),
            Self::Uniform {
                min_words,
                max_words,
            } => Some(max_words.max(min_words)),
            Self::LogNormal { max_bytes, .. } => {
                Some((max_bytes / BYTES_IN_WORD as u32).max(MIN_WORDS_IN_FRAGMENT))
            }
            Self::Playback { .. } => None,
        }
    }
}

/// External supplier of recorded fragments.
pub trait FragmentSource: Send {
    /// Move to the next recorded event. Returns `false` once exhausted.
    fn next_event(&mut self) -> bool;

    /// Bytes recorded for `fed_id` in the current event; empty when the FED
    /// contributed nothing.
    fn next_payload(&mut self, fed_id: u16) -> Vec<u8>;
}

/// In-memory [`FragmentSource`] over pre-recorded events.
#[derive(Debug, Default)]
pub struct ReplaySource {
    pending: VecDeque<HashMap<u16, Vec<u8>>>,
    current: HashMap<u16, Vec<u8>>,
}

impl ReplaySource {
    pub fn new(events: impl IntoIterator<Item = HashMap<u16, Vec<u8>>>) -> Self {
        Self {
            pending: events.into_iter().collect(),
            current: HashMap::new(),
        }
    }

    pub fn push_event(&mut self, event: HashMap<u16, Vec<u8>>) {
        self.pending.push_back(event);
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FragmentSource for ReplaySource {
    fn next_event(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(event) => {
                self.current = event;
                true
            }
            None => {
                self.current.clear();
                false
            }
        }
    }

    fn next_payload(&mut self, fed_id: u16) -> Vec<u8> {
        self.current.remove(&fed_id).unwrap_or_default()
    }
}

/// Outcome of filling one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateReport {
    pub fragments: usize,
    pub bytes: usize,
    pub max_fragment_bytes: usize,
    pub expansions: usize,
}

enum Piece {
    Synth(FragmentParams),
    Raw(Vec<u8>),
}

impl Piece {
    fn len(&self) -> usize {
        match self {
            Self::Synth(p) => p.byte_len(),
            Self::Raw(bytes) => bytes.len(),
        }
    }

    fn push_into(&self, sf: &mut SuperFragment) -> Result<(), PushError> {
        match self {
            Self::Synth(p) => sf.try_push(p),
            Self::Raw(bytes) => sf.try_push_raw(bytes),
        }
    }
}

/// Fills events with fragments. Owned by the execution loop.
pub struct FragmentGenerator {
    mode: SizeMode,
    rng: fastrand::Rng,
    source: Option<Box<dyn FragmentSource>>,
}

impl std::fmt::Debug for FragmentGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentGenerator")
            .field("mode", &self.mode)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl FragmentGenerator {
    pub fn new(mode: SizeMode) -> Self {
        Self {
            mode,
            rng: fastrand::Rng::new(),
            source: None,
        }
    }

    /// Fixed seed for reproducible sizes.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn with_source(mut self, source: Box<dyn FragmentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn mode(&self) -> &SizeMode {
        &self.mode
    }

    /// Draw the next fragment length in words.
    pub fn next_length_words(&mut self) -> u32 {
        match self.mode {
            SizeMode::Fixed { words } => words,
            SizeMode::Uniform {
                min_words,
                max_words,
            } => {
                let lo = min_words.max(MIN_WORDS_IN_FRAGMENT);
                if max_words > lo {
                    self.rng.u32(lo..max_words)
                } else {
                    lo
                }
            }
            SizeMode::LogNormal {
                mean_bytes,
                width_bytes,
                max_bytes,
            } => {
                let bytes = self.lognormal(mean_bytes, width_bytes);
                let words = (bytes / BYTES_IN_WORD as f64).ceil() as u32;
                let cap = (max_bytes / BYTES_IN_WORD as u32).max(MIN_WORDS_IN_FRAGMENT);
                words.clamp(MIN_WORDS_IN_FRAGMENT, cap)
            }
            SizeMode::Playback { .. } => MIN_WORDS_IN_FRAGMENT,
        }
    }

    fn lognormal(&mut self, mean: f64, width: f64) -> f64 {
        if mean <= 0.0 {
            return 0.0;
        }
        let ratio = (width * width) / (mean * mean);
        let sigma = (1.0 + ratio).ln().sqrt();
        let mu = mean.ln() - 0.5 * sigma * sigma;
        // Box-Muller; u1 in (0, 1] keeps ln finite.
        let u1 = 1.0 - self.rng.f64();
        let u2 = self.rng.f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        (mu + sigma * z).exp()
    }

    /// Fill `event` with one fragment per FED id.
    ///
    /// The event is (re)initialised with `event_number` first.
    pub fn fill_event(
        &mut self,
        event: &mut Event,
        event_number: u32,
        fed_ids: &[u16],
    ) -> Result<GenerateReport, GeneratorError> {
        let overwrite = match self.mode {
            SizeMode::Playback { overwrite_event_id } => {
                let source = self.source.as_mut().ok_or(GeneratorError::Exhausted)?;
                if !source.next_event() {
                    return Err(GeneratorError::Exhausted);
                }
                Some(overwrite_event_id)
            }
            _ => None,
        };

        event.prepare(event_number);
        let slots = event.capacity();
        let mut report = GenerateReport::default();

        for (i, &fed_id) in fed_ids.iter().enumerate() {
            if slots == 0 {
                return Err(GeneratorError::SlotsExhausted { fed_id });
            }
            let slot = i % slots;
            let piece = match overwrite {
                Some(overwrite) => {
                    let mut bytes = self
                        .source
                        .as_mut()
                        .map(|s| s.next_payload(fed_id))
                        .unwrap_or_default();
                    if bytes.is_empty() {
                        continue;
                    }
                    if overwrite {
                        FedHeader::overwrite_lvl1(&mut bytes, event_number)?;
                    }
                    Piece::Raw(bytes)
                }
                None => {
                    let words = self.next_length_words();
                    Piece::Synth(FragmentParams::new(event_number, fed_id, words))
                }
            };

            loop {
                let outcome = match event.super_fragment_mut(slot) {
                    Some(sf) => {
                        sf.mark_used();
                        piece.push_into(sf)
                    }
                    None => return Err(GeneratorError::SlotsExhausted { fed_id }),
                };
                match outcome {
                    Ok(()) => break,
                    Err(PushError::Capacity(CapacityExceeded::Bytes { .. })) => {
                        if let Some(bigger) = event.super_fragment(slot).map(expand) {
                            tracing::trace!(
                                slot,
                                bytes = bigger.byte_capacity(),
                                "expanding superfragment"
                            );
                            event.replace_super_fragment(slot, bigger);
                            report.expansions += 1;
                        }
                    }
                    Err(PushError::Capacity(CapacityExceeded::Fragments { .. })) => {
                        return Err(GeneratorError::SlotsExhausted { fed_id });
                    }
                    Err(PushError::Framing(e)) => return Err(GeneratorError::Framing(e)),
                }
            }

            let len = piece.len();
            report.fragments += 1;
            report.bytes += len;
            report.max_fragment_bytes = report.max_fragment_bytes.max(len);
        }
        Ok(report)
    }
}
