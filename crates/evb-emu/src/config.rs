// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builder unit configuration.
//!
//! Supports both programmatic and file-based configuration. Every field has a
//! default, so an empty TOML document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::event::EventLayout;
use crate::frame::{BYTES_IN_WORD, MAX_WORDS_IN_FRAGMENT, MIN_WORDS_IN_FRAGMENT};
use crate::generator::SizeMode;
use crate::queue::{AVG_TASK_QUEUE_STAT_WIDTH, MAX_TASK_QUEUE_SIZE};
use crate::segmenter::{ChainMode, MessageSegmenter, DEFAULT_BLOCK_SIZE};
use crate::superfragment::{DEFAULT_SUPERFRAGMENT_LENGTH, INITIAL_SUPERFRAGMENT_BYTES};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How the execution loop is driven while enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    /// A dedicated thread steps the loop.
    #[default]
    Threaded,
    /// The owner steps the loop through `tick`.
    Inline,
}

/// Builder unit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Number of pooled events (resource ids).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Superfragments per event.
    #[serde(default = "default_super_fragments")]
    pub super_fragments: usize,

    /// Fragment-count capacity of each superfragment.
    #[serde(default = "default_fragments_per_super_fragment")]
    pub fragments_per_super_fragment: usize,

    /// Optional per-slot capacities; overrides `fragments_per_super_fragment`.
    #[serde(default)]
    pub super_fragment_capacities: Vec<usize>,

    /// Initial byte size of each superfragment buffer.
    #[serde(default = "default_initial_super_fragment_bytes")]
    pub initial_super_fragment_bytes: usize,

    /// Transport block size in bytes, block header included.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_max_task_queue")]
    pub max_task_queue: usize,

    /// Width of the task-queue moving-average window.
    #[serde(default = "default_average_window")]
    pub average_window: usize,

    /// Compute the fragment CRC when generating.
    #[serde(default)]
    pub compute_crc: bool,

    /// Event number of the first event after configuring.
    #[serde(default = "default_first_event")]
    pub first_event: u32,

    #[serde(default)]
    pub chain_mode: ChainMode,

    /// Seed for the size generator; random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Resend pooled events instead of regenerating once the pool is full.
    #[serde(default)]
    pub replay: bool,

    /// FED ids contributing to every event.
    #[serde(default = "default_fed_ids")]
    pub fed_ids: Vec<u16>,

    #[serde(default)]
    pub driver: DriverMode,

    /// Sleep between idle loop iterations.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// How long leaving the enabled state waits for the loop thread.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// How long stopping and halting wait for sent events to be discarded.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Fragment size generation. Kept last: it serializes as a TOML table.
    #[serde(default)]
    pub fragment_size: SizeMode,
}

fn default_pool_size() -> usize {
    256
}

fn default_super_fragments() -> usize {
    64
}

fn default_fragments_per_super_fragment() -> usize {
    DEFAULT_SUPERFRAGMENT_LENGTH
}

fn default_initial_super_fragment_bytes() -> usize {
    INITIAL_SUPERFRAGMENT_BYTES
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_max_task_queue() -> usize {
    MAX_TASK_QUEUE_SIZE
}

fn default_average_window() -> usize {
    AVG_TASK_QUEUE_STAT_WIDTH
}

fn default_first_event() -> u32 {
    1
}

fn default_fed_ids() -> Vec<u16> {
    (0..512).collect()
}

fn default_idle_backoff_ms() -> u64 {
    1
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            super_fragments: default_super_fragments(),
            fragments_per_super_fragment: default_fragments_per_super_fragment(),
            super_fragment_capacities: Vec::new(),
            initial_super_fragment_bytes: default_initial_super_fragment_bytes(),
            block_size: default_block_size(),
            max_task_queue: default_max_task_queue(),
            average_window: default_average_window(),
            compute_crc: false,
            first_event: default_first_event(),
            chain_mode: ChainMode::default(),
            seed: None,
            replay: false,
            fed_ids: default_fed_ids(),
            driver: DriverMode::default(),
            idle_backoff_ms: default_idle_backoff_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            log_level: default_log_level(),
            fragment_size: SizeMode::default(),
        }
    }
}

impl BuilderConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Small pool for tests and demos.
    pub fn small(pool_size: usize, super_fragments: usize, fragments_per_slot: usize) -> Self {
        let fed_count = (super_fragments * fragments_per_slot).min(u16::MAX as usize);
        Self {
            pool_size,
            super_fragments,
            fragments_per_super_fragment: fragments_per_slot,
            fed_ids: (0..fed_count as u16).collect(),
            ..Default::default()
        }
    }

    /// Per-slot allocation plan derived from this configuration.
    pub fn event_layout(&self) -> EventLayout {
        let capacities = if self.super_fragment_capacities.is_empty() {
            vec![self.fragments_per_super_fragment; self.super_fragments]
        } else {
            self.super_fragment_capacities.clone()
        };
        EventLayout {
            capacities,
            initial_bytes: self.initial_super_fragment_bytes,
            compute_crc: self.compute_crc,
        }
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.super_fragments == 0 {
            return Err(ConfigError::Invalid(
                "super_fragments must be at least 1".into(),
            ));
        }
        if !self.super_fragment_capacities.is_empty()
            && self.super_fragment_capacities.len() != self.super_fragments
        {
            return Err(ConfigError::Invalid(format!(
                "super_fragment_capacities has {} entries, expected {}",
                self.super_fragment_capacities.len(),
                self.super_fragments
            )));
        }

        let layout = self.event_layout();
        if layout.capacities.iter().any(|&c| c == 0) {
            return Err(ConfigError::Invalid(
                "every superfragment needs a fragment capacity of at least 1".into(),
            ));
        }
        if self.fed_ids.len() > layout.total_fragment_capacity() {
            return Err(ConfigError::Invalid(format!(
                "{} FED ids exceed the event capacity of {} fragments",
                self.fed_ids.len(),
                layout.total_fragment_capacity()
            )));
        }
        if let Some(dup) = first_duplicate(&self.fed_ids) {
            return Err(ConfigError::Invalid(format!("FED id {} listed twice", dup)));
        }
        if self.fed_ids.iter().any(|&id| id > 0x0FFF) {
            return Err(ConfigError::Invalid(
                "FED ids must fit in 12 bits".into(),
            ));
        }

        if self.initial_super_fragment_bytes == 0
            || self.initial_super_fragment_bytes % BYTES_IN_WORD != 0
        {
            return Err(ConfigError::Invalid(format!(
                "initial_super_fragment_bytes {} must be a positive multiple of {}",
                self.initial_super_fragment_bytes, BYTES_IN_WORD
            )));
        }

        MessageSegmenter::new(self.block_size, self.chain_mode)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.max_task_queue == 0 {
            return Err(ConfigError::Invalid(
                "max_task_queue must be at least 1".into(),
            ));
        }
        if self.average_window == 0 {
            return Err(ConfigError::Invalid(
                "average_window must be at least 1".into(),
            ));
        }

        self.validate_size_mode()
    }

    fn validate_size_mode(&self) -> Result<(), ConfigError> {
        match self.fragment_size {
            SizeMode::Fixed { words } => check_words("fixed words", words)?,
            SizeMode::Uniform {
                min_words,
                max_words,
            } => {
                check_words("uniform min_words", min_words)?;
                check_words("uniform max_words", max_words)?;
                if min_words > max_words {
                    return Err(ConfigError::Invalid(format!(
                        "uniform min_words {} exceeds max_words {}",
                        min_words, max_words
                    )));
                }
            }
            SizeMode::LogNormal {
                mean_bytes,
                width_bytes,
                max_bytes,
            } => {
                if !(mean_bytes.is_finite() && mean_bytes > 0.0) || !width_bytes.is_finite()
                    || width_bytes < 0.0
                {
                    return Err(ConfigError::Invalid(
                        "lognormal mean must be positive and width non-negative".into(),
                    ));
                }
                check_words("lognormal max_bytes", max_bytes / BYTES_IN_WORD as u32)?;
            }
            SizeMode::Playback { .. } => {}
        }

        if self.chain_mode == ChainMode::Simple {
            if let Some(words) = self.fragment_size.max_words() {
                let room = self
                    .block_size
                    .saturating_sub(crate::segmenter::BLOCK_HEADER_SIZE)
                    .saturating_sub(crate::superfragment::FRL_HEADER_SIZE);
                if words as usize * BYTES_IN_WORD > room {
                    return Err(ConfigError::Invalid(format!(
                        "simple chain mode needs fragments of at most {} bytes",
                        room
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_words(what: &str, words: u32) -> Result<(), ConfigError> {
    if !(MIN_WORDS_IN_FRAGMENT..=MAX_WORDS_IN_FRAGMENT).contains(&words) {
        return Err(ConfigError::Invalid(format!(
            "{} = {} outside [{}, {}]",
            what, words, MIN_WORDS_IN_FRAGMENT, MAX_WORDS_IN_FRAGMENT
        )));
    }
    Ok(())
}

fn first_duplicate(ids: &[u16]) -> Option<u16> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().find(|id| !seen.insert(*id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BuilderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, 256);
        assert_eq!(config.fed_ids.len(), 512);
        assert_eq!(config.event_layout().total_fragment_capacity(), 64 * 16);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: BuilderConfig = toml::from_str("").unwrap();
        assert_eq!(config, BuilderConfig::default());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            pool_size = 4
            super_fragments = 2
            fragments_per_super_fragment = 8
            block_size = 4096
            chain_mode = "simple"
            driver = "inline"
            fed_ids = [1, 2, 3]

            [fragment_size]
            mode = "fixed"
            words = 3
        "#;
        let config: BuilderConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.chain_mode, ChainMode::Simple);
        assert_eq!(config.driver, DriverMode::Inline);
        assert_eq!(config.fragment_size, SizeMode::Fixed { words: 3 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_too_many_fed_ids() {
        let mut config = BuilderConfig::small(1, 2, 2);
        assert!(config.validate().is_ok());
        config.fed_ids.push(99);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases: Vec<Box<dyn Fn(&mut BuilderConfig)>> = vec![
            Box::new(|c| c.pool_size = 0),
            Box::new(|c| c.block_size = 100),
            Box::new(|c| c.block_size = 4100),
            Box::new(|c| c.super_fragment_capacities = vec![1, 2]),
            Box::new(|c| c.fed_ids = vec![1, 1]),
            Box::new(|c| c.fed_ids = vec![0x1000]),
            Box::new(|c| c.fragment_size = SizeMode::Fixed { words: 2 }),
            Box::new(|c| {
                c.fragment_size = SizeMode::Uniform {
                    min_words: 10,
                    max_words: 5,
                }
            }),
            Box::new(|c| {
                c.chain_mode = ChainMode::Simple;
                c.block_size = 256;
                c.fragment_size = SizeMode::Fixed { words: 100 };
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = BuilderConfig::small(2, 2, 4);
            mutate(&mut config);
            assert!(config.validate().is_err(), "case {} accepted", i);
        }
    }

    #[test]
    fn test_file_roundtrip() {
        let config = BuilderConfig::small(8, 4, 4);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();
        let loaded = BuilderConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_file_reports_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pool_size = 0").unwrap();
        assert!(matches!(
            BuilderConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
