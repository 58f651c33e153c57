// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # evb-emu - Event Builder Unit emulator
//!
//! Emulates the builder unit of a detector data-acquisition event builder:
//! it synthesizes events made of FED fragments, packs them into
//! superfragments, cuts each event into a chain of fixed-size transport
//! blocks, and hands the chains to a downstream consumer on request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evb_emu::{BuilderConfig, BuilderUnit, ChannelSink, Command};
//!
//! # fn main() -> Result<(), evb_emu::BuilderError> {
//! let (sink, chains) = ChannelSink::bounded(64);
//! let unit = BuilderUnit::start(BuilderConfig::small(16, 4, 8), Arc::new(sink))?;
//! unit.execute(Command::Configure)?;
//! unit.execute(Command::Enable)?;
//!
//! unit.allocate(&[1, 2, 3]);
//! for chain in chains.iter().take(3) {
//!     let bu_id = chain.bu_resource_id().unwrap_or_default();
//!     unit.discard(bu_id);
//! }
//! unit.execute(Command::Halt)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------+   commands   +--------------------------------+
//! | BuilderUnit API  | -----------> | command thread: StateMachine   |
//! | allocate/discard |              |   BuilderActions (entry/exit)  |
//! +--------+---------+              +---------------+----------------+
//!          |                                        | spawn / stop
//!          v                                        v
//! +------------------+   tasks      +--------------------------------+
//! | SharedResources  | <----------> | ExecutionLoop                  |
//! |  id queues, pool |              |  FragmentGenerator             |
//! |  TaskQueue       |              |  MessageSegmenter -> sink      |
//! +------------------+              +--------------------------------+
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: FED header/trailer codec, CRC, fragment views
//! - [`superfragment`]: fragment arena and FRL sub-header
//! - [`event`], [`generator`]: event pool contents and how they are filled
//! - [`segmenter`]: transport block chains
//! - [`queue`], [`resources`], [`executor`]: task scheduling
//! - [`fsm`], [`actions`], [`builder`]: lifecycle

pub mod actions;
pub mod builder;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod frame;
pub mod fsm;
pub mod generator;
pub mod queue;
pub mod resources;
pub mod segmenter;
pub mod sink;
pub mod superfragment;

pub use actions::{BuilderActions, SourceFactory};
pub use builder::{BuilderError, BuilderUnit};
pub use config::{BuilderConfig, ConfigError, DriverMode};
pub use error::{
    ActionError, CapacityExceeded, FramingError, GeneratorError, PushError, QueueFull, Rejected,
    SegmentError,
};
pub use event::{Event, EventLayout};
pub use executor::{ExecutionLoop, LoopStatus};
pub use frame::{FedHeader, FedTrailer, Fragment, FragmentParams, FragmentRef};
pub use fsm::{Command, State, StateMachine};
pub use generator::{FragmentGenerator, FragmentSource, ReplaySource, SizeMode};
pub use queue::{Task, TaskKind, TaskQueue};
pub use resources::{BuilderStats, Counters, SharedResources};
pub use segmenter::{BlockChain, BlockHeader, ChainMode, MessageSegmenter, TransportBlock};
pub use sink::{ChannelSink, CollectingSink, NullSink, TransportSink};
pub use superfragment::{FrlHeader, SuperFragment};
