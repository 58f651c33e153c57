// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle state machine: transition table plus action hooks.

pub mod machine;
pub mod state;

pub use machine::{StateActions, StateCell, StateMachine};
pub use state::{transition, Command, State};
