// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle states and the transition table.
//!
//! # State Machine
//!
//! ```text
//!   Halted ── Configure ──> Configuring ── ConfigureDone ──> Stopped
//!                                                            │   ^
//!   +---------------------- Ready ---------------------------│---│--+
//!   |  Stopped ── Enable ──> Enabling ── EnableDone ──> Executing   |
//!   |     ^                                                 │       |
//!   |     └──── StopDone ──── Stopping <────── Stop ────────┘       |
//!   +-------------------------------│-------------------------------+
//!                                   │ Halt (from any Ready substate)
//!                                   v
//!                                Halting ── HaltDone ──> Halted
//!
//!   Any state ── Fail ──> Failed
//! ```

use std::fmt;

/// Lifecycle state. `Stopped`, `Enabling`, `Executing` and `Stopping` are
/// substates of the composite `Ready` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum State {
    #[default]
    Halted = 0,
    Configuring = 1,
    Stopped = 2,
    Enabling = 3,
    Executing = 4,
    Stopping = 5,
    Halting = 6,
    /// Terminal until the process is restarted.
    Failed = 7,
}

impl State {
    pub const ALL: [State; 8] = [
        State::Halted,
        State::Configuring,
        State::Stopped,
        State::Enabling,
        State::Executing,
        State::Stopping,
        State::Halting,
        State::Failed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Halted => "Halted",
            Self::Configuring => "Configuring",
            Self::Stopped => "Stopped",
            Self::Enabling => "Enabling",
            Self::Executing => "Executing",
            Self::Stopping => "Stopping",
            Self::Halting => "Halting",
            Self::Failed => "Failed",
        }
    }

    /// Name reported to operators. Stable substates report their composite.
    pub fn visible_name(self) -> &'static str {
        match self {
            Self::Stopped => "Ready",
            Self::Executing => "Enabled",
            other => other.name(),
        }
    }

    /// True for the substates of `Ready`.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Enabling | Self::Executing | Self::Stopping
        )
    }

    /// True while an entry action is expected to post a completion command.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Configuring | Self::Enabling | Self::Stopping | Self::Halting
        )
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        Self::ALL.get(v as usize).copied().unwrap_or(Self::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle command. The `*Done` commands are posted internally by entry
/// actions; operators only send the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Configure,
    ConfigureDone,
    Enable,
    EnableDone,
    Stop,
    StopDone,
    Halt,
    HaltDone,
    Fail,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Self::Configure => "Configure",
            Self::ConfigureDone => "ConfigureDone",
            Self::Enable => "Enable",
            Self::EnableDone => "EnableDone",
            Self::Stop => "Stop",
            Self::StopDone => "StopDone",
            Self::Halt => "Halt",
            Self::HaltDone => "HaltDone",
            Self::Fail => "Fail",
        }
    }

    /// Commands an operator may submit.
    pub fn is_external(self) -> bool {
        matches!(
            self,
            Self::Configure | Self::Enable | Self::Stop | Self::Halt | Self::Fail
        )
    }

    /// Parse an operator command name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "configure" => Some(Self::Configure),
            "enable" => Some(Self::Enable),
            "stop" => Some(Self::Stop),
            "halt" => Some(Self::Halt),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Next state for `command` in `state`, or `None` when the command is not
/// accepted there.
pub fn transition(state: State, command: Command) -> Option<State> {
    use Command as C;
    use State as S;

    match (state, command) {
        (_, C::Fail) => Some(S::Failed),
        (S::Halted, C::Configure) => Some(S::Configuring),
        (S::Configuring, C::ConfigureDone) => Some(S::Stopped),
        (S::Stopped, C::Enable) => Some(S::Enabling),
        (S::Enabling, C::EnableDone) => Some(S::Executing),
        (S::Executing, C::Stop) => Some(S::Stopping),
        (S::Stopping, C::StopDone) => Some(S::Stopped),
        (s, C::Halt) if s.is_ready() => Some(S::Halting),
        (S::Halting, C::HaltDone) => Some(S::Halted),
        _ => None,
    }
}
