// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run-to-completion lifecycle machine.
//!
//! A command is looked up in the transition table; when accepted, the exit
//! action of the current state runs, the state changes, and the entry action
//! of the new state runs. An entry action may post a follow-up command (the
//! `*Done` completions), which is processed before [`StateMachine::process`]
//! returns. Any action error becomes a `Fail` command.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{ActionError, Rejected};
use crate::executor::LoopStatus;
use crate::fsm::state::{transition, Command, State};

/// Per-state hooks.
pub trait StateActions {
    /// Runs after entering `state`. May return a command to post next.
    fn on_entry(&mut self, state: State) -> Result<Option<Command>, ActionError>;

    /// Runs before leaving `state`.
    fn on_exit(&mut self, state: State) -> Result<(), ActionError>;

    /// One unit of work while in `state`.
    fn on_tick(&mut self, _state: State) -> LoopStatus {
        LoopStatus::Idle
    }
}

/// Current state, readable without locking the machine.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn load(&self) -> State {
        State::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }
}

pub struct StateMachine<A> {
    state: State,
    actions: A,
    cell: Arc<StateCell>,
    last_error: Option<ActionError>,
}

impl<A: std::fmt::Debug> std::fmt::Debug for StateMachine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .field("actions", &self.actions)
            .finish()
    }
}

impl<A: StateActions> StateMachine<A> {
    /// Starts in `Halted`. The entry action of the initial state is run.
    pub fn new(actions: A) -> Self {
        let mut machine = Self {
            state: State::Halted,
            actions,
            cell: Arc::new(StateCell::default()),
            last_error: None,
        };
        let follow_up = machine.run_entry();
        if let Some(cmd) = follow_up {
            // An initial entry can only fail; process the resulting Fail.
            if let Err(e) = machine.process(cmd) {
                tracing::warn!(error = %e, "initial follow-up command dropped");
            }
        }
        machine
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn state_cell(&self) -> Arc<StateCell> {
        Arc::clone(&self.cell)
    }

    /// The action error that last routed the machine to `Failed`.
    pub fn last_error(&self) -> Option<&ActionError> {
        self.last_error.as_ref()
    }

    pub fn actions(&self) -> &A {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut A {
        &mut self.actions
    }

    /// Process `command` and every follow-up it triggers.
    ///
    /// Returns the state reached, or [`Rejected`] when the current state
    /// does not accept `command`. Follow-ups that are not accepted are
    /// logged and dropped.
    pub fn process(&mut self, command: Command) -> Result<State, Rejected> {
        if transition(self.state, command).is_none() {
            tracing::warn!(state = %self.state, %command, "command rejected");
            return Err(Rejected {
                state: self.state.name(),
                command: command.name(),
            });
        }

        let mut pending = VecDeque::from([command]);
        while let Some(cmd) = pending.pop_front() {
            if let Some(next) = self.fire(cmd) {
                pending.push_back(next);
            }
        }
        Ok(self.state)
    }

    /// Run the current state's tick hook.
    pub fn tick(&mut self) -> LoopStatus {
        self.actions.on_tick(self.state)
    }

    fn fire(&mut self, command: Command) -> Option<Command> {
        let Some(next) = transition(self.state, command) else {
            tracing::warn!(state = %self.state, %command, "follow-up command dropped");
            return None;
        };
        if command == Command::Fail && self.state == State::Failed {
            return None;
        }

        if let Err(e) = self.actions.on_exit(self.state) {
            if command == Command::Fail {
                tracing::error!(error = %e, "exit action failed while failing");
            } else {
                return Some(self.record(e));
            }
        }
        tracing::info!(from = %self.state, to = %next, %command, "state transition");
        self.state = next;
        self.cell.store(next);
        self.run_entry()
    }

    fn run_entry(&mut self) -> Option<Command> {
        match self.actions.on_entry(self.state) {
            Ok(follow_up) => follow_up,
            Err(e) => Some(self.record(e)),
        }
    }

    fn record(&mut self, error: ActionError) -> Command {
        tracing::error!(state = %self.state, error = %error, "lifecycle action failed");
        self.last_error = Some(error);
        Command::Fail
    }
}
