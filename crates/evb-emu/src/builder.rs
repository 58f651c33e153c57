// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builder unit: the command thread plus the consumer-facing API.
//!
//! Lifecycle commands are queued on a channel and applied by a dedicated
//! command thread, so callers never block on a slow entry action unless they
//! ask to with [`BuilderUnit::execute`]. Consumer requests
//! ([`BuilderUnit::allocate`], [`BuilderUnit::discard`]) go straight to the
//! shared resources and are served by the execution loop.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use crate::actions::{BuilderActions, SourceFactory};
use crate::config::{BuilderConfig, ConfigError};
use crate::error::Rejected;
use crate::executor::LoopStatus;
use crate::fsm::{Command, State, StateCell, StateMachine};
use crate::resources::{BuilderStats, SharedResources};
use crate::sink::TransportSink;

/// Builder unit errors.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("command channel closed")]
    ChannelClosed,

    #[error("{0} is posted internally and cannot be submitted")]
    NotAnExternalCommand(Command),

    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

type Reply = Sender<Result<State, Rejected>>;

enum Message {
    Command(Command, Option<Reply>),
    Shutdown,
}

/// A running builder unit.
pub struct BuilderUnit {
    tx: Sender<Message>,
    state: Arc<StateCell>,
    resources: Arc<SharedResources>,
    machine: Arc<Mutex<StateMachine<BuilderActions>>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BuilderUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderUnit")
            .field("state", &self.state())
            .finish()
    }
}

impl BuilderUnit {
    /// Start the command thread. The unit begins in `Halted`.
    pub fn start(config: BuilderConfig, sink: Arc<dyn TransportSink>) -> Result<Self, BuilderError> {
        Self::start_with(config, sink, None)
    }

    /// Start with a playback source, recreated on every configure.
    pub fn start_with_source(
        config: BuilderConfig,
        sink: Arc<dyn TransportSink>,
        factory: SourceFactory,
    ) -> Result<Self, BuilderError> {
        Self::start_with(config, sink, Some(factory))
    }

    /// Load and validate a TOML configuration, then start.
    pub fn start_from_file<P: AsRef<Path>>(
        path: P,
        sink: Arc<dyn TransportSink>,
    ) -> Result<Self, BuilderError> {
        let config = BuilderConfig::from_file(path)?;
        Self::start(config, sink)
    }

    fn start_with(
        config: BuilderConfig,
        sink: Arc<dyn TransportSink>,
        factory: Option<SourceFactory>,
    ) -> Result<Self, BuilderError> {
        let resources = Arc::new(SharedResources::new(
            config.max_task_queue,
            config.average_window,
            config.first_event,
        ));
        let mut actions = BuilderActions::new(config, Arc::clone(&resources), sink);
        if let Some(factory) = factory {
            actions = actions.with_source_factory(factory);
        }
        let machine = StateMachine::new(actions);
        let state = machine.state_cell();
        let machine = Arc::new(Mutex::new(machine));

        let (tx, rx) = channel::unbounded();
        let machine_clone = Arc::clone(&machine);
        let handle = thread::Builder::new()
            .name("evb-command".into())
            .spawn(move || command_loop(rx, machine_clone))?;

        Ok(Self {
            tx,
            state,
            resources,
            machine,
            handle: Some(handle),
        })
    }

    /// Queue an operator command without waiting for it.
    pub fn submit(&self, command: Command) -> Result<(), BuilderError> {
        if !command.is_external() {
            return Err(BuilderError::NotAnExternalCommand(command));
        }
        self.tx
            .send(Message::Command(command, None))
            .map_err(|_| BuilderError::ChannelClosed)
    }

    /// Apply an operator command and wait until it and its follow-ups ran.
    pub fn execute(&self, command: Command) -> Result<State, BuilderError> {
        if !command.is_external() {
            return Err(BuilderError::NotAnExternalCommand(command));
        }
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.tx
            .send(Message::Command(command, Some(reply_tx)))
            .map_err(|_| BuilderError::ChannelClosed)?;
        let state = reply_rx.recv().map_err(|_| BuilderError::ChannelClosed)??;
        Ok(state)
    }

    pub fn state(&self) -> State {
        self.state.load()
    }

    /// State name as reported to operators.
    pub fn visible_state(&self) -> &'static str {
        self.state().visible_name()
    }

    /// Poll until the unit reaches `target`. Returns false on timeout.
    pub fn wait_for_state(&self, target: State, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state() == target {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// The action error that routed the unit to `Failed`, if any.
    pub fn last_error(&self) -> Option<String> {
        self.machine.lock().last_error().map(ToString::to_string)
    }

    /// Register consumer requests; each is answered with one event.
    pub fn allocate(&self, fu_ids: &[u32]) {
        self.resources.allocate(fu_ids);
    }

    /// Hand a sent event back to the pool.
    pub fn discard(&self, bu_id: u32) -> bool {
        self.resources.discard(bu_id)
    }

    pub fn stats(&self) -> BuilderStats {
        self.resources.stats()
    }

    pub fn resources(&self) -> &Arc<SharedResources> {
        &self.resources
    }

    /// One execution loop iteration, for the inline driver.
    pub fn tick(&self) -> LoopStatus {
        self.machine.lock().tick()
    }

    /// Stop the command thread and the execution loop.
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        if handle.join().is_err() {
            tracing::error!("command thread panicked");
        }
    }
}

impl Drop for BuilderUnit {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

fn command_loop(rx: Receiver<Message>, machine: Arc<Mutex<StateMachine<BuilderActions>>>) {
    tracing::debug!("command thread started");
    while let Ok(message) = rx.recv() {
        match message {
            Message::Command(command, reply) => {
                let result = machine.lock().process(command);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Message::Shutdown => break,
        }
    }
    machine.lock().actions_mut().shutdown();
    tracing::debug!("command thread finished");
}
