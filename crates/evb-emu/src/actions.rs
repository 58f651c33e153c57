// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builder unit behaviour for each lifecycle state.
//!
//! | State       | Entry                                              | Exit            |
//! |-------------|----------------------------------------------------|-----------------|
//! | Configuring | validate, allocate pool, reset counters            |                 |
//! | Enabling    | seed tasks for a fresh pool, start the loop        |                 |
//! | Executing   | (tick = one loop iteration in inline mode)         | stop the loop   |
//! | Stopping    | drain; undelivered events and tasks are kept       |                 |
//! | Halting     | drain, clear queue and statistics, release pool    |                 |
//! | Failed      | stop the loop                                      |                 |

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{BuilderConfig, DriverMode};
use crate::error::ActionError;
use crate::executor::{self, ExecutionLoop, LoopStatus};
use crate::fsm::{Command, State, StateActions};
use crate::generator::{FragmentGenerator, FragmentSource, SizeMode};
use crate::queue::TaskKind;
use crate::resources::SharedResources;
use crate::segmenter::MessageSegmenter;
use crate::sink::TransportSink;

/// Creates a fresh playback source each time the unit is configured.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FragmentSource> + Send + Sync>;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct BuilderActions {
    config: BuilderConfig,
    resources: Arc<SharedResources>,
    sink: Arc<dyn TransportSink>,
    source_factory: Option<SourceFactory>,
    exec: Option<ExecutionLoop>,
    worker: Option<JoinHandle<ExecutionLoop>>,
    /// Set by Configuring; the next Enabling seeds one task per id.
    fresh_pool: bool,
}

impl std::fmt::Debug for BuilderActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderActions")
            .field("driver", &self.config.driver)
            .field("pool_size", &self.config.pool_size)
            .field("has_loop", &self.exec.is_some())
            .field("worker_running", &self.worker.is_some())
            .finish()
    }
}

impl BuilderActions {
    pub fn new(
        config: BuilderConfig,
        resources: Arc<SharedResources>,
        sink: Arc<dyn TransportSink>,
    ) -> Self {
        Self {
            config,
            resources,
            sink,
            source_factory: None,
            exec: None,
            worker: None,
            fresh_pool: false,
        }
    }

    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.source_factory = Some(factory);
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn resources(&self) -> &Arc<SharedResources> {
        &self.resources
    }

    /// Stop the loop thread, if any, ahead of dropping the unit.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stop_worker() {
            tracing::error!(error = %e, "execution loop did not shut down cleanly");
        }
    }

    /// True while a driver thread owns the execution loop.
    pub fn worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    // ========================================================================
    // Entry actions
    // ========================================================================

    fn configure(&mut self) -> Result<Option<Command>, ActionError> {
        let fail = |reason: String| ActionError::new("Configuring", reason);

        self.config.validate().map_err(|e| fail(e.to_string()))?;
        self.reclaim_worker(State::Configuring)?;

        let segmenter = MessageSegmenter::new(self.config.block_size, self.config.chain_mode)
            .map_err(|e| fail(e.to_string()))?;
        let mut generator = FragmentGenerator::new(self.config.fragment_size.clone());
        if let Some(seed) = self.config.seed {
            generator = generator.with_seed(seed);
        }
        if matches!(self.config.fragment_size, SizeMode::Playback { .. }) {
            let factory = self
                .source_factory
                .as_ref()
                .ok_or_else(|| fail("playback mode without a fragment source".into()))?;
            generator = generator.with_source(factory());
        }

        let res = &self.resources;
        res.request_stop();
        res.queue().clear();
        res.queue().reset_window();
        res.reset_counters();
        res.populate_events(self.config.pool_size, &self.config.event_layout());
        res.set_fed_ids(self.config.fed_ids.clone());
        self.fresh_pool = true;

        self.exec = Some(
            ExecutionLoop::new(
                Arc::clone(&self.resources),
                generator,
                segmenter,
                Arc::clone(&self.sink),
            )
            .with_replay(self.config.replay),
        );

        tracing::info!(
            pool_size = self.config.pool_size,
            super_fragments = self.config.super_fragments,
            fed_ids = self.config.fed_ids.len(),
            block_size = self.config.block_size,
            "configured"
        );
        Ok(Some(Command::ConfigureDone))
    }

    fn enable(&mut self) -> Result<Option<Command>, ActionError> {
        self.reclaim_worker(State::Enabling)?;

        let res = &self.resources;
        res.set_fed_ids(self.config.fed_ids.clone());
        res.clear_stop();

        // After a stop the queue still holds one task per id in flight.
        let (mut builds, mut requests) = (0, 0);
        if self.fresh_pool {
            res.queue().clear();
            builds = res.free_count();
            requests = res.pending_requests();
            for _ in 0..builds {
                res.queue().push_or_defer(TaskKind::Build);
            }
            for _ in 0..requests {
                res.queue().push_or_defer(TaskKind::Request);
            }
            self.fresh_pool = false;
        }
        tracing::info!(builds, requests, driver = ?self.config.driver, "enabling");

        if self.config.driver == DriverMode::Threaded {
            let exec = self
                .exec
                .take()
                .ok_or_else(|| ActionError::new("Enabling", "no execution loop configured"))?;
            let handle = executor::spawn(exec, self.config.idle_backoff())
                .map_err(|e| ActionError::new("Enabling", e.to_string()))?;
            self.worker = Some(handle);
        }
        Ok(Some(Command::EnableDone))
    }

    fn stop(&mut self) -> Result<Option<Command>, ActionError> {
        tracing::info!(
            ready = self.resources.ready_count(),
            queued = self.resources.queue().len(),
            "stopping"
        );
        self.drain("Stopping");
        Ok(Some(Command::StopDone))
    }

    fn halt(&mut self) -> Result<Option<Command>, ActionError> {
        self.resources.request_stop();
        self.reclaim_worker(State::Halting)?;
        self.drain("Halting");

        let res = &self.resources;
        res.queue().clear();
        res.queue().reset_window();
        res.reset_counters();
        res.destroy_events();
        self.exec = None;
        self.fresh_pool = false;
        tracing::info!("halted, event pool released");
        Ok(Some(Command::HaltDone))
    }

    /// Wait for the consumer to discard every sent event.
    fn drain(&self, state: &'static str) {
        let deadline = Instant::now() + self.config.drain_timeout();
        while self.resources.sent_count() > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    state,
                    outstanding = self.resources.sent_count(),
                    "drain timed out with events still at the consumer"
                );
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    // ========================================================================
    // Loop thread
    // ========================================================================

    /// Signal the loop thread and wait up to the stop grace for it to exit.
    fn stop_worker(&mut self) -> Result<(), ActionError> {
        self.resources.request_stop();
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + self.config.stop_grace();
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
        }
        if !handle.is_finished() {
            tracing::warn!(
                grace_ms = self.config.stop_grace_ms,
                "execution loop still running after stop grace"
            );
            self.worker = Some(handle);
            return Ok(());
        }
        let exec = handle
            .join()
            .map_err(|_| ActionError::new("Executing", "execution loop thread panicked"))?;
        self.exec = Some(exec);
        Ok(())
    }

    /// Take back a loop left running by an earlier stop.
    fn reclaim_worker(&mut self, state: State) -> Result<(), ActionError> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.stop_worker()?;
        if self.worker.is_some() {
            return Err(ActionError::new(
                state.name(),
                "previous execution loop did not stop",
            ));
        }
        Ok(())
    }
}

impl StateActions for BuilderActions {
    fn on_entry(&mut self, state: State) -> Result<Option<Command>, ActionError> {
        match state {
            State::Configuring => self.configure(),
            State::Enabling => self.enable(),
            State::Stopping => self.stop(),
            State::Halting => self.halt(),
            State::Failed => {
                self.resources.request_stop();
                tracing::error!("builder unit failed; restart required");
                Ok(None)
            }
            State::Halted | State::Stopped | State::Executing => Ok(None),
        }
    }

    fn on_exit(&mut self, state: State) -> Result<(), ActionError> {
        if state == State::Executing {
            self.stop_worker()?;
        }
        Ok(())
    }

    fn on_tick(&mut self, state: State) -> LoopStatus {
        match (state, self.config.driver, self.exec.as_mut()) {
            (State::Executing, DriverMode::Inline, Some(exec)) => exec.step(),
            _ => LoopStatus::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::StateMachine;
    use crate::sink::CollectingSink;

    fn inline_machine(
        config: BuilderConfig,
    ) -> (StateMachine<BuilderActions>, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let res = Arc::new(SharedResources::new(
            config.max_task_queue,
            config.average_window,
            config.first_event,
        ));
        let actions = BuilderActions::new(config, res, sink.clone());
        (StateMachine::new(actions), sink)
    }

    fn small_inline() -> BuilderConfig {
        BuilderConfig {
            driver: DriverMode::Inline,
            block_size: 4096,
            fragment_size: SizeMode::Fixed { words: 3 },
            drain_timeout_ms: 10,
            ..BuilderConfig::small(2, 2, 4)
        }
    }

    #[test]
    fn test_configure_allocates_pool() {
        let (mut m, _) = inline_machine(small_inline());
        assert_eq!(m.process(Command::Configure), Ok(State::Stopped));
        let res = m.actions().resources();
        assert_eq!(res.pool_size(), 2);
        assert_eq!(res.free_count(), 2);
    }

    #[test]
    fn test_invalid_config_fails() {
        let mut config = small_inline();
        config.pool_size = 0;
        let (mut m, _) = inline_machine(config);
        assert_eq!(m.process(Command::Configure), Ok(State::Failed));
        assert_eq!(m.last_error().map(|e| e.state), Some("Configuring"));
    }

    #[test]
    fn test_playback_without_source_fails() {
        let mut config = small_inline();
        config.fragment_size = SizeMode::Playback {
            overwrite_event_id: true,
        };
        let (mut m, _) = inline_machine(config);
        assert_eq!(m.process(Command::Configure), Ok(State::Failed));
    }

    #[test]
    fn test_enable_seeds_tasks() {
        let (mut m, _) = inline_machine(small_inline());
        m.process(Command::Configure).unwrap();
        m.actions().resources().allocate(&[1, 2, 3]);
        m.process(Command::Enable).unwrap();
        let res = m.actions().resources();
        // Two builds for the pool, three requests for the consumer.
        assert_eq!(res.queue().len(), 5);
    }

    #[test]
    fn test_inline_ticks_send_events() {
        let (mut m, sink) = inline_machine(small_inline());
        m.process(Command::Configure).unwrap();
        m.process(Command::Enable).unwrap();
        m.actions().resources().allocate(&[10, 11]);
        for _ in 0..100 {
            if m.tick() == LoopStatus::Idle && sink.len() == 2 {
                break;
            }
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(m.actions().resources().sent_count(), 2);
    }

    #[test]
    fn test_stop_keeps_undelivered_events() {
        let (mut m, sink) = inline_machine(small_inline());
        m.process(Command::Configure).unwrap();
        m.process(Command::Enable).unwrap();
        for _ in 0..10 {
            m.tick();
        }
        // Both events built and ready, nobody asked for them.
        assert_eq!(m.actions().resources().ready_count(), 2);
        assert_eq!(m.process(Command::Stop), Ok(State::Stopped));
        let res = m.actions().resources();
        assert_eq!(res.ready_count(), 2);
        assert_eq!(res.free_count(), 0);
        assert!(sink.is_empty());

        // Re-enabling delivers the same events, without rebuilding them.
        m.process(Command::Enable).unwrap();
        m.actions().resources().allocate(&[1, 2]);
        for _ in 0..20 {
            m.tick();
        }
        let numbers: Vec<u32> = sink
            .take()
            .iter()
            .map(|c| c.blocks()[0].header().event_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(m.actions().resources().stats().counters.built, 2);
    }

    #[test]
    fn test_stop_keeps_queued_builds() {
        let (mut m, sink) = inline_machine(small_inline());
        m.process(Command::Configure).unwrap();
        m.process(Command::Enable).unwrap();
        // Stop before the loop ran: the seeded builds stay queued.
        assert_eq!(m.process(Command::Stop), Ok(State::Stopped));
        assert_eq!(m.actions().resources().queue().len(), 2);

        m.process(Command::Enable).unwrap();
        assert_eq!(m.actions().resources().queue().len(), 2);
        m.actions().resources().allocate(&[5]);
        for _ in 0..20 {
            m.tick();
        }
        assert_eq!(sink.len(), 1);
        assert_eq!(m.actions().resources().stats().counters.built, 2);
    }

    #[test]
    fn test_halt_resets_everything() {
        let (mut m, _) = inline_machine(small_inline());
        m.process(Command::Configure).unwrap();
        m.process(Command::Enable).unwrap();
        m.actions().resources().allocate(&[1]);
        for _ in 0..20 {
            m.tick();
        }
        assert_eq!(m.process(Command::Halt), Ok(State::Halted));
        let stats = m.actions().resources().stats();
        assert_eq!(stats.pool_size, 0);
        assert_eq!(stats.counters.built, 0);
        assert_eq!(stats.task_queue, 0);

        // The unit can be configured again.
        assert_eq!(m.process(Command::Configure), Ok(State::Stopped));
    }

    #[test]
    fn test_threaded_enable_and_stop() {
        let config = BuilderConfig {
            driver: DriverMode::Threaded,
            ..small_inline()
        };
        let (mut m, sink) = inline_machine(config);
        m.process(Command::Configure).unwrap();
        m.process(Command::Enable).unwrap();
        assert!(m.actions().worker_running());
        m.actions().resources().allocate(&[7]);

        let deadline = Instant::now() + Duration::from_secs(10);
        while sink.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.len(), 1);
        assert_eq!(m.process(Command::Stop), Ok(State::Stopped));
        assert!(!m.actions().worker_running());
    }
}
