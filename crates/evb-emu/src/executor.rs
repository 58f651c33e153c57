// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Execution loop.
//!
//! One [`ExecutionLoop::step`] pops a single task and dispatches it:
//!
//! ```text
//! build   : free id -> generate fragments -> built, enqueue send
//! send    : built id -> ready
//! request : (ready id, consumer id) -> segment -> sink -> sent
//! ```
//!
//! The loop never blocks. The threaded driver sleeps for the idle backoff
//! whenever a step reports [`LoopStatus::Idle`] and exits on
//! [`LoopStatus::Stop`] or when the shared stop flag is raised.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::GeneratorError;
use crate::generator::FragmentGenerator;
use crate::queue::TaskKind;
use crate::resources::SharedResources;
use crate::segmenter::MessageSegmenter;
use crate::sink::TransportSink;

/// Outcome of a single loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// No work was available; call again after a backoff.
    Idle,
    /// A task was processed.
    Continue,
    /// The stop flag is set or the pool ran out of ids.
    Stop,
}

/// Owns the generator and segmenter; everything else is shared.
pub struct ExecutionLoop {
    resources: Arc<SharedResources>,
    generator: FragmentGenerator,
    segmenter: MessageSegmenter,
    sink: Arc<dyn TransportSink>,
    replay: bool,
}

impl std::fmt::Debug for ExecutionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLoop")
            .field("generator", &self.generator)
            .field("segmenter", &self.segmenter)
            .field("replay", &self.replay)
            .finish()
    }
}

impl ExecutionLoop {
    pub fn new(
        resources: Arc<SharedResources>,
        generator: FragmentGenerator,
        segmenter: MessageSegmenter,
        sink: Arc<dyn TransportSink>,
    ) -> Self {
        Self {
            resources,
            generator,
            segmenter,
            sink,
            replay: false,
        }
    }

    /// Once every pooled event has been generated, resend the existing
    /// contents instead of generating new fragments.
    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    pub fn resources(&self) -> &Arc<SharedResources> {
        &self.resources
    }

    pub fn segmenter(&self) -> &MessageSegmenter {
        &self.segmenter
    }

    /// Run one iteration.
    pub fn step(&mut self) -> LoopStatus {
        if self.resources.stop_requested() {
            return LoopStatus::Stop;
        }
        let Some(task) = self.resources.queue().pop() else {
            return LoopStatus::Idle;
        };
        tracing::trace!(id = task.id, kind = %task.kind, "task");

        match task.kind {
            TaskKind::Build => self.build(),
            TaskKind::Send => self.send(),
            TaskKind::Request => self.request(),
        }
    }

    // ========================================================================
    // Task handlers
    // ========================================================================

    fn build(&mut self) -> LoopStatus {
        let Some(id) = self.resources.take_free() else {
            tracing::info!("no free resource id left, stopping execution loop");
            return LoopStatus::Stop;
        };
        let Some(handle) = self.resources.event(id) else {
            self.resources.return_free(id);
            return LoopStatus::Stop;
        };

        let pool = self.resources.pool_size() as u64;
        if self.replay && self.resources.events_built() >= pool {
            self.resources.mark_built(id, &Default::default());
            self.resources.queue().push_or_defer(TaskKind::Send);
            return LoopStatus::Continue;
        }

        let event_number = self.resources.next_event_number();
        let fed_ids = self.resources.fed_ids();
        // Only the per-event lock is held here; the owner of an id is the
        // only one who touches its event.
        let result = {
            let mut event = handle.lock();
            self.generator.fill_event(&mut event, event_number, &fed_ids)
        };

        match result {
            Ok(report) => {
                self.resources.mark_built(id, &report);
                self.resources.queue().push_or_defer(TaskKind::Send);
            }
            Err(GeneratorError::Exhausted) => {
                tracing::info!(id, "fragment source exhausted");
                self.resources.record_generator_failure();
                self.resources.return_free(id);
            }
            Err(e) => {
                tracing::error!(id, error = %e, "event generation failed");
                self.resources.record_generator_failure();
                self.resources.return_free(id);
            }
        }
        LoopStatus::Continue
    }

    fn send(&mut self) -> LoopStatus {
        match self.resources.take_built() {
            Some(id) => self.resources.push_ready(id),
            None => tracing::debug!("send task without a built event"),
        }
        LoopStatus::Continue
    }

    fn request(&mut self) -> LoopStatus {
        let Some((bu_id, fu_id)) = self.resources.take_ready_with_request() else {
            if self.resources.pending_requests() == 0 {
                return LoopStatus::Continue;
            }
            self.resources.queue().push_or_defer(TaskKind::Request);
            // Only unanswerable requests left in the queue: back off.
            return if self.resources.queue().len() <= self.resources.pending_requests() {
                LoopStatus::Idle
            } else {
                LoopStatus::Continue
            };
        };

        let chain = match self.resources.event(bu_id) {
            Some(handle) => {
                let event = handle.lock();
                self.segmenter.build_chain(&event, fu_id)
            }
            None => {
                self.resources.requeue_request(fu_id);
                self.resources.queue().push_or_defer(TaskKind::Request);
                return LoopStatus::Continue;
            }
        };

        match chain {
            Ok(chain) => {
                let blocks = chain.len();
                if self.sink.send(chain) {
                    self.resources.mark_sent(bu_id);
                    tracing::trace!(bu_id, fu_id, blocks, "event sent");
                } else {
                    self.resources.requeue_ready(bu_id, fu_id);
                    self.resources.queue().push_or_defer(TaskKind::Request);
                    return LoopStatus::Idle;
                }
            }
            Err(e) => {
                // The contents cannot be cut; rebuild the event from scratch.
                tracing::error!(bu_id, error = %e, "segmentation failed, rebuilding event");
                self.resources.record_segment_failure();
                self.resources.return_free(bu_id);
                self.resources.requeue_request(fu_id);
                self.resources.queue().push_or_defer(TaskKind::Build);
                self.resources.queue().push_or_defer(TaskKind::Request);
            }
        }
        LoopStatus::Continue
    }
}

// ============================================================================
// Threaded driver
// ============================================================================

/// Run `exec` on a dedicated thread until it reports [`LoopStatus::Stop`].
///
/// The loop is handed back through the join handle so its generator state
/// survives a stop/enable cycle.
pub fn spawn(
    mut exec: ExecutionLoop,
    idle_backoff: Duration,
) -> io::Result<JoinHandle<ExecutionLoop>> {
    thread::Builder::new()
        .name("evb-exec".into())
        .spawn(move || {
            tracing::debug!("execution loop started");
            let mut processed: u64 = 0;
            loop {
                match exec.step() {
                    LoopStatus::Continue => processed += 1,
                    LoopStatus::Idle => thread::sleep(idle_backoff),
                    LoopStatus::Stop => break,
                }
            }
            tracing::debug!(processed, "execution loop finished");
            exec
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLayout;
    use crate::generator::SizeMode;
    use crate::segmenter::ChainMode;
    use crate::sink::CollectingSink;

    struct RefusingSink;

    impl TransportSink for RefusingSink {
        fn send(&self, _chain: crate::segmenter::BlockChain) -> bool {
            false
        }
    }

    fn setup(pool: usize, sink: Arc<dyn TransportSink>) -> ExecutionLoop {
        let res = Arc::new(SharedResources::new(64, 16, 1));
        res.populate_events(pool, &EventLayout::uniform(2, 4));
        res.set_fed_ids(vec![1, 2, 3, 4]);
        let generator = FragmentGenerator::new(SizeMode::Fixed { words: 3 });
        let segmenter = MessageSegmenter::new(4096, ChainMode::Normal).unwrap();
        ExecutionLoop::new(res, generator, segmenter, sink)
    }

    fn run_until_idle(exec: &mut ExecutionLoop) {
        for _ in 0..1000 {
            if exec.step() != LoopStatus::Continue {
                return;
            }
        }
    }

    #[test]
    fn test_idle_on_empty_queue() {
        let mut exec = setup(1, Arc::new(CollectingSink::new()));
        assert_eq!(exec.step(), LoopStatus::Idle);
    }

    #[test]
    fn test_build_send_request() {
        let sink = Arc::new(CollectingSink::new());
        let mut exec = setup(2, sink.clone());
        let res = Arc::clone(exec.resources());
        res.queue().push_task(TaskKind::Build);
        res.allocate(&[9]);

        run_until_idle(&mut exec);

        let chains = sink.take();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].fragment_count().unwrap(), 4);
        let header = chains[0].blocks()[0].header();
        assert_eq!(header.fu_transaction_id, 9);
        assert_eq!(header.event_number, 1);
        assert_eq!(res.sent_count(), 1);
    }

    #[test]
    fn test_request_waits_for_ready_event() {
        let sink = Arc::new(CollectingSink::new());
        let mut exec = setup(1, sink.clone());
        let res = Arc::clone(exec.resources());
        res.allocate(&[5]);

        // Nothing built yet: the request is requeued and the loop backs off.
        assert_eq!(exec.step(), LoopStatus::Idle);
        assert_eq!(res.queue().len(), 1);
        assert_eq!(res.pending_requests(), 1);

        res.queue().push_task(TaskKind::Build);
        run_until_idle(&mut exec);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_sink_failure_keeps_event_ready() {
        let mut exec = setup(1, Arc::new(RefusingSink));
        let res = Arc::clone(exec.resources());
        res.queue().push_task(TaskKind::Build);
        res.allocate(&[3]);
        // build, request (nothing ready), send, request (refused)
        for _ in 0..4 {
            exec.step();
        }
        assert_eq!(res.ready_count(), 1);
        assert_eq!(res.pending_requests(), 1);
        assert_eq!(res.sent_count(), 0);
        assert_eq!(res.stats().counters.sink_failures, 1);
    }

    #[test]
    fn test_build_without_free_id_stops() {
        let mut exec = setup(1, Arc::new(CollectingSink::new()));
        let res = Arc::clone(exec.resources());
        res.queue().push_task(TaskKind::Build);
        res.queue().push_task(TaskKind::Build);
        assert_eq!(exec.step(), LoopStatus::Continue);
        assert_eq!(exec.step(), LoopStatus::Stop);
    }

    #[test]
    fn test_stop_flag() {
        let mut exec = setup(1, Arc::new(CollectingSink::new()));
        exec.resources().queue().push_task(TaskKind::Build);
        exec.resources().request_stop();
        assert_eq!(exec.step(), LoopStatus::Stop);
        assert_eq!(exec.resources().queue().len(), 1);
    }

    #[test]
    fn test_replay_reuses_events() {
        let sink = Arc::new(CollectingSink::new());
        let mut exec = setup(1, sink.clone()).with_replay(true);
        let res = Arc::clone(exec.resources());
        res.queue().push_task(TaskKind::Build);
        res.allocate(&[1]);
        run_until_idle(&mut exec);
        assert!(res.discard(0));
        res.allocate(&[2]);
        run_until_idle(&mut exec);

        let chains = sink.take();
        assert_eq!(chains.len(), 2);
        // The second chain carries the first event's contents.
        assert_eq!(chains[0].blocks()[0].header().event_number, 1);
        assert_eq!(chains[1].blocks()[0].header().event_number, 1);
        assert_eq!(res.stats().counters.built, 2);
    }

    #[test]
    fn test_threaded_driver_stops_on_flag() {
        let sink = Arc::new(CollectingSink::new());
        let exec = setup(2, sink.clone());
        let res = Arc::clone(exec.resources());
        res.queue().push_task(TaskKind::Build);
        res.queue().push_task(TaskKind::Build);
        res.allocate(&[1, 2]);

        let handle = spawn(exec, Duration::from_millis(1)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while sink.len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        res.request_stop();
        let exec = handle.join().unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(exec.resources().sent_count(), 2);
    }
}
