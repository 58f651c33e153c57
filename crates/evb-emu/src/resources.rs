// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resources shared by the command thread and the execution loop.
//!
//! Resource ids move `free -> built -> ready -> sent -> free`. The id
//! collections and the counters sit behind one coarse lock that is only held
//! for short bookkeeping sections; event contents have their own per-event
//! locks so generation and segmentation never run under the coarse lock.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::event::{Event, EventLayout};
use crate::generator::GenerateReport;
use crate::queue::{TaskKind, TaskQueue};

/// Event numbers wrap at 24 bits, like the lvl1 id they become.
const EVENT_NUMBER_WRAP: u32 = 0x0100_0000;

/// Shared handle to one pooled event.
pub type EventHandle = Arc<Mutex<Event>>;

/// Run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub built: u64,
    pub sent: u64,
    pub requested: u64,
    pub discarded: u64,
    /// Requests accepted but not yet answered.
    pub in_bu: u64,
    pub max_fragment_bytes: u64,
    pub expansions: u64,
    pub generator_failures: u64,
    pub segment_failures: u64,
    pub sink_failures: u64,
}

#[derive(Debug, Default)]
struct ResourceState {
    free: VecDeque<u32>,
    built: VecDeque<u32>,
    ready: VecDeque<u32>,
    requests: VecDeque<u32>,
    sent: BTreeSet<u32>,
    counters: Counters,
    event_sequence: u32,
}

/// Point-in-time view of counters and queue depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuilderStats {
    pub counters: Counters,
    pub pool_size: usize,
    pub free: usize,
    pub built: usize,
    pub ready: usize,
    pub sent: usize,
    pub pending_requests: usize,
    pub task_queue: usize,
    pub deferred_tasks: usize,
    pub avg_task_queue: usize,
}

/// The shared resource bundle.
#[derive(Debug)]
pub struct SharedResources {
    state: Mutex<ResourceState>,
    queue: TaskQueue,
    events: RwLock<Vec<EventHandle>>,
    fed_ids: RwLock<Arc<[u16]>>,
    first_event: u32,
    stop: AtomicBool,
}

impl SharedResources {
    pub fn new(max_tasks: usize, window_width: usize, first_event: u32) -> Self {
        Self {
            state: Mutex::new(ResourceState::default()),
            queue: TaskQueue::new(max_tasks, window_width),
            events: RwLock::new(Vec::new()),
            fed_ids: RwLock::new(Arc::from(Vec::new())),
            first_event,
            stop: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    // ------------------------------------------------------------------
    // Event pool
    // ------------------------------------------------------------------

    /// Allocate `pool_size` empty events and mark every id free.
    pub fn populate_events(&self, pool_size: usize, layout: &EventLayout) {
        let events: Vec<EventHandle> = (0..pool_size)
            .map(|id| Arc::new(Mutex::new(Event::new(id as u32, layout.clone()))))
            .collect();
        *self.events.write() = events;

        let mut state = self.state.lock();
        state.free = (0..pool_size as u32).collect();
        state.built.clear();
        state.ready.clear();
        state.sent.clear();
    }

    /// Release the pool. Every id collection is emptied.
    pub fn destroy_events(&self) {
        self.events.write().clear();
        let mut state = self.state.lock();
        state.free.clear();
        state.built.clear();
        state.ready.clear();
        state.requests.clear();
        state.sent.clear();
    }

    pub fn pool_size(&self) -> usize {
        self.events.read().len()
    }

    pub fn event(&self, id: u32) -> Option<EventHandle> {
        self.events.read().get(id as usize).cloned()
    }

    pub fn set_fed_ids(&self, ids: Vec<u16>) {
        *self.fed_ids.write() = Arc::from(ids);
    }

    pub fn fed_ids(&self) -> Arc<[u16]> {
        Arc::clone(&self.fed_ids.read())
    }

    // ------------------------------------------------------------------
    // Id bookkeeping
    // ------------------------------------------------------------------

    /// Pop a free id that belongs to the pool.
    ///
    /// Ids outside the current pool are dropped with a warning.
    pub fn take_free(&self) -> Option<u32> {
        let pool = self.pool_size();
        let mut state = self.state.lock();
        while let Some(id) = state.free.pop_front() {
            if (id as usize) < pool {
                return Some(id);
            }
            tracing::warn!(id, pool, "dropping free id outside the event pool");
        }
        None
    }

    pub fn return_free(&self, id: u32) {
        self.state.lock().free.push_back(id);
    }

    pub fn record_generator_failure(&self) {
        self.state.lock().counters.generator_failures += 1;
    }

    /// Next event number, `(first_event + sequence) mod 2^24`.
    pub fn next_event_number(&self) -> u32 {
        let mut state = self.state.lock();
        let seq = state.event_sequence;
        state.event_sequence = seq.wrapping_add(1);
        self.first_event.wrapping_add(seq) % EVENT_NUMBER_WRAP
    }

    pub fn mark_built(&self, id: u32, report: &GenerateReport) {
        let mut state = self.state.lock();
        state.built.push_back(id);
        let counters = &mut state.counters;
        counters.built += 1;
        counters.expansions += report.expansions as u64;
        counters.max_fragment_bytes = counters
            .max_fragment_bytes
            .max(report.max_fragment_bytes as u64);
    }

    /// Built events so far in this run.
    pub fn events_built(&self) -> u64 {
        self.state.lock().counters.built
    }

    pub fn take_built(&self) -> Option<u32> {
        self.state.lock().built.pop_front()
    }

    pub fn push_ready(&self, id: u32) {
        self.state.lock().ready.push_back(id);
    }

    /// Pair the oldest ready id with the oldest consumer request.
    ///
    /// Returns `(resource id, consumer id)`; nothing is taken unless both exist.
    pub fn take_ready_with_request(&self) -> Option<(u32, u32)> {
        let mut state = self.state.lock();
        if state.ready.is_empty() || state.requests.is_empty() {
            return None;
        }
        let bu = state.ready.pop_front()?;
        let fu = state.requests.pop_front()?;
        Some((bu, fu))
    }

    /// Put back a pair taken by [`SharedResources::take_ready_with_request`].
    pub fn requeue_ready(&self, bu_id: u32, fu_id: u32) {
        let mut state = self.state.lock();
        state.ready.push_front(bu_id);
        state.requests.push_front(fu_id);
        state.counters.sink_failures += 1;
    }

    /// Put a consumer request back at the front of the request queue.
    pub fn requeue_request(&self, fu_id: u32) {
        self.state.lock().requests.push_front(fu_id);
    }

    pub fn record_segment_failure(&self) {
        self.state.lock().counters.segment_failures += 1;
    }

    pub fn mark_sent(&self, bu_id: u32) {
        let mut state = self.state.lock();
        state.sent.insert(bu_id);
        state.counters.sent += 1;
        state.counters.in_bu = state.counters.in_bu.saturating_sub(1);
    }

    /// Register consumer requests and enqueue one request task per id.
    pub fn allocate(&self, fu_ids: &[u32]) {
        {
            let mut state = self.state.lock();
            for &fu in fu_ids {
                state.requests.push_back(fu);
                state.counters.requested += 1;
                state.counters.in_bu += 1;
            }
        }
        for _ in fu_ids {
            self.queue.push_or_defer(TaskKind::Request);
        }
    }

    /// Release a sent event back to the pool and schedule a rebuild.
    ///
    /// Returns `false` when `bu_id` was not outstanding.
    pub fn discard(&self, bu_id: u32) -> bool {
        {
            let mut state = self.state.lock();
            if !state.sent.remove(&bu_id) {
                drop(state);
                tracing::warn!(bu_id, "discard for unknown resource id");
                return false;
            }
            state.free.push_back(bu_id);
            state.counters.discarded += 1;
        }
        self.queue.push_or_defer(TaskKind::Build);
        true
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn ready_count(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Zero the counters and the event-number sequence.
    pub fn reset_counters(&self) {
        let mut state = self.state.lock();
        state.counters = Counters::default();
        state.event_sequence = 0;
    }

    // ------------------------------------------------------------------
    // Stop flag
    // ------------------------------------------------------------------

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BuilderStats {
        let pool_size = self.pool_size();
        let (task_queue, deferred_tasks, avg_task_queue) = (
            self.queue.len(),
            self.queue.deferred(),
            self.queue.average_size(),
        );
        let state = self.state.lock();
        BuilderStats {
            counters: state.counters,
            pool_size,
            free: state.free.len(),
            built: state.built.len(),
            ready: state.ready.len(),
            sent: state.sent.len(),
            pending_requests: state.requests.len(),
            task_queue,
            deferred_tasks,
            avg_task_queue,
        }
    }
}
