// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded task queue with a moving-average size sampler.
//!
//! The queue lock covers only the FIFO, the id counter, the size window and
//! the deferred backlog. Resource ids live elsewhere under their own lock.
//!
//! # Backpressure
//!
//! A push is accepted while `len < max`, so the queue never holds more than
//! `max` tasks. A rejected [`TaskQueue::push`] returns [`QueueFull`] and leaves
//! the queue untouched. Producers that must not lose work use
//! [`TaskQueue::push_or_defer`]: the kind is parked in a backlog and admitted,
//! oldest first, as soon as a pop frees a slot.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::error::QueueFull;

/// Default queue bound.
pub const MAX_TASK_QUEUE_SIZE: usize = 10_000;

/// Default moving-average window width.
pub const AVG_TASK_QUEUE_STAT_WIDTH: usize = 10_000;

/// Task ids wrap back to 1 after this value.
const TASK_ID_WRAP: u32 = 0x0100_0000;

/// Kind of work a task stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Fill a free event with fragments.
    Build,
    /// Move a built event to the ready queue.
    Send,
    /// Serve one outstanding consumer request.
    Request,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Build => "build",
            Self::Send => "send",
            Self::Request => "request",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub id: u32,
    pub kind: TaskKind,
}

/// Fixed-width ring of historical queue sizes.
#[derive(Debug, Clone)]
pub struct SizeWindow {
    samples: Box<[usize]>,
    next: usize,
    filled: usize,
}

impl SizeWindow {
    pub fn new(width: usize) -> Self {
        Self {
            samples: vec![0; width.max(1)].into_boxed_slice(),
            next: 0,
            filled: 0,
        }
    }

    pub fn record(&mut self, size: usize) {
        self.samples[self.next] = size;
        self.next = (self.next + 1) % self.samples.len();
        self.filled = (self.filled + 1).min(self.samples.len());
    }

    pub fn width(&self) -> usize {
        self.samples.len()
    }

    /// Samples collected so far, capped at the width.
    pub fn count(&self) -> usize {
        self.filled
    }

    fn sum(&self) -> usize {
        self.samples.iter().sum()
    }

    /// Sum divided by the window width, biased low until the ring fills.
    pub fn average(&self) -> usize {
        self.sum() / self.samples.len()
    }

    /// Sum divided by the number of samples actually collected.
    pub fn sampled_average(&self) -> usize {
        if self.filled == 0 {
            0
        } else {
            self.sum() / self.filled
        }
    }

    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0);
        self.next = 0;
        self.filled = 0;
    }
}

#[derive(Debug)]
struct QueueInner {
    tasks: VecDeque<Task>,
    deferred: VecDeque<TaskKind>,
    next_id: u32,
    window: SizeWindow,
}

impl QueueInner {
    fn admit(&mut self, kind: TaskKind) -> Task {
        let task = Task {
            id: self.next_id,
            kind,
        };
        self.next_id = if self.next_id + 1 >= TASK_ID_WRAP {
            1
        } else {
            self.next_id + 1
        };
        self.tasks.push_back(task);
        let len = self.tasks.len();
        self.window.record(len);
        task
    }
}

/// Bounded FIFO of tasks shared by producers and the execution loop.
#[derive(Debug)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    max: usize,
}

impl TaskQueue {
    pub fn new(max: usize, window_width: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                deferred: VecDeque::new(),
                next_id: 1,
                window: SizeWindow::new(window_width),
            }),
            max,
        }
    }

    /// Append a task, or reject it when the queue is full.
    pub fn push(&self, kind: TaskKind) -> Result<Task, QueueFull> {
        let mut inner = self.inner.lock();
        if inner.tasks.len() < self.max {
            Ok(inner.admit(kind))
        } else {
            drop(inner);
            tracing::warn!(%kind, max = self.max, "task queue full, rejecting task");
            Err(QueueFull { max: self.max })
        }
    }

    /// Boolean form of [`TaskQueue::push`].
    pub fn push_task(&self, kind: TaskKind) -> bool {
        self.push(kind).is_ok()
    }

    /// Append a task, or park it until a pop frees space.
    ///
    /// Returns the task when admitted immediately, `None` when deferred.
    pub fn push_or_defer(&self, kind: TaskKind) -> Option<Task> {
        let mut inner = self.inner.lock();
        if inner.tasks.len() < self.max && inner.deferred.is_empty() {
            return Some(inner.admit(kind));
        }
        inner.deferred.push_back(kind);
        let backlog = inner.deferred.len();
        drop(inner);
        tracing::debug!(%kind, backlog, "task queue full, deferring task");
        None
    }

    /// Pop the front task. Deferred kinds are admitted into the freed space.
    pub fn pop(&self) -> Option<Task> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.pop_front()?;
        let len = inner.tasks.len();
        inner.window.record(len);
        while inner.tasks.len() < self.max {
            match inner.deferred.pop_front() {
                Some(kind) => {
                    inner.admit(kind);
                }
                None => break,
            }
        }
        Some(task)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Kinds waiting for space.
    pub fn deferred(&self) -> usize {
        self.inner.lock().deferred.len()
    }

    /// Historical average: window sum over window width.
    pub fn average_size(&self) -> usize {
        self.inner.lock().window.average()
    }

    /// Window sum over the number of samples collected.
    pub fn sampled_average(&self) -> usize {
        self.inner.lock().window.sampled_average()
    }

    /// Drop every queued and deferred task.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.tasks.clear();
        inner.deferred.clear();
    }

    pub fn reset_window(&self) {
        self.inner.lock().window.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_ids() {
        let q = TaskQueue::new(8, 4);
        let a = q.push(TaskKind::Build).unwrap();
        let b = q.push(TaskKind::Send).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(q.pop(), Some(a));
        assert_eq!(q.pop(), Some(b));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_backpressure() {
        let q = TaskQueue::new(3, 16);
        for _ in 0..3 {
            assert!(q.push_task(TaskKind::Request));
        }
        assert!(!q.push_task(TaskKind::Request));
        assert_eq!(q.push(TaskKind::Build), Err(QueueFull { max: 3 }));
        assert_eq!(q.len(), 3);

        q.pop();
        assert!(q.push_task(TaskKind::Build));
        assert!(!q.push_task(TaskKind::Build));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_deferred_tasks_admitted_after_pop() {
        let q = TaskQueue::new(2, 16);
        assert!(q.push_or_defer(TaskKind::Build).is_some());
        assert!(q.push_or_defer(TaskKind::Send).is_some());
        assert!(q.push_or_defer(TaskKind::Request).is_none());
        assert_eq!(q.deferred(), 1);

        assert_eq!(q.pop().map(|t| t.kind), Some(TaskKind::Build));
        assert_eq!(q.deferred(), 0);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().map(|t| t.kind), Some(TaskKind::Send));
        assert_eq!(q.pop().map(|t| t.kind), Some(TaskKind::Request));
    }

    #[test]
    fn test_moving_average_biased_until_full() {
        let q = TaskQueue::new(100, 4);
        // Pushes record sizes 1, 2, 3.
        for _ in 0..3 {
            q.push_task(TaskKind::Build);
        }
        assert_eq!(q.average_size(), (1 + 2 + 3) / 4);
        assert_eq!(q.sampled_average(), (1 + 2 + 3) / 3);

        // Two more samples wrap the ring: 4, then 5 overwrites the first 1.
        q.push_task(TaskKind::Build);
        q.push_task(TaskKind::Build);
        assert_eq!(q.average_size(), (5 + 2 + 3 + 4) / 4);
    }

    #[test]
    fn test_window_ring_overwrites_oldest() {
        let mut w = SizeWindow::new(3);
        for s in [10, 20, 30, 40] {
            w.record(s);
        }
        assert_eq!(w.count(), 3);
        assert_eq!(w.average(), (40 + 20 + 30) / 3);
        w.reset();
        assert_eq!(w.average(), 0);
        assert_eq!(w.sampled_average(), 0);
    }

    #[test]
    fn test_clear() {
        let q = TaskQueue::new(1, 4);
        q.push_task(TaskKind::Build);
        q.push_or_defer(TaskKind::Build);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.deferred(), 0);
    }
}
