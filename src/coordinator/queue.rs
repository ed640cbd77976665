//! Priority queues feeding the dispatch scheduler.
//!
//! Admitted requests wait in one FIFO queue per [`RequestPriority`]. The
//! scheduler always takes from the highest non-empty queue, so a High request
//! enqueued after a Low one is still dispatched first. The queues also carry the
//! scheduler's run state, letting enqueue decide atomically whether a drain task
//! must be started.

use std::collections::VecDeque;
use std::fmt;

use futures_util::future::BoxFuture;

use crate::coordinator::{RequestKey, RequestPriority};

/// A request waiting for dispatch.
pub struct QueuedRequest {
    /// Deduplication key
    pub key: RequestKey,
    /// Ledger registration this dispatch completes
    pub ticket: u64,
    /// Scheduling tier
    pub priority: RequestPriority,
    /// The dispatch job; runs the upstream call with retries and completes the ledger entry
    pub dispatch: BoxFuture<'static, ()>,
}

impl fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Whether a drain task is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// No drain task; the next enqueue starts one
    #[default]
    Idle,
    /// A drain task is taking requests off the queues
    Draining,
}

/// Number of waiting requests per priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepths {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepths {
    /// Waiting requests across all priorities.
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

/// One FIFO queue per priority plus the scheduler state.
#[derive(Debug, Default)]
pub struct PriorityQueues {
    high: VecDeque<QueuedRequest>,
    normal: VecDeque<QueuedRequest>,
    low: VecDeque<QueuedRequest>,
    state: SchedulerState,
}

impl PriorityQueues {
    /// Create empty, idle queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, priority: RequestPriority) -> &mut VecDeque<QueuedRequest> {
        match priority {
            RequestPriority::High => &mut self.high,
            RequestPriority::Normal => &mut self.normal,
            RequestPriority::Low => &mut self.low,
        }
    }

    /// Enqueue a request at the back of its priority's queue.
    ///
    /// Returns `true` when the scheduler was idle and is now marked draining; the
    /// caller must then start the drain task.
    pub fn push(&mut self, request: QueuedRequest) -> bool {
        self.queue_mut(request.priority).push_back(request);
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Draining;
            true
        } else {
            false
        }
    }

    /// Take the oldest request of the highest non-empty priority.
    ///
    /// Marks the scheduler idle when every queue is empty.
    pub fn pop_next(&mut self) -> Option<QueuedRequest> {
        let next = self
            .high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front());
        if next.is_none() {
            self.state = SchedulerState::Idle;
        }
        next
    }

    /// Current queue depths.
    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            high: self.high.len(),
            normal: self.normal.len(),
            low: self.low.len(),
        }
    }

    /// Drop every waiting request and mark the scheduler idle.
    ///
    /// Returns the number of requests dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.depths().total();
        self.high.clear();
        self.normal.clear();
        self.low.clear();
        self.state = SchedulerState::Idle;
        dropped
    }

    /// Current scheduler state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }
}
