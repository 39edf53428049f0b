//! Host task queue.
//!
//! A binary min-heap of tasks keyed by `(expiration time, insertion
//! sequence)`: the most urgent unexpired entry pops first, ties resolve in
//! submission order. A task that reports a continuation is kept rather than
//! discarded, so an interrupted unit of work resumes under its original
//! priority and expiration. The runner itself lives on the engine; this
//! module only supplies the queue, the priority/timeout table and the
//! clock abstraction.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

// =============================================================================
// Clock
// =============================================================================

/// Monotonic time source, in milliseconds. The engine never reads wall
/// time directly, which is what makes expiration and time-slice behavior
/// testable.
pub trait Clock {
    fn now(&self) -> u64;
}

/// Production clock: milliseconds since construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Deterministic clock for tests. Cloned handles share the same time;
/// `auto_step` advances time on every read, which forces yield points at a
/// known cadence.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    auto_step: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock that advances by `step` ms on every `now()` read.
    pub fn stepping(step: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            auto_step: step,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        let t = self.now.get();
        self.now.set(t + self.auto_step);
        t
    }
}

// =============================================================================
// Priorities
// =============================================================================

/// Host-scheduler priority levels, with the timeout that seeds a task's
/// expiration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulerPriority {
    /// Expired on arrival: runs at the next opportunity regardless of slice.
    Immediate,
    UserBlocking,
    Normal,
    Low,
    /// Never expires.
    Idle,
}

impl SchedulerPriority {
    /// Expiration offset in ms. Immediate is already expired (-1).
    pub fn timeout_ms(self) -> i64 {
        match self {
            SchedulerPriority::Immediate => -1,
            SchedulerPriority::UserBlocking => 250,
            SchedulerPriority::Normal => 5_000,
            SchedulerPriority::Low => 10_000,
            SchedulerPriority::Idle => i64::MAX / 2,
        }
    }
}

// =============================================================================
// Task queue
// =============================================================================

/// Handle for cancelling a scheduled task.
pub type TaskId = u64;

struct Task<T> {
    id: TaskId,
    /// `None` after cancellation; popped lazily.
    payload: Option<T>,
    priority: SchedulerPriority,
    expiration: i64,
}

impl<T> Task<T> {
    #[inline]
    fn sort_key(&self) -> (i64, TaskId) {
        (self.expiration, self.id)
    }
}

/// Priority min-heap of host tasks.
pub struct TaskQueue<T> {
    heap: Vec<Task<T>>,
    next_id: TaskId,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            next_id: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.heap.iter().any(|t| t.payload.is_some())
    }

    /// Schedule a task; returns its cancellation handle and the expiration
    /// it was assigned.
    pub fn push(&mut self, priority: SchedulerPriority, payload: T, now: u64) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        let task = Task {
            id,
            payload: Some(payload),
            priority,
            expiration: now as i64 + priority.timeout_ms(),
        };
        self.heap.push(task);
        self.sift_up(self.heap.len() - 1);
        id
    }

    /// Cancel by handle. The entry stays in the heap as a tombstone and is
    /// skipped when it surfaces.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        for task in &mut self.heap {
            if task.id == id {
                let was_live = task.payload.is_some();
                task.payload = None;
                return was_live;
            }
        }
        false
    }

    /// Expiration of the most urgent live task.
    pub fn peek_expiration(&mut self) -> Option<i64> {
        self.drop_cancelled();
        self.heap.first().map(|t| t.expiration)
    }

    /// Take the most urgent live task's payload, leaving the entry in
    /// place. Pair with [`TaskQueue::finish`] (pop) or
    /// [`TaskQueue::restore`] (continuation).
    pub fn take_top(&mut self) -> Option<(TaskId, SchedulerPriority, i64, T)> {
        self.drop_cancelled();
        let top = self.heap.first_mut()?;
        let payload = top.payload.take()?;
        Some((top.id, top.priority, top.expiration, payload))
    }

    /// The task produced a continuation: reinsert the payload, keeping the
    /// original expiration and submission order.
    pub fn restore(&mut self, id: TaskId, payload: T) {
        if let Some(top) = self.heap.first_mut() {
            if top.id == id {
                top.payload = Some(payload);
                return;
            }
        }
        // The top moved (shouldn't happen single-threaded); fall back to a
        // fresh entry preserving nothing but the payload.
        for task in &mut self.heap {
            if task.id == id {
                task.payload = Some(payload);
                return;
            }
        }
    }

    /// The task completed: drop its (already emptied) entry.
    pub fn finish(&mut self, id: TaskId) {
        if self.heap.first().is_some_and(|t| t.id == id) {
            self.pop_top();
        }
    }

    fn pop_top(&mut self) {
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
    }

    fn drop_cancelled(&mut self) {
        while self.heap.first().is_some_and(|t| t.payload.is_none()) {
            self.pop_top();
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[parent].sort_key() > self.heap[index].sort_key() {
                self.heap.swap(parent, index);
                index = parent;
            } else {
                return;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = index * 2 + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.heap[left].sort_key() < self.heap[smallest].sort_key() {
                smallest = left;
            }
            if right < len && self.heap[right].sort_key() < self.heap[smallest].sort_key() {
                smallest = right;
            }
            if smallest == index {
                return;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_order_by_expiration_then_seq() {
        let mut q: TaskQueue<&str> = TaskQueue::new();
        q.push(SchedulerPriority::Normal, "normal", 0);
        q.push(SchedulerPriority::Immediate, "immediate", 0);
        q.push(SchedulerPriority::UserBlocking, "blocking", 0);
        q.push(SchedulerPriority::Immediate, "immediate2", 0);

        let mut order = Vec::new();
        while let Some((id, _, _, payload)) = q.take_top() {
            order.push(payload);
            q.finish(id);
        }
        // Same expiration resolves in submission order.
        assert_eq!(order, vec!["immediate", "immediate2", "blocking", "normal"]);
    }

    #[test]
    fn test_cancel_is_skipped() {
        let mut q: TaskQueue<&str> = TaskQueue::new();
        let a = q.push(SchedulerPriority::Immediate, "a", 0);
        q.push(SchedulerPriority::Normal, "b", 0);

        assert!(q.cancel(a));
        assert!(!q.cancel(a));

        let (id, _, _, payload) = q.take_top().unwrap();
        assert_eq!(payload, "b");
        q.finish(id);
        assert!(q.is_empty());
    }

    #[test]
    fn test_continuation_keeps_position() {
        let mut q: TaskQueue<&str> = TaskQueue::new();
        let a = q.push(SchedulerPriority::Normal, "a", 0);
        q.push(SchedulerPriority::Normal, "b", 0);

        let (id, _, exp, payload) = q.take_top().unwrap();
        assert_eq!((id, payload), (a, "a"));
        q.restore(id, "a-continued");

        // Still ahead of "b": original expiration and sequence kept.
        let (id2, _, exp2, payload) = q.take_top().unwrap();
        assert_eq!(payload, "a-continued");
        assert_eq!(id2, a);
        assert_eq!(exp, exp2);
    }

    #[test]
    fn test_later_now_expires_later() {
        let mut q: TaskQueue<&str> = TaskQueue::new();
        q.push(SchedulerPriority::Normal, "early", 0);
        q.push(SchedulerPriority::Normal, "late", 1_000);
        let (_, _, exp_early, _) = q.take_top().unwrap();
        assert_eq!(exp_early, 5_000);
    }

    #[test]
    fn test_manual_clock_stepping() {
        let clock = ManualClock::stepping(3);
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.now(), 3);
        let handle = clock.clone();
        handle.advance(100);
        assert_eq!(clock.now(), 106);
    }
}
