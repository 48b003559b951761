//! Per-task bounded message queue (spec.md §4.3).
//!
//! Grounded in the `send_message`/`get_message` usage pattern threaded
//! through the original vehicle-info task's send/receive handlers: every
//! cross-task notification is a small value (destination, message id, two
//! parameter words), never a pointer or buffer. One bounded FIFO per task
//! id, guarded by a single `parking_lot::Mutex` since the scheduler and any
//! off-thread producer (the IPC server notifying CarInfo, for instance)
//! must serialize through the same queue.

use octopus_common::task::{TaskId, TASK_COUNT};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Default per-task queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// A value-typed message posted to a task's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskMessage {
    /// Destination task id.
    pub dest: TaskId,
    /// Enumerated message id (see `octopus_common::consts::task_msg` and
    /// per-subsystem catalogues).
    pub msg_id: u16,
    /// First 16-bit parameter.
    pub p1: u16,
    /// Second 16-bit parameter.
    pub p2: u16,
}

/// Outcome of `MessageQueue::send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Enqueued.
    Ok,
    /// Destination queue was at capacity; message dropped.
    Full,
}

struct PerTaskQueue {
    ring: VecDeque<TaskMessage>,
    capacity: usize,
    overflow_count: u64,
}

impl PerTaskQueue {
    fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            overflow_count: 0,
        }
    }
}

/// One bounded FIFO per task id (spec.md §3 "Task message").
///
/// `send`/`get` both serialize through the same mutex, so the queue is safe
/// to drive from the scheduler thread and from any producer running off of
/// it (e.g. the IPC server posting `MODEL_CHANGED` notifications).
pub struct MessageQueue {
    queues: Mutex<[PerTaskQueue; TASK_COUNT]>,
}

impl MessageQueue {
    /// Build a queue set with `DEFAULT_QUEUE_CAPACITY` per task.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Build a queue set with an explicit per-task capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(std::array::from_fn(|_| PerTaskQueue::new(capacity))),
        }
    }

    /// Enqueue a message for `dest`. Overflow policy is drop-newest: the
    /// incoming message is discarded and the destination's overflow
    /// counter is incremented; the call never blocks.
    pub fn send(&self, dest: TaskId, msg_id: u16, p1: u16, p2: u16) -> SendResult {
        let mut queues = self.queues.lock();
        let q = &mut queues[dest.index()];
        if q.ring.len() >= q.capacity {
            q.overflow_count += 1;
            return SendResult::Full;
        }
        q.ring.push_back(TaskMessage {
            dest,
            msg_id,
            p1,
            p2,
        });
        SendResult::Ok
    }

    /// Pop the next message for `dest`, or `None` if its queue is empty
    /// (the "sentinel no-message value" of spec.md §3).
    pub fn get(&self, dest: TaskId) -> Option<TaskMessage> {
        let mut queues = self.queues.lock();
        queues[dest.index()].ring.pop_front()
    }

    /// Number of messages dropped for `dest` due to overflow.
    pub fn overflow_count(&self, dest: TaskId) -> u64 {
        self.queues.lock()[dest.index()].overflow_count
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved_per_destination() {
        let q = MessageQueue::new();
        q.send(TaskId::Ptl, 1, 10, 0);
        q.send(TaskId::Ptl, 2, 20, 0);
        q.send(TaskId::CarInfo, 9, 0, 0);

        assert_eq!(q.get(TaskId::Ptl).unwrap().msg_id, 1);
        assert_eq!(q.get(TaskId::Ptl).unwrap().msg_id, 2);
        assert_eq!(q.get(TaskId::CarInfo).unwrap().msg_id, 9);
    }

    #[test]
    fn empty_queue_returns_none() {
        let q = MessageQueue::new();
        assert!(q.get(TaskId::Ble).is_none());
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let q = MessageQueue::with_capacity(2);
        assert_eq!(q.send(TaskId::Ipc, 1, 0, 0), SendResult::Ok);
        assert_eq!(q.send(TaskId::Ipc, 2, 0, 0), SendResult::Ok);
        assert_eq!(q.send(TaskId::Ipc, 3, 0, 0), SendResult::Full);
        assert_eq!(q.overflow_count(TaskId::Ipc), 1);

        // The two oldest survive; the dropped one never displaces them.
        assert_eq!(q.get(TaskId::Ipc).unwrap().msg_id, 1);
        assert_eq!(q.get(TaskId::Ipc).unwrap().msg_id, 2);
        assert!(q.get(TaskId::Ipc).is_none());
    }

    #[test]
    fn queues_are_independent_per_task() {
        let q = MessageQueue::with_capacity(1);
        q.send(TaskId::CarInfo, 1, 0, 0);
        // A full CarInfo queue must not affect Ptl's.
        assert_eq!(q.send(TaskId::Ptl, 2, 0, 0), SendResult::Ok);
    }
}
