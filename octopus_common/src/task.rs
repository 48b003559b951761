//! The closed set of task identifiers shared by the task manager, message
//! queue, protocol layer, and IPC subsystems.
//!
//! The set is closed and statically declared — tasks are never created or
//! destroyed at runtime, so this is a plain enum rather than an open
//! registry of ids.

/// Stable task identifier, drawn from a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskId {
    /// Vehicle-info task: consumes PTL frames, owns the data model.
    CarInfo = 0,
    /// Protocol-layer task: frame codec, module registry, MCU link.
    Ptl = 1,
    /// IPC task: UDS server accept loop and fan-out.
    Ipc = 2,
    /// Bluetooth pairing/bonding task.
    Ble = 3,
}

/// All task ids, in the order the scheduler visits them (registration
/// order).
pub const ALL_TASKS: [TaskId; 4] = [TaskId::CarInfo, TaskId::Ptl, TaskId::Ipc, TaskId::Ble];

/// Number of task ids in the closed set — sizes the fixed task table and the
/// per-task message queue array.
pub const TASK_COUNT: usize = ALL_TASKS.len();

impl TaskId {
    /// Dense index into a `[T; TASK_COUNT]` array.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_unique() {
        let mut seen = [false; TASK_COUNT];
        for id in ALL_TASKS {
            assert!(!seen[id.index()]);
            seen[id.index()] = true;
        }
        assert!(seen.iter().all(|&b| b));
    }
}
