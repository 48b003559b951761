//! Module registry and running set (spec.md §3, §4.6 parts 2-3).
//!
//! One registration entry per [`FrameType`], installed at init and never
//! removed; re-registration replaces the existing entry (unlike a
//! panic-on-duplicate driver registry elsewhere in this workspace — the
//! specification calls for last-write-wins here since a task may
//! legitimately re-install its own handler). The running set shares the
//! same lock as the entry map, per the single-writer discipline called for
//! by the concurrency model.

use crate::frame::FrameType;
use std::collections::{HashMap, HashSet};
use parking_lot::Mutex;

/// Emits an outbound frame's payload for `(frame_type, cmd, p1, p2)`.
/// Returns `None` when the command is not recognized (spec.md §4.6
/// "unrecognized commands return false without writing").
pub type SendFn = Box<dyn Fn(FrameType, u8, u16, u16) -> Option<Vec<u8>> + Send>;

/// Consumes an inbound frame's `cmd` and payload. `ack_out` is appended to
/// when the handler wants to emit an ack (subject to the ack-policy gate
/// upstream); returns whether the frame was consumed.
pub type RecvFn = Box<dyn FnMut(u8, &[u8], &mut Vec<u8>) -> bool + Send>;

struct Entry {
    send: SendFn,
    recv: RecvFn,
}

struct Inner {
    entries: HashMap<FrameType, Entry>,
    running: HashSet<FrameType>,
}

/// The protocol layer's module registry and running set.
pub struct ModuleRegistry {
    inner: Mutex<Inner>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                running: HashSet::new(),
            }),
        }
    }

    /// Install (or replace) the handlers for `frame_type`.
    pub fn register(&self, frame_type: FrameType, send: SendFn, recv: RecvFn) {
        let mut inner = self.inner.lock();
        inner.entries.insert(frame_type, Entry { send, recv });
    }

    /// Add `frame_type` to the running (polled) set.
    pub fn request_running(&self, frame_type: FrameType) {
        self.inner.lock().running.insert(frame_type);
    }

    /// Remove `frame_type` from the running set.
    pub fn release_running(&self, frame_type: FrameType) {
        self.inner.lock().running.remove(&frame_type);
    }

    /// Every frame type currently in the running set.
    pub fn running_keys(&self) -> Vec<FrameType> {
        self.inner.lock().running.iter().copied().collect()
    }

    /// Invoke `frame_type`'s `send_fn`, returning its data buffer if it
    /// produced one. `None` if no handler is registered or the handler
    /// declined the command.
    pub fn call_send(
        &self,
        frame_type: FrameType,
        cmd: u8,
        p1: u16,
        p2: u16,
    ) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(&frame_type)?;
        (entry.send)(frame_type, cmd, p1, p2)
    }

    /// Invoke `frame_type`'s `recv_fn`. Returns `None` if no handler is
    /// registered for this key (spec.md §4.6: "logged and discarded, never
    /// buffered").
    pub fn call_recv(
        &self,
        frame_type: FrameType,
        cmd: u8,
        payload: &[u8],
        ack_out: &mut Vec<u8>,
    ) -> Option<bool> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&frame_type)?;
        Some((entry.recv)(cmd, payload, ack_out))
    }

    /// Every registered frame type (test/diagnostic use).
    pub fn registered_keys(&self) -> Vec<FrameType> {
        self.inner.lock().entries.keys().copied().collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Direction, Module};

    fn meter_key() -> FrameType {
        FrameType::new(Direction::M2a, Module::Meter)
    }

    #[test]
    fn unregistered_key_yields_none() {
        let reg = ModuleRegistry::new();
        assert!(reg.call_send(meter_key(), 0x01, 0, 0).is_none());
        let mut ack = Vec::new();
        assert!(reg.call_recv(meter_key(), 0x01, &[], &mut ack).is_none());
    }

    #[test]
    fn register_then_call_round_trips() {
        let reg = ModuleRegistry::new();
        reg.register(
            meter_key(),
            Box::new(|_ft, cmd, p1, _p2| if cmd == 0x01 { Some(vec![p1 as u8]) } else { None }),
            Box::new(|_cmd, payload, _ack| !payload.is_empty()),
        );

        assert_eq!(reg.call_send(meter_key(), 0x01, 7, 0), Some(vec![7]));
        assert_eq!(reg.call_send(meter_key(), 0x02, 7, 0), None);
        let mut ack = Vec::new();
        assert_eq!(reg.call_recv(meter_key(), 0x01, &[1, 2], &mut ack), Some(true));
    }

    #[test]
    fn reregistration_replaces_the_entry() {
        let reg = ModuleRegistry::new();
        reg.register(
            meter_key(),
            Box::new(|_, _, _, _| Some(vec![1])),
            Box::new(|_, _, _| true),
        );
        reg.register(
            meter_key(),
            Box::new(|_, _, _, _| Some(vec![2])),
            Box::new(|_, _, _| false),
        );

        assert_eq!(reg.call_send(meter_key(), 0, 0, 0), Some(vec![2]));
    }

    #[test]
    fn running_set_add_and_remove() {
        let reg = ModuleRegistry::new();
        let key = meter_key();
        assert!(reg.running_keys().is_empty());
        reg.request_running(key);
        assert_eq!(reg.running_keys(), vec![key]);
        reg.release_running(key);
        assert!(reg.running_keys().is_empty());
    }
}
