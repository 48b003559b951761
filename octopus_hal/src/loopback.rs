//! An in-memory `SerialTransport` test double: `write` appends to a
//! buffer the test can inspect, and `inject_received` drives the
//! registered callback directly, simulating bytes arriving from the MCU.

use crate::transport::{ReceiveCallback, SerialTransport};
use octopus_common::prelude::OctopusResult;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Shared {
    written: Vec<u8>,
    callback: Option<ReceiveCallback>,
}

/// Loopback transport for unit/integration tests — no real device, no
/// thread.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every byte written so far, in order.
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock().written.clone()
    }

    /// Clear the write log (the registered receive callback is kept).
    pub fn clear_written(&self) {
        self.shared.lock().written.clear();
    }

    /// Simulate bytes arriving from the MCU: invokes the registered
    /// callback synchronously, on the calling thread.
    pub fn inject_received(&self, bytes: &[u8]) {
        if let Some(cb) = self.shared.lock().callback.as_ref() {
            cb(bytes);
        }
    }
}

impl SerialTransport for LoopbackTransport {
    fn write(&self, bytes: &[u8]) -> OctopusResult<usize> {
        self.shared.lock().written.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn set_receive_callback(&mut self, callback: ReceiveCallback) {
        self.shared.lock().callback = Some(callback);
    }

    fn close(&mut self) {
        self.shared.lock().callback = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn write_appends_in_order() {
        let t = LoopbackTransport::new();
        t.write(&[1, 2]).unwrap();
        t.write(&[3]).unwrap();
        assert_eq!(t.written(), vec![1, 2, 3]);
    }

    #[test]
    fn injected_bytes_reach_the_callback() {
        let mut t = LoopbackTransport::new();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        t.set_receive_callback(Box::new(move |bytes| {
            received_clone.fetch_add(bytes.len(), Ordering::SeqCst);
        }));

        t.inject_received(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(received.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn close_drops_the_callback() {
        let mut t = LoopbackTransport::new();
        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = Arc::clone(&called);
        t.set_receive_callback(Box::new(move |_| {
            called_clone.fetch_add(1, Ordering::SeqCst);
        }));
        t.close();
        t.inject_received(&[1]);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
