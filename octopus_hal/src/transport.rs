//! Serial transport contract.

use octopus_common::prelude::OctopusResult;

/// Invoked from the transport's own receive thread whenever bytes are
/// available. Must not block and must not retain the slice past the call.
pub type ReceiveCallback = Box<dyn Fn(&[u8]) + Send + 'static>;

/// A byte-oriented link to the MCU: opens a named device at a given baud,
/// 8-N-1, no flow control, raw mode, non-blocking reads.
pub trait SerialTransport: Send {
    /// Write `bytes`, returning how many were actually written (the caller
    /// loops on short writes).
    fn write(&self, bytes: &[u8]) -> OctopusResult<usize>;

    /// Install the callback invoked by the internal receive thread. Only
    /// one callback may be registered; a later call replaces the former.
    fn set_receive_callback(&mut self, callback: ReceiveCallback);

    /// Tear down the receive thread and release the underlying handle.
    fn close(&mut self);
}
