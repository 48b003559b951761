//! The protocol layer runtime (spec.md §4.6 parts 4-5): outbound polling
//! and inbound dispatch, wired on top of [`crate::frame`] and
//! [`crate::registry`].

use crate::frame::{build, Direction, Frame, FrameParser, FrameType};
use crate::registry::ModuleRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

/// Convention used by outbound polling: the cmd passed to `send_fn` when
/// the PTL itself initiates the call rather than relaying an explicit
/// request from the owning task. Handlers that have nothing new to report
/// return `None` regardless of the cmd they are polled with.
pub const POLL_CMD: u8 = 0x00;

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::M2a => Direction::A2m,
        Direction::A2m => Direction::M2a,
    }
}

/// Drives the module registry's running set (outbound) and the frame
/// parser (inbound) against a transport. Holds no transport handle itself
/// — callers supply a transmit closure so the same `Ptl` can run against a
/// real serial device or a loopback test double.
pub struct Ptl {
    registry: Arc<ModuleRegistry>,
    parser: FrameParser,
    acks_enabled: bool,
}

impl Ptl {
    pub fn new(registry: Arc<ModuleRegistry>, acks_enabled: bool) -> Self {
        Self {
            registry,
            parser: FrameParser::new(),
            acks_enabled,
        }
    }

    /// Shared handle to the module registry, for tasks that register
    /// handlers and manage the running set.
    pub fn registry(&self) -> Arc<ModuleRegistry> {
        Arc::clone(&self.registry)
    }

    /// Outbound polling (spec.md §4.6 part 4): for every frame type in the
    /// running set, invoke its `send_fn`; transmit whatever it produces.
    /// Transport failures are logged and dropped — the PTL never buffers
    /// an outbound frame past the tick that produced it.
    pub fn poll_outbound<F>(&self, mut transmit: F)
    where
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        for key in self.registry.running_keys() {
            let Some(data) = self.registry.call_send(key, POLL_CMD, 0, 0) else {
                continue;
            };
            match build(key, POLL_CMD, &data) {
                Ok(bytes) => {
                    if let Err(err) = transmit(&bytes) {
                        warn!(?key, %err, "outbound frame transmit failed, dropping");
                    }
                }
                Err(err) => warn!(?key, %err, "outbound frame build failed"),
            }
        }
    }

    /// Post an explicit, task-requested outbound frame for `(key, cmd,
    /// p1, p2)` — used when a task detects a change and wants a frame
    /// emitted immediately rather than waiting for the next poll.
    pub fn send_now<F>(&self, key: FrameType, cmd: u8, p1: u16, p2: u16, mut transmit: F)
    where
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        let Some(data) = self.registry.call_send(key, cmd, p1, p2) else {
            debug!(?key, cmd, "send_now: handler declined cmd");
            return;
        };
        match build(key, cmd, &data) {
            Ok(bytes) => {
                if let Err(err) = transmit(&bytes) {
                    warn!(?key, %err, "requested frame transmit failed, dropping");
                }
            }
            Err(err) => warn!(?key, %err, "requested frame build failed"),
        }
    }

    /// Inbound dispatch (spec.md §4.6 part 5): feed newly received bytes,
    /// extract complete frames, and invoke each one's `recv_fn`. Acks are
    /// transmitted only when acks are enabled and the handler wrote one.
    pub fn on_bytes_received<F>(&mut self, bytes: &[u8], mut transmit: F)
    where
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        for frame in self.parser.feed(bytes) {
            self.dispatch_frame(frame, &mut transmit);
        }
    }

    fn dispatch_frame<F>(&self, frame: Frame, transmit: &mut F)
    where
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        let mut ack_out = Vec::new();
        match self
            .registry
            .call_recv(frame.frame_type, frame.cmd, &frame.data, &mut ack_out)
        {
            None => {
                debug!(key = ?frame.frame_type, "frame for unregistered module, discarded");
            }
            Some(false) => {
                debug!(key = ?frame.frame_type, cmd = frame.cmd, "frame not handled by registrant");
            }
            Some(true) => {
                if self.acks_enabled && !ack_out.is_empty() {
                    let ack_type =
                        FrameType::new(opposite(frame.frame_type.direction()), frame.frame_type.module());
                    match build(ack_type, frame.cmd, &ack_out) {
                        Ok(bytes) => {
                            if let Err(err) = transmit(&bytes) {
                                warn!(%err, "ack transmit failed");
                            }
                        }
                        Err(err) => warn!(%err, "ack build failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Direction, Module};
    use std::sync::Mutex;

    fn meter_key() -> FrameType {
        FrameType::new(Direction::M2a, Module::Meter)
    }

    #[test]
    fn poll_outbound_transmits_only_for_running_keys() {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(
            meter_key(),
            Box::new(|_ft, _cmd, _p1, _p2| Some(vec![0xAB])),
            Box::new(|_, _| true),
        );

        let ptl = Ptl::new(Arc::clone(&registry), false);
        let sent = Mutex::new(Vec::new());
        ptl.poll_outbound(|bytes| {
            sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        });
        assert!(sent.lock().unwrap().is_empty());

        registry.request_running(meter_key());
        ptl.poll_outbound(|bytes| {
            sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        });
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn inbound_frame_is_dispatched_to_recv_fn() {
        let registry = Arc::new(ModuleRegistry::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        registry.register(
            meter_key(),
            Box::new(|_, _, _, _| None),
            Box::new(move |_cmd, payload, _ack| {
                received_clone.lock().unwrap().extend_from_slice(payload);
                true
            }),
        );

        let mut ptl = Ptl::new(registry, false);
        let bytes = build(meter_key(), 0x01, &[1, 2, 3]).unwrap();
        ptl.on_bytes_received(&bytes, |_| Ok(()));

        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn ack_is_transmitted_only_when_enabled() {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(
            meter_key(),
            Box::new(|_, _, _, _| None),
            Box::new(|_cmd, _payload, ack| {
                ack.push(0x00);
                true
            }),
        );

        let mut ptl = Ptl::new(Arc::clone(&registry), true);
        let bytes = build(meter_key(), 0x01, &[]).unwrap();
        let sent = Mutex::new(0);
        ptl.on_bytes_received(&bytes, |_| {
            *sent.lock().unwrap() += 1;
            Ok(())
        });
        assert_eq!(*sent.lock().unwrap(), 1);

        let mut ptl_no_ack = Ptl::new(registry, false);
        let sent2 = Mutex::new(0);
        ptl_no_ack.on_bytes_received(&bytes, |_| {
            *sent2.lock().unwrap() += 1;
            Ok(())
        });
        assert_eq!(*sent2.lock().unwrap(), 0);
    }

    #[test]
    fn unregistered_frame_is_discarded_silently() {
        let registry = Arc::new(ModuleRegistry::new());
        let mut ptl = Ptl::new(registry, false);
        let bytes = build(meter_key(), 0x01, &[]).unwrap();
        // Should not panic and should not transmit anything.
        ptl.on_bytes_received(&bytes, |_| {
            panic!("no handler registered, must not transmit");
        });
    }
}
