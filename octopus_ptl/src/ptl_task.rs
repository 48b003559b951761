//! The PTL's own scheduled task (`TaskId::Ptl`): owns the serial transport,
//! drains its inbound byte buffer into [`crate::ptl::Ptl`]'s frame parser,
//! drains outbound-send requests from the message queue, and polls the
//! running set every tick.

use crate::frame::FrameType;
use crate::msgqueue::MessageQueue;
use crate::ptl::Ptl;
use octopus_common::consts::task_msg;
use octopus_common::prelude::OctopusResult;
use octopus_common::task::TaskId;
use octopus_hal::SerialTransport;
use octopus_taskmgr::task::Task;
use parking_lot::Mutex;
use std::sync::Arc;

fn to_io_err(e: octopus_common::prelude::OctopusError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// Schedulable wrapper around [`Ptl`] and a concrete [`SerialTransport`].
pub struct PtlTask<T: SerialTransport> {
    transport: T,
    ptl: Ptl,
    queue: Arc<MessageQueue>,
    inbound: Arc<Mutex<Vec<u8>>>,
}

impl<T: SerialTransport> PtlTask<T> {
    pub fn new(transport: T, ptl: Ptl, queue: Arc<MessageQueue>) -> Self {
        Self {
            transport,
            ptl,
            queue,
            inbound: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn drain_send_requests(&mut self) {
        while let Some(msg) = self.queue.get(TaskId::Ptl) {
            if msg.msg_id != task_msg::REQUEST_SEND_FRAME {
                continue;
            }
            let key = FrameType::from_byte(msg.p1 as u8);
            let cmd = msg.p2 as u8;
            let transport = &self.transport;
            self.ptl
                .send_now(key, cmd, 0, 0, |bytes| transport.write(bytes).map(|_| ()).map_err(to_io_err));
        }
    }
}

impl<T: SerialTransport> Task for PtlTask<T> {
    fn init(&mut self) -> OctopusResult<()> {
        let inbound = Arc::clone(&self.inbound);
        self.transport.set_receive_callback(Box::new(move |bytes| {
            inbound.lock().extend_from_slice(bytes);
        }));
        Ok(())
    }

    fn run(&mut self) -> OctopusResult<()> {
        let pending = std::mem::take(&mut *self.inbound.lock());
        if !pending.is_empty() {
            let transport = &self.transport;
            self.ptl
                .on_bytes_received(&pending, |bytes| transport.write(bytes).map(|_| ()).map_err(to_io_err));
        }

        self.drain_send_requests();

        let transport = &self.transport;
        self.ptl
            .poll_outbound(|bytes| transport.write(bytes).map(|_| ()).map_err(to_io_err));
        Ok(())
    }

    fn stop(&mut self) -> OctopusResult<()> {
        self.transport.close();
        Ok(())
    }
}
