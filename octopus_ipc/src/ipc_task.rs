//! The IPC subsystem's scheduled task (`TaskId::Ipc`): owns the
//! [`IpcServer`] accept loop on its own thread and drains `MODEL_CHANGED`
//! notifications posted by the CarInfo task, turning each into a fan-out
//! call (spec.md §4.7 "notifies the IPC subsystem", §4.9 "Fan-out").
//!
//! Modeled directly on [`octopus_ptl::PtlTask`]'s shape: the scheduler-
//! facing `Task` impl is a thin adapter around a subsystem that otherwise
//! runs its own OS threads, draining the shared [`MessageQueue`] on every
//! tick rather than holding a callback or back-pointer into CarInfo.

use octopus_common::consts::task_msg;
use octopus_common::prelude::OctopusResult;
use octopus_common::task::TaskId;
use octopus_taskmgr::task::Task;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

use crate::server::IpcServer;
use octopus_ptl::MessageQueue;

/// Schedulable wrapper around [`IpcServer`]. The accept loop and every
/// per-client reader run off the scheduler thread; `run()` only drains
/// model-change notifications.
pub struct IpcTask {
    server: Arc<IpcServer>,
    queue: Arc<MessageQueue>,
    accept_thread: Option<JoinHandle<()>>,
}

impl IpcTask {
    pub fn new(server: Arc<IpcServer>, queue: Arc<MessageQueue>) -> Self {
        Self {
            server,
            queue,
            accept_thread: None,
        }
    }
}

impl Task for IpcTask {
    fn start(&mut self) -> OctopusResult<()> {
        let server = Arc::clone(&self.server);
        self.accept_thread = Some(thread::spawn(move || server.run()));
        Ok(())
    }

    fn run(&mut self) -> OctopusResult<()> {
        while let Some(msg) = self.queue.get(TaskId::Ipc) {
            if msg.msg_id != task_msg::MODEL_CHANGED {
                continue;
            }
            let group = msg.p1 as u8;
            let msg_id = msg.p2 as u8;
            self.server.notify_model_changed(group, msg_id);
        }
        Ok(())
    }

    fn stop(&mut self) -> OctopusResult<()> {
        self.server.stop_handle().store(true, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                warn!("IPC accept thread panicked during shutdown");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::SnapshotSource;
    use octopus_common::consts::{car_msg, group};
    use std::time::Duration;

    struct EmptySource;
    impl SnapshotSource for EmptySource {
        fn indicator_bytes(&self) -> Vec<u8> {
            vec![]
        }
        fn meter_bytes(&self) -> Vec<u8> {
            vec![0, 0, 0, 0]
        }
        fn drivetrain_bytes(&self) -> Vec<u8> {
            vec![0, 0]
        }
    }

    #[test]
    fn drains_model_changed_notifications_without_error() {
        let dir = tempfile::tempdir().unwrap().keep();
        let path = dir.join("ipc_task_sock");
        let server = Arc::new(
            IpcServer::bind(path.to_str().unwrap(), Arc::new(EmptySource), 10).unwrap(),
        );
        let queue = Arc::new(MessageQueue::new());
        let mut task = IpcTask::new(server, queue.clone());

        task.start().unwrap();
        queue.send(
            TaskId::Ipc,
            task_msg::MODEL_CHANGED,
            group::CAR as u16,
            car_msg::METER as u16,
        );
        task.run().unwrap();

        thread::sleep(Duration::from_millis(20));
        task.stop().unwrap();
    }
}
