//! The cooperative task manager.
//!
//! A single logical scheduler thread invokes, every tick, the
//! state-appropriate callback of every registered task in registration
//! order. The task table is fixed at construction — tasks are never added
//! or removed once the manager is built.

use crate::descriptor::TaskDescriptor;
use crate::lifecycle::{TaskEvent, TaskLifecycleState, TransitionResult};
use octopus_common::task::TaskId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Owns the fixed task table and drives it on a dedicated tick thread.
pub struct TaskManager {
    tasks: Vec<TaskDescriptor>,
    tick_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl TaskManager {
    /// Build a manager over a fixed, ordered list of tasks.
    pub fn new(tasks: Vec<TaskDescriptor>, tick_interval_ms: u32) -> Self {
        Self {
            tasks,
            tick_interval: Duration::from_millis(tick_interval_ms as u64),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that, when invoked, requests the scheduler loop to stop
    /// after its current tick (§4.4 "Cancellation").
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run every registered task through exactly one scheduler tick.
    ///
    /// Returns `true` if at least one task is still active (not yet
    /// `Invalid`) — callers use this to detect full shutdown completion.
    pub fn tick(&mut self) -> bool {
        let mut any_active = false;

        for desc in &mut self.tasks {
            if desc.state() == TaskLifecycleState::Invalid && *desc.entered_run_flag() {
                // Retired after having run at least once: skip permanently.
                continue;
            }

            any_active = true;
            let id = desc.id();
            let state = desc.state();

            match state {
                TaskLifecycleState::Invalid => {
                    advance(desc, id);
                }
                TaskLifecycleState::Init => {
                    invoke(desc, id, "init", |t| t.init());
                    advance(desc, id);
                }
                TaskLifecycleState::Start => {
                    invoke(desc, id, "start", |t| t.start());
                    advance(desc, id);
                }
                TaskLifecycleState::AssertRun => {
                    invoke(desc, id, "assert_run", |t| t.assert_run());
                    if let TransitionResult::Ok(TaskLifecycleState::Running) =
                        desc.state_machine_mut().handle_event(TaskEvent::Advance)
                    {
                        desc.task_mut().on_enter_run();
                        *desc.entered_run_flag() = true;
                    }
                }
                TaskLifecycleState::Running => {
                    let wants_stop = desc.task_mut().wants_stop();
                    if desc.should_run_this_tick() {
                        invoke(desc, id, "run", |t| t.run());
                    }
                    if wants_stop {
                        let _ = desc
                            .state_machine_mut()
                            .handle_event(TaskEvent::RequestPostRun);
                        debug!(task = ?id, "entering PostRun");
                    }
                }
                TaskLifecycleState::PostRun => {
                    invoke(desc, id, "post_run", |t| t.post_run());
                    if let TransitionResult::Ok(TaskLifecycleState::Stop) =
                        desc.state_machine_mut().handle_event(TaskEvent::Advance)
                    {
                        desc.task_mut().on_exit_post_run();
                        *desc.exited_post_run_flag() = true;
                    }
                }
                TaskLifecycleState::Stop => {
                    invoke(desc, id, "stop", |t| t.stop());
                    advance(desc, id);
                }
            }
        }

        any_active
    }

    /// Spawn the dedicated tick thread and run until `stop_handle()` is set
    /// (checked at the top of every tick) or every task has retired.
    pub fn run(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            if self.stop.load(Ordering::Acquire) {
                self.shutdown();
                break;
            }
            let tick_start = Instant::now();
            let any_active = self.tick();
            if !any_active {
                break;
            }
            let elapsed = tick_start.elapsed();
            if elapsed < self.tick_interval {
                thread::sleep(self.tick_interval - elapsed);
            } else {
                warn!(?elapsed, budget = ?self.tick_interval, "scheduler tick overran budget");
            }
        })
    }

    /// Drain every still-active task through its `post_run`/`stop`
    /// callbacks exactly once before the scheduler thread exits. Invoked
    /// when an external stop request (e.g. SIGINT) is observed, as opposed
    /// to the natural per-task `wants_stop()` path already driven by
    /// `tick()`.
    fn shutdown(&mut self) {
        for desc in &mut self.tasks {
            let id = desc.id();
            match desc.state() {
                TaskLifecycleState::Invalid => continue,
                TaskLifecycleState::Running => {
                    let _ = desc
                        .state_machine_mut()
                        .handle_event(TaskEvent::RequestPostRun);
                    invoke(desc, id, "post_run", |t| t.post_run());
                    if let TransitionResult::Ok(TaskLifecycleState::Stop) =
                        desc.state_machine_mut().handle_event(TaskEvent::Advance)
                    {
                        desc.task_mut().on_exit_post_run();
                    }
                    invoke(desc, id, "stop", |t| t.stop());
                    advance(desc, id);
                }
                TaskLifecycleState::PostRun => {
                    invoke(desc, id, "post_run", |t| t.post_run());
                    if let TransitionResult::Ok(TaskLifecycleState::Stop) =
                        desc.state_machine_mut().handle_event(TaskEvent::Advance)
                    {
                        desc.task_mut().on_exit_post_run();
                    }
                    invoke(desc, id, "stop", |t| t.stop());
                    advance(desc, id);
                }
                TaskLifecycleState::Stop => {
                    invoke(desc, id, "stop", |t| t.stop());
                    advance(desc, id);
                }
                TaskLifecycleState::Init | TaskLifecycleState::Start | TaskLifecycleState::AssertRun => {
                    // Never reached Running: still give the task a chance to
                    // release whatever it may have acquired so far.
                    invoke(desc, id, "stop", |t| t.stop());
                }
            }
        }
    }
}

fn advance(desc: &mut TaskDescriptor, id: TaskId) {
    if let TransitionResult::Rejected(reason) =
        desc.state_machine_mut().handle_event(TaskEvent::Advance)
    {
        error!(task = ?id, reason, "unexpected lifecycle transition rejection");
    }
}

fn invoke<F>(desc: &mut TaskDescriptor, id: TaskId, name: &'static str, f: F)
where
    F: FnOnce(&mut dyn crate::task::Task) -> octopus_common::prelude::OctopusResult<()>,
{
    if let Err(err) = f(desc.task_mut()) {
        error!(task = ?id, callback = name, %err, "task callback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use octopus_common::prelude::OctopusResult;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct CountingTask {
        init: Arc<AtomicU32>,
        run: Arc<AtomicU32>,
        stop: Arc<AtomicU32>,
        enter_run: Arc<AtomicU32>,
        stop_after: u32,
    }

    impl Task for CountingTask {
        fn init(&mut self) -> OctopusResult<()> {
            self.init.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn run(&mut self) -> OctopusResult<()> {
            self.run.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) -> OctopusResult<()> {
            self.stop.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_enter_run(&mut self) {
            self.enter_run.fetch_add(1, Ordering::SeqCst);
        }

        fn wants_stop(&self) -> bool {
            self.stop_after > 0 && self.run.load(Ordering::SeqCst) >= self.stop_after
        }
    }

    #[test]
    fn one_task_reaches_running_after_four_ticks() {
        let counters = CountingTask::default();
        let init = Arc::clone(&counters.init);
        let enter_run = Arc::clone(&counters.enter_run);
        let run = Arc::clone(&counters.run);

        let desc = TaskDescriptor::new(TaskId::CarInfo, Box::new(counters));
        let mut mgr = TaskManager::new(vec![desc], 10);

        mgr.tick(); // Invalid -> Init (and invokes init)... actually Invalid advances first
        mgr.tick();
        mgr.tick();
        mgr.tick();
        mgr.tick();

        assert_eq!(init.load(Ordering::SeqCst), 1);
        assert_eq!(enter_run.load(Ordering::SeqCst), 1);
        assert!(run.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn task_runs_to_completion_and_retires() {
        let mut counters = CountingTask::default();
        counters.stop_after = 2;
        let stop = Arc::clone(&counters.stop);

        let desc = TaskDescriptor::new(TaskId::Ptl, Box::new(counters));
        let mut mgr = TaskManager::new(vec![desc], 10);

        let mut active = true;
        for _ in 0..20 {
            active = mgr.tick();
            if !active {
                break;
            }
        }

        assert!(!active);
        assert_eq!(stop.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_interval_throttles_invocations() {
        let counters = CountingTask::default();
        let run = Arc::clone(&counters.run);

        let desc = TaskDescriptor::with_interval(TaskId::Ipc, Box::new(counters), 5);
        let mut mgr = TaskManager::new(vec![desc], 10);

        for _ in 0..4 {
            mgr.tick();
        }
        // Now Running; tick 15 more times (3 intervals of 5).
        for _ in 0..15 {
            mgr.tick();
        }
        assert_eq!(run.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_handle_halts_the_scheduler_loop() {
        let desc = TaskDescriptor::new(TaskId::Ble, Box::new(CountingTask::default()));
        let mgr = TaskManager::new(vec![desc], 1);
        let stop = mgr.stop_handle();
        stop.store(true, Ordering::Release);
        let handle = mgr.run();
        handle.join().unwrap();
    }

    #[test]
    fn external_stop_drains_a_final_stop_pass_for_a_running_task() {
        let counters = CountingTask::default();
        let stop_calls = Arc::clone(&counters.stop);
        let desc = TaskDescriptor::new(TaskId::CarInfo, Box::new(counters));
        let mut mgr = TaskManager::new(vec![desc], 10);

        // Drive the task to Running.
        for _ in 0..4 {
            mgr.tick();
        }
        assert_eq!(mgr.tasks[0].state(), TaskLifecycleState::Running);

        mgr.shutdown();
        assert_eq!(mgr.tasks[0].state(), TaskLifecycleState::Invalid);
        assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn external_stop_via_run_invokes_stop_callback_before_exit() {
        let counters = CountingTask::default();
        let stop_calls = Arc::clone(&counters.stop);
        let desc = TaskDescriptor::new(TaskId::Ptl, Box::new(counters));
        let mut mgr = TaskManager::new(vec![desc], 5);
        // Get the task into Running before the tick thread starts.
        for _ in 0..4 {
            mgr.tick();
        }
        let stop = mgr.stop_handle();
        stop.store(true, Ordering::Release);
        let handle = mgr.run();
        handle.join().unwrap();

        assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    }
}
