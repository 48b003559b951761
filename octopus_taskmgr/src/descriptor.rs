//! Task descriptor — the fixed, install-once record the scheduler drives.

use crate::lifecycle::TaskStateMachine;
use crate::task::Task;
use octopus_common::task::TaskId;

/// One entry in the scheduler's fixed task table.
pub struct TaskDescriptor {
    id: TaskId,
    state: TaskStateMachine,
    task: Box<dyn Task>,
    /// How many scheduler ticks elapse between `run()` invocations while
    /// `Running`. `1` means every tick.
    run_interval_ticks: u32,
    ticks_since_run: u32,
    entered_run: bool,
    exited_post_run: bool,
}

impl TaskDescriptor {
    /// Install a task under `id`, invoked on every scheduler tick while
    /// `Running` (the common case for most tasks).
    pub fn new(id: TaskId, task: Box<dyn Task>) -> Self {
        Self::with_interval(id, task, 1)
    }

    /// Install a task whose `run()` fires only every `run_interval_ticks`
    /// scheduler ticks (a hint for CPU-load shaping — one-shot callbacks
    /// are unaffected).
    pub fn with_interval(id: TaskId, task: Box<dyn Task>, run_interval_ticks: u32) -> Self {
        assert!(run_interval_ticks > 0, "run_interval_ticks must be > 0");
        Self {
            id,
            state: TaskStateMachine::new(),
            task,
            run_interval_ticks,
            ticks_since_run: 0,
            entered_run: false,
            exited_post_run: false,
        }
    }

    /// This descriptor's task id.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> crate::lifecycle::TaskLifecycleState {
        self.state.state()
    }

    pub(crate) fn state_machine_mut(&mut self) -> &mut TaskStateMachine {
        &mut self.state
    }

    pub(crate) fn task_mut(&mut self) -> &mut dyn Task {
        self.task.as_mut()
    }

    /// Whether this tick should invoke `run()`, per the configured
    /// interval. Advances the internal counter as a side effect.
    pub(crate) fn should_run_this_tick(&mut self) -> bool {
        self.ticks_since_run += 1;
        if self.ticks_since_run >= self.run_interval_ticks {
            self.ticks_since_run = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn entered_run_flag(&mut self) -> &mut bool {
        &mut self.entered_run
    }

    pub(crate) fn exited_post_run_flag(&mut self) -> &mut bool {
        &mut self.exited_post_run
    }
}
