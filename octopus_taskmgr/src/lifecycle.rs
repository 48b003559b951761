//! Per-task lifecycle state machine.
//!
//! `Invalid -> Init -> Start -> AssertRun -> Running <-> PostRun -> Stop ->
//! Invalid`. Modeled on the transition-table style of a machine-level state
//! machine elsewhere in this workspace: a plain `match` over `(state, event)`
//! returning `TransitionResult::Ok`/`Rejected`, rather than a generic graph.

/// A task's position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLifecycleState {
    /// Not yet started, or fully torn down.
    Invalid,
    /// One-shot initialization.
    Init,
    /// One-shot startup.
    Start,
    /// One-shot pre-run assertion (e.g. `request_running`).
    AssertRun,
    /// Steady-state, invoked every tick until the task requests shutdown.
    Running,
    /// One-shot teardown-in-progress.
    PostRun,
    /// One-shot final stop.
    Stop,
}

/// Event driving a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// The scheduler's automatic progression to the next one-shot state,
    /// issued immediately after the current state's callback returns.
    Advance,
    /// A task-initiated request to begin shutdown (`Running -> PostRun`),
    /// used instead of `Advance` because `Running` does not auto-progress.
    RequestPostRun,
}

/// Result of a lifecycle transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded — new state.
    Ok(TaskLifecycleState),
    /// Transition rejected — reason.
    Rejected(&'static str),
}

/// Owns one task's current lifecycle state and the edge-callback flags.
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    state: TaskLifecycleState,
}

impl TaskStateMachine {
    /// A freshly installed task, not yet started.
    pub const fn new() -> Self {
        Self {
            state: TaskLifecycleState::Invalid,
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub const fn state(&self) -> TaskLifecycleState {
        self.state
    }

    /// Apply an event, returning the outcome.
    pub fn handle_event(&mut self, event: TaskEvent) -> TransitionResult {
        use TaskEvent::*;
        use TaskLifecycleState::*;

        let next = match (self.state, event) {
            (Invalid, Advance) => Init,
            (Init, Advance) => Start,
            (Start, Advance) => AssertRun,
            (AssertRun, Advance) => Running,
            (PostRun, Advance) => Stop,
            (Stop, Advance) => Invalid,

            (Running, RequestPostRun) => PostRun,

            _ => {
                return TransitionResult::Rejected(invalid_transition_reason(self.state, event));
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// `true` once this task has returned to `Invalid` after running — the
    /// scheduler stops invoking callbacks for it.
    #[inline]
    pub fn is_retired(&self) -> bool {
        matches!(self.state, TaskLifecycleState::Invalid)
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_transition_reason(state: TaskLifecycleState, event: TaskEvent) -> &'static str {
    use TaskEvent::*;
    use TaskLifecycleState::*;
    match (state, event) {
        (Running, Advance) => "Running does not auto-advance; use RequestPostRun",
        (_, RequestPostRun) => "RequestPostRun is only valid from Running",
        (Invalid, _) => "Invalid: only Advance (restart) allowed",
        (Init, _) | (Start, _) | (AssertRun, _) | (PostRun, _) | (Stop, _) => {
            "one-shot state: only Advance allowed"
        }
    }
}
