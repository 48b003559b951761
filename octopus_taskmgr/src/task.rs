//! The lifecycle-callback contract every scheduled task implements.

use octopus_common::prelude::OctopusResult;

/// Lifecycle callbacks invoked by the scheduler as a task moves through its
/// state machine. Every method has a cooperative-return contract: it must
/// not block beyond a short bound, since it runs on the single scheduler
/// thread alongside every other task.
pub trait Task: Send {
    /// One-shot initialization (`Init` state). Register resources here.
    fn init(&mut self) -> OctopusResult<()> {
        Ok(())
    }

    /// One-shot startup (`Start` state).
    fn start(&mut self) -> OctopusResult<()> {
        Ok(())
    }

    /// One-shot pre-run assertion (`AssertRun` state) — e.g. request
    /// running for the frame types this task owns.
    fn assert_run(&mut self) -> OctopusResult<()> {
        Ok(())
    }

    /// Invoked every tick while `Running`. Must return promptly; use an
    /// internal tick counter to skip work until enough time has elapsed.
    fn run(&mut self) -> OctopusResult<()>;

    /// One-shot teardown (`PostRun` state).
    fn post_run(&mut self) -> OctopusResult<()> {
        Ok(())
    }

    /// One-shot final stop (`Stop` state).
    fn stop(&mut self) -> OctopusResult<()> {
        Ok(())
    }

    /// Invoked exactly once, on the `AssertRun -> Running` transition.
    fn on_enter_run(&mut self) {}

    /// Invoked exactly once, on the `PostRun -> Stop` transition.
    fn on_exit_post_run(&mut self) {}

    /// `true` when this task wants to begin shutdown (checked once per
    /// tick while `Running`; causes a `RequestPostRun` event).
    fn wants_stop(&self) -> bool {
        false
    }
}
