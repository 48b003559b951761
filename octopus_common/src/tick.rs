//! Monotonic millisecond tick source.
//!
//! Mirrors the original `StartTickCounter` / `GetTickCounter` /
//! `RestartTickCounter` C API used throughout `octopus_carinfor.c`: a
//! "counter" is just the millisecond tick value recorded when timing began,
//! and elapsed time is computed by subtracting it from the current tick.
//! The subtraction wraps on `u32` overflow so a ~49 day rollover of the
//! underlying counter is transparent to any caller measuring a window
//! shorter than half the range.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current monotonic tick, in milliseconds, truncated to `u32`.
///
/// The epoch is the first call to this function in the process, so absolute
/// values are not meaningful across processes — only differences are.
pub fn now_ms() -> u32 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u32
}

/// A tick counter: the millisecond value recorded at `start`/`restart`.
pub type TickCounter = u32;

/// Record the current tick into `counter`. Equivalent to the original
/// `StartTickCounter`.
pub fn start(counter: &mut TickCounter) {
    *counter = now_ms();
}

/// Alias for [`start`] — re-arms the counter from now. Equivalent to the
/// original `RestartTickCounter`.
pub fn restart(counter: &mut TickCounter) {
    start(counter);
}

/// Milliseconds elapsed since `counter` was started, wrapping correctly
/// across `u32` rollover. Equivalent to the original `GetTickCounter`.
pub fn elapsed(counter: &TickCounter) -> u32 {
    now_ms().wrapping_sub(*counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn elapsed_grows_with_real_time() {
        let mut c = 0;
        start(&mut c);
        sleep(Duration::from_millis(20));
        assert!(elapsed(&c) >= 15);
    }

    #[test]
    fn restart_resets_elapsed_to_near_zero() {
        let mut c = 0;
        start(&mut c);
        sleep(Duration::from_millis(20));
        restart(&mut c);
        assert!(elapsed(&c) < 10);
    }

    #[test]
    fn elapsed_handles_u32_wraparound() {
        // Counter started just before rollover; "now" is just after.
        let counter: TickCounter = u32::MAX - 5;
        let now: u32 = 10; // wrapped past u32::MAX
        assert_eq!(now.wrapping_sub(counter), 16);
    }
}
