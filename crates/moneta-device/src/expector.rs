//! Bounded poll-until-condition waiting.
//!
//! Wait loops run on the device's worker thread and never on the
//! application thread, so plain sleeps are acceptable here.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition held before the timeout.
    Satisfied,
    /// The error condition fired first; waiting is pointless.
    ErrorCondition,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_satisfied(self) -> bool {
        matches!(self, WaitOutcome::Satisfied)
    }
}

/// Repeatedly polls and re-checks a condition until it holds, an error
/// condition fires, or the timeout elapses. Conditions are checked before
/// the first poll so an already-satisfied wait costs nothing.
#[derive(Debug, Clone, Copy)]
pub struct PollingExpector {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollingExpector {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn wait(
        &self,
        mut poll: impl FnMut(),
        mut condition: impl FnMut() -> bool,
        mut error_condition: impl FnMut() -> bool,
    ) -> WaitOutcome {
        let deadline = Instant::now() + self.timeout;
        loop {
            if error_condition() {
                return WaitOutcome::ErrorCondition;
            }
            if condition() {
                return WaitOutcome::Satisfied;
            }
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            poll();
            std::thread::sleep(self.interval.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Wait without a distinct error condition.
    pub fn wait_for(&self, poll: impl FnMut(), condition: impl FnMut() -> bool) -> WaitOutcome {
        self.wait(poll, condition, || false)
    }
}
