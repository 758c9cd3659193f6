// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `Clock` and `Alarm` collaborator interfaces. The core never reads
//! the wall clock or schedules OS timers itself: every `Instant` it works
//! with is handed in by the caller, and the "alarm" is no more than an
//! owned deadline that re-arms atomically on every mutation, matching the
//! cooperative, single-threaded execution model the rest of this crate
//! assumes.

use std::time::Instant;

/// A monotonic millisecond time source. In practice this core is handed
/// `Instant` values directly by its caller (matching the teacher's own
/// `now: Instant` parameters), so this trait exists mainly to document the
/// collaborator contract: `now()` must never go backwards for a given
/// connection.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The system clock, for callers that don't need to fake time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A cancellable one-shot timer, modeled as an owned deadline rather than
/// a registered OS callback. Re-arming replaces the deadline outright: two
/// listeners are never layered on top of each other, and cancellation
/// always goes through `reset`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Alarm {
    deadline: Option<Instant>,
}

impl Alarm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the alarm to fire at `deadline`, replacing any previous one.
    pub fn start(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Cancels the alarm.
    pub fn reset(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` and fires (in the sense of being ready for the
    /// caller to invoke `on_timeout`) if `now` has reached the deadline.
    /// The caller is responsible for calling back into the state machine
    /// that owns this alarm; this type only tracks "is it time yet".
    #[must_use]
    pub fn timeout(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_running() {
        assert!(!Alarm::new().is_running());
    }

    #[test]
    fn start_then_reset() {
        let mut alarm = Alarm::new();
        let now = Instant::now();
        alarm.start(now);
        assert!(alarm.is_running());
        alarm.reset();
        assert!(!alarm.is_running());
    }

    #[test]
    fn rearming_replaces_not_layers() {
        let mut alarm = Alarm::new();
        let now = Instant::now();
        alarm.start(now + std::time::Duration::from_secs(10));
        alarm.start(now + std::time::Duration::from_secs(1));
        assert_eq!(alarm.deadline(), Some(now + std::time::Duration::from_secs(1)));
    }

    #[test]
    fn timeout_fires_once_due() {
        let mut alarm = Alarm::new();
        let now = Instant::now();
        alarm.start(now + std::time::Duration::from_millis(5));
        assert!(!alarm.timeout(now));
        assert!(alarm.timeout(now + std::time::Duration::from_millis(5)));
    }
}
