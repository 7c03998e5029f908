//! Scan timers
//!
//! Timers never run code on their own. A `ScanTimer` only records whether it is
//! scheduled and when it is due; the owner checks `is_due()` from its event loop
//! and reports back through `complete()`.

use std::time::Duration;

use tokio::time::Instant;

/// Whether a timer fires once or keeps firing until stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Recurring,
}

/// Lifecycle of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Never started, or a one-shot timer that already fired
    Idle,
    Scheduled { deadline: Instant, interval: Duration },
    /// Stopped before it was due
    Cancelled,
}

/// Cancellable timer handle.
#[derive(Debug, Clone)]
pub struct ScanTimer {
    name: &'static str,
    repeat: Repeat,
    state: TimerState,
    generation: u64,
}

impl ScanTimer {
    pub fn new(name: &'static str, repeat: Repeat) -> Self {
        Self {
            name,
            repeat,
            state: TimerState::Idle,
            generation: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Bumped on every start and stop
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Schedule the timer `interval` from now, restarting it if it is already running.
    pub fn start(&mut self, interval: Duration) {
        self.generation += 1;
        self.state = TimerState::Scheduled {
            deadline: Instant::now() + interval,
            interval,
        };
    }

    /// Cancel future firings. Stopping an idle timer does nothing.
    pub fn stop(&mut self) {
        if self.is_running() {
            self.generation += 1;
            self.state = TimerState::Cancelled;
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Scheduled { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TimerState::Scheduled { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().map_or(false, |deadline| deadline <= now)
    }

    /// Settle the timer after its callback ran.
    ///
    /// `keep` is the callback's wish to continue. It is ignored if the callback
    /// restarted or stopped the timer itself (`generation` differs from the one
    /// captured before the callback).
    pub fn complete(&mut self, generation: u64, keep: bool) {
        if generation != self.generation {
            return;
        }
        match (self.state, self.repeat, keep) {
            (TimerState::Scheduled { deadline, interval }, Repeat::Recurring, true) => {
                let next = deadline + interval;
                let now = Instant::now();
                self.state = TimerState::Scheduled {
                    deadline: if next > now { next } else { now + interval },
                    interval,
                };
            }
            (TimerState::Scheduled { .. }, Repeat::Once, _) => {
                self.state = TimerState::Idle;
            }
            (TimerState::Scheduled { .. }, Repeat::Recurring, false) => {
                self.generation += 1;
                self.state = TimerState::Cancelled;
            }
            _ => {}
        }
    }
}
