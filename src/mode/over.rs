//! Single switch fast forward scanning with slow backtrack

use super::ModeCore;

/// Sweeps quickly over all keys. The second press switches to a slow
/// backtrack of a few keys, the third press activates.
#[derive(Debug, Clone, Copy)]
pub struct OverScan {
    /// Backtrack steps left, -1 while not backtracking
    step: i32,
    fast: bool,
}

impl OverScan {
    pub fn new() -> Self {
        Self { step: -1, fast: true }
    }

    pub fn is_backtracking(&self) -> bool {
        self.step >= 0
    }

    pub fn is_fast(&self) -> bool {
        self.fast
    }

    pub(super) fn reset(&mut self) {
        self.step = -1;
        self.fast = true;
    }

    pub(super) fn scan(&mut self, core: &mut ModeCore) -> bool {
        core.highlight(false);

        if self.step > 0 {
            core.chunker.previous();
            self.step -= 1;
            if core.max_cycles_reached() {
                core.chunker.reset();
                self.reset();
                return false;
            }
            core.highlight(true);
            return true;
        }

        core.chunker.next();
        if core.max_cycles_reached() {
            core.chunker.reset();
            return false;
        }
        core.highlight(true);

        // backtrack ran out, fast forward again from here
        if !self.fast {
            core.stop();
            self.do_action(core);
        }
        true
    }

    pub(super) fn do_action(&mut self, core: &mut ModeCore) {
        if !core.is_running() {
            self.reset();
            core.highlight(true);
            let interval = core.config().interval_fast();
            core.start(interval);
        } else if self.step >= 0 {
            core.stop();
            core.highlight(false);
            core.activate();
            core.chunker.reset();
        } else {
            self.step = i32::try_from(core.config().backtrack()).unwrap_or(i32::MAX);
            self.fast = false;
            core.chunker.cycles = 0;
            let interval = core.config().interval();
            core.start(interval);
        }
    }
}

impl Default for OverScan {
    fn default() -> Self {
        Self::new()
    }
}
