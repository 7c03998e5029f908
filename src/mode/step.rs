//! Two switch directed scanning

use super::{ModeCore, ScanAction};

/// One switch steps through the chunks, the other enters a chunk or
/// activates a key. With the `alternate` option the two switches trade
/// roles after every activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepScan {
    swapped: bool,
}

impl StepScan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    pub(super) fn init_position(&mut self, core: &mut ModeCore) {
        core.chunker.reset();
        core.highlight(true);
    }

    /// The action a switch performs right now
    fn resolve(&self, core: &ModeCore, action: ScanAction) -> ScanAction {
        if !(self.swapped && core.config().alternate()) {
            return action;
        }
        match action {
            ScanAction::Step => ScanAction::Activate,
            ScanAction::Activate => ScanAction::Step,
            other => other,
        }
    }

    pub(super) fn do_action(&mut self, core: &mut ModeCore, action: ScanAction) {
        core.highlight(false);

        if self.resolve(core, action) == ScanAction::Step {
            core.chunker.next();
            if core.max_cycles_reached() {
                self.init_position(core);
            } else {
                core.highlight(true);
            }
        } else if core.chunker.descend() {
            core.highlight(true);
        } else {
            self.swapped = !self.swapped;
            core.activate();
        }
    }
}
