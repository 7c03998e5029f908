//! Directed scanning for three or five switches

use super::{ModeCore, ScanAction};
use crate::chunker::Chunker;

/// Every switch maps straight to a direction or to activation.
///
/// Five switches move over a grid of rows (left, right, up, down, activate).
/// Three switches have no up and down, so all keys are scanned in reading
/// order instead.
#[derive(Debug, Clone, Copy)]
pub struct DirectScan {
    switches: u8,
}

impl DirectScan {
    pub fn three() -> Self {
        Self { switches: 3 }
    }

    pub fn five() -> Self {
        Self { switches: 5 }
    }

    pub fn switches(&self) -> u8 {
        self.switches
    }

    pub(super) fn create_chunker(&self) -> Chunker {
        if self.switches == 3 {
            Chunker::flat()
        } else {
            Chunker::rows()
        }
    }

    /// Select the first key, there is no automatic cycling to find one.
    ///
    /// `start_centered` is not applied here, the selection always starts
    /// at the first row.
    pub(super) fn init_position(&mut self, core: &mut ModeCore) {
        core.chunker.descend();
        core.highlight(true);
    }

    pub(super) fn do_action(&mut self, core: &mut ModeCore, action: ScanAction) {
        let mut keys = core.chunker.highlight(false);

        match action {
            ScanAction::Left => core.chunker.previous(),
            ScanAction::Right => core.chunker.next(),
            ScanAction::Up => {
                core.chunker.up();
            }
            ScanAction::Down => {
                core.chunker.down();
            }
            _ => core.activate(),
        }

        keys.extend(core.chunker.highlight(true));
        core.redraw(&keys);
    }
}
