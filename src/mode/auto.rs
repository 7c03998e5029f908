//! Single switch automatic scanning

use super::{ModeCore, ScanAction};
use crate::config::DeviceMap;

/// Starts cycling on a press, each further press selects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoScan;

impl AutoScan {
    pub fn map_actions(map: &DeviceMap, detail: u32, pressed: bool) -> ScanAction {
        if pressed && map.contains_key(&detail) {
            ScanAction::Step
        } else {
            ScanAction::Unhandled
        }
    }

    pub(super) fn scan(&mut self, core: &mut ModeCore) -> bool {
        advance(core)
    }

    pub(super) fn do_action(&mut self, core: &mut ModeCore) {
        let interval = core.config().interval();

        if !core.is_running() {
            core.highlight(true);
            core.start(interval);
            return;
        }

        core.stop();
        core.highlight(false);
        if core.chunker.descend() {
            core.highlight(true);
            core.start(interval);
        } else {
            core.activate();
            core.chunker.reset();
        }
    }
}

/// Like `AutoScan`, but cycles only while the switch is held down.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserScan;

impl UserScan {
    pub fn map_actions(map: &DeviceMap, detail: u32, pressed: bool) -> ScanAction {
        match (map.contains_key(&detail), pressed) {
            (true, true) => ScanAction::StepStart,
            (true, false) => ScanAction::StepStop,
            (false, _) => ScanAction::Unhandled,
        }
    }

    pub(super) fn scan(&mut self, core: &mut ModeCore) -> bool {
        advance(core)
    }

    pub(super) fn do_action(&mut self, core: &mut ModeCore, action: ScanAction) {
        match action {
            ScanAction::StepStart => {
                // the first press only starts scanning
                if !core.chunker.is_reset() {
                    core.highlight(false);
                    core.chunker.descend();
                }
                core.highlight(true);
                let interval = core.config().interval();
                core.start(interval);
            }
            ScanAction::StepStop => {
                core.stop();
                if !core.chunker.can_descend() {
                    core.highlight(false);
                    core.activate();
                    core.chunker.reset();
                }
            }
            _ => {}
        }
    }
}

/// Move the highlight one chunk forward, aborting after the configured cycles.
fn advance(core: &mut ModeCore) -> bool {
    core.highlight(false);
    core.chunker.next();

    if core.max_cycles_reached() {
        core.chunker.reset();
        return false;
    }

    core.highlight(true);
    true
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::config::{ScanConfig, ScannerSettings};
    use crate::mode::testing::{grid, highlighted, RecordingHost};
    use crate::mode::{ScanAction, ScanMode};

    fn settings() -> ScannerSettings {
        ScannerSettings {
            feedback_flash: false,
            ..ScannerSettings::default()
        }
    }

    fn mode_with(settings: ScannerSettings) -> (ScanMode, Rc<RecordingHost>) {
        let host = Rc::new(RecordingHost::default());
        let mode = ScanMode::new(ScanConfig::shared(settings), host.clone());
        (mode, host)
    }

    async fn tick(mode: &mut ScanMode, interval: Duration) {
        tokio::time::advance(interval).await;
        mode.fire_due(Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoscan_stops_after_cycles() {
        let settings = settings();
        let interval = Duration::from_millis(settings.interval_ms);
        let (layout, keys) = grid(&[&["a", "b"], &["c", "d"], &["e"]]);
        let (mut mode, _host) = mode_with(settings);
        mode.set_layer(&layout, None);

        mode.do_action(ScanAction::Step);
        assert_eq!(highlighted(&keys), vec!["a", "b"]);

        // two passes over three rows
        for _ in 0..5 {
            tick(&mut mode, interval).await;
            assert!(mode.is_running());
        }
        assert_eq!(highlighted(&keys), vec!["e"]);

        tick(&mut mode, interval).await;
        assert!(!mode.is_running());
        assert_eq!(mode.chunker().index(), 0);
        assert_eq!(mode.chunker().cycles, 0);
        assert!(highlighted(&keys).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoscan_descends_and_activates() {
        let settings = settings();
        let interval = Duration::from_millis(settings.interval_ms);
        let (layout, keys) = grid(&[&["a", "b"], &["c", "d"]]);
        let (mut mode, host) = mode_with(settings);
        mode.set_layer(&layout, None);

        mode.do_action(ScanAction::Step);
        tick(&mut mode, interval).await;
        assert_eq!(highlighted(&keys), vec!["c", "d"]);

        mode.do_action(ScanAction::Step);
        assert_eq!(highlighted(&keys), vec!["c"]);
        assert!(mode.is_running());

        tick(&mut mode, interval).await;
        assert_eq!(highlighted(&keys), vec!["d"]);

        mode.do_action(ScanAction::Step);
        assert_eq!(host.activated(), vec!["d"]);
        assert!(!mode.is_running());
        assert!(mode.chunker().is_reset());
        assert!(highlighted(&keys).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_cycles_in_sub_level_returns_to_top() {
        let mut settings = settings();
        settings.cycles = 1;
        let interval = Duration::from_millis(settings.interval_ms);
        let (layout, keys) = grid(&[&["a", "b"], &["c"]]);
        let (mut mode, host) = mode_with(settings);
        mode.set_layer(&layout, None);

        mode.do_action(ScanAction::Step);
        mode.do_action(ScanAction::Step);
        assert_eq!(mode.chunker().depth(), 1);

        tick(&mut mode, interval).await;
        tick(&mut mode, interval).await;
        assert!(!mode.is_running());
        assert_eq!(mode.chunker().depth(), 0);
        assert!(highlighted(&keys).is_empty());
        assert!(host.activated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_userscan_press_and_hold() {
        let mut settings = settings();
        settings.user_scan = true;
        let interval = Duration::from_millis(settings.interval_ms);
        let (layout, keys) = grid(&[&["a", "b"], &["c", "d"]]);
        let (mut mode, host) = mode_with(settings);
        mode.set_layer(&layout, None);
        assert_eq!(mode.name(), "UserScan");

        // hold through one tick, release on the second row
        mode.do_action(ScanAction::StepStart);
        assert_eq!(highlighted(&keys), vec!["a", "b"]);
        tick(&mut mode, interval).await;
        mode.do_action(ScanAction::StepStop);
        assert!(!mode.is_running());
        assert_eq!(highlighted(&keys), vec!["c", "d"]);

        // next press enters the row
        mode.do_action(ScanAction::StepStart);
        assert_eq!(highlighted(&keys), vec!["c"]);
        tick(&mut mode, interval).await;
        mode.do_action(ScanAction::StepStop);

        assert_eq!(host.activated(), vec!["d"]);
        assert!(mode.chunker().is_reset());
        assert!(highlighted(&keys).is_empty());
    }

    #[test]
    fn test_userscan_maps_press_and_release() {
        let map = ScannerSettings::default().device_button_map;
        assert_eq!(super::UserScan::map_actions(&map, 1, true), ScanAction::StepStart);
        assert_eq!(super::UserScan::map_actions(&map, 3, false), ScanAction::StepStop);
        assert_eq!(super::UserScan::map_actions(&map, 2, true), ScanAction::Unhandled);
        assert_eq!(super::AutoScan::map_actions(&map, 3, true), ScanAction::Step);
        assert_eq!(super::AutoScan::map_actions(&map, 3, false), ScanAction::Unhandled);
    }
}
