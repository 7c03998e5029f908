/*!
 * Scan Modes
 *
 * A scan mode turns switch presses and timer ticks into chunk traversal and
 * finally into a key activation. Every mode shares the same `ModeCore` (chunker,
 * step timer, activation flash) and adds its own small state machine:
 *
 *   AutoScan   - 1 switch, automatic cycling
 *   UserScan   - 1 switch, cycles only while the switch is held
 *   OverScan   - 1 switch, fast forward with slow backtrack
 *   StepScan   - 2 switches, step and select
 *   DirectScan - 3 or 5 switches, direction keys
 */

mod auto;
mod direct;
mod over;
mod step;

pub use auto::{AutoScan, UserScan};
pub use direct::DirectScan;
pub use over::OverScan;
pub use step::StepScan;

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::chunker::Chunker;
use crate::config::{ConfigError, DeviceMap, ScanConfig, ScanModeKind};
use crate::device::{DeviceInfo, InputEvent};
use crate::layout::{Key, Layout};
use crate::timer::{Repeat, ScanTimer};

/// Number of highlight toggles before a key is activated
pub const ACTIVATION_FLASH_COUNT: u32 = 4;

/// Time between activation flashes
pub const ACTIVATION_FLASH_INTERVAL: Duration = Duration::from_millis(100);

/// Normalized switch action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanAction {
    Step,
    Left,
    Right,
    Up,
    Down,
    Activate,
    StepStart,
    StepStop,
    Unhandled,
}

impl ScanAction {
    pub fn code(self) -> u8 {
        match self {
            Self::Step => 0,
            Self::Left => 1,
            Self::Right => 2,
            Self::Up => 3,
            Self::Down => 4,
            Self::Activate => 5,
            Self::StepStart => 6,
            Self::StepStop => 7,
            Self::Unhandled => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let action = match code {
            0 => Self::Step,
            1 => Self::Left,
            2 => Self::Right,
            3 => Self::Up,
            4 => Self::Down,
            5 => Self::Activate,
            6 => Self::StepStart,
            7 => Self::StepStop,
            8 => Self::Unhandled,
            _ => return None,
        };
        Some(action)
    }
}

impl FromStr for ScanAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('_', "-");
        let action = match name.as_str() {
            "step" => Self::Step,
            "left" => Self::Left,
            "right" => Self::Right,
            "up" => Self::Up,
            "down" => Self::Down,
            "activate" => Self::Activate,
            "step-start" => Self::StepStart,
            "step-stop" => Self::StepStop,
            other => other
                .parse::<u8>()
                .ok()
                .and_then(Self::from_code)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "action",
                    value: s.to_string(),
                })?,
        };
        Ok(action)
    }
}

impl fmt::Display for ScanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Step => "step",
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
            Self::Activate => "activate",
            Self::StepStart => "step-start",
            Self::StepStop => "step-stop",
            Self::Unhandled => "unhandled",
        };
        f.write_str(name)
    }
}

/// Callbacks into the keyboard that hosts the scanner.
///
/// Implementations must not call back into the scanner from `redraw`.
pub trait ScanHost {
    /// Repaint the given keys, their `scanned` flag changed.
    fn redraw(&self, keys: &[Key]);

    /// Press the selected key.
    fn activate(&self, key: &Key);

    /// A new input device showed up that is not configured for scanning.
    fn new_device_found(&self, _device: &DeviceInfo) {}
}

/// State shared by all scan modes.
pub struct ModeCore {
    config: Rc<ScanConfig>,
    host: Rc<dyn ScanHost>,
    pub chunker: Chunker,
    step_timer: ScanTimer,
    activation_timer: ScanTimer,
    flash: u32,
    flash_key: Option<Key>,
    init_pending: bool,
}

impl ModeCore {
    fn new(config: Rc<ScanConfig>, host: Rc<dyn ScanHost>, chunker: Chunker) -> Self {
        Self {
            config,
            host,
            chunker,
            step_timer: ScanTimer::new("step", Repeat::Recurring),
            activation_timer: ScanTimer::new("activation", Repeat::Recurring),
            flash: 0,
            flash_key: None,
            init_pending: false,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn step_timer(&self) -> &ScanTimer {
        &self.step_timer
    }

    pub fn activation_timer(&self) -> &ScanTimer {
        &self.activation_timer
    }

    pub fn is_running(&self) -> bool {
        self.step_timer.is_running()
    }

    pub fn max_cycles_reached(&self) -> bool {
        self.chunker.cycles >= self.config.cycles()
    }

    pub(crate) fn redraw(&self, keys: &[Key]) {
        if !keys.is_empty() {
            self.host.redraw(keys);
        }
    }

    /// Highlight or clear the current chunk and repaint what changed.
    pub(crate) fn highlight(&self, on: bool) {
        let keys = self.chunker.highlight(on);
        self.redraw(&keys);
    }

    pub(crate) fn start(&mut self, interval: Duration) {
        self.step_timer.start(interval);
    }

    pub(crate) fn stop(&mut self) {
        self.step_timer.stop();
    }

    /// Activate the current key, flashing it first if configured.
    ///
    /// Without flashing the key is pressed right away and the owning mode
    /// re-initializes its position once the current action finished.
    pub(crate) fn activate(&mut self) {
        let Some(key) = self.chunker.get_key() else {
            return;
        };

        if self.config.feedback_flash() {
            self.flash = ACTIVATION_FLASH_COUNT;
            self.flash_key = Some(key);
            self.activation_timer.start(ACTIVATION_FLASH_INTERVAL);
        } else {
            debug!("[ScanMode] Activating key {}", key.id());
            self.host.activate(&key);
            self.init_pending = true;
        }
    }
}

impl fmt::Debug for ModeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeCore")
            .field("chunker", &self.chunker)
            .field("step_timer", &self.step_timer)
            .field("activation_timer", &self.activation_timer)
            .field("flash", &self.flash)
            .finish()
    }
}

/// The state machine of the active mode
#[derive(Debug, Clone)]
pub enum ModeState {
    Auto(AutoScan),
    User(UserScan),
    Over(OverScan),
    Step(StepScan),
    Direct(DirectScan),
}

impl ModeState {
    /// Pick the state machine for the configured mode.
    pub fn from_config(config: &ScanConfig) -> Self {
        match config.mode() {
            ScanModeKind::Autoscan if config.user_scan() => Self::User(UserScan),
            ScanModeKind::Autoscan => Self::Auto(AutoScan),
            ScanModeKind::Overscan => Self::Over(OverScan::new()),
            ScanModeKind::Stepscan => Self::Step(StepScan::new()),
            ScanModeKind::Directed3 => Self::Direct(DirectScan::three()),
            ScanModeKind::Directed5 => Self::Direct(DirectScan::five()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto(_) => "AutoScan",
            Self::User(_) => "UserScan",
            Self::Over(_) => "OverScan",
            Self::Step(_) => "StepScan",
            Self::Direct(direct) if direct.switches() == 3 => "DirectScan(3)",
            Self::Direct(_) => "DirectScan(5)",
        }
    }

    pub fn create_chunker(&self) -> Chunker {
        match self {
            Self::Auto(_) | Self::User(_) => Chunker::grouped(),
            Self::Over(_) => Chunker::flat(),
            Self::Step(_) => Chunker::rows(),
            Self::Direct(direct) => direct.create_chunker(),
        }
    }
}

/// A scan mode: shared core plus the mode's state machine.
#[derive(Debug)]
pub struct ScanMode {
    core: ModeCore,
    state: ModeState,
}

impl ScanMode {
    /// Create the mode selected by the configuration.
    pub fn new(config: Rc<ScanConfig>, host: Rc<dyn ScanHost>) -> Self {
        let state = ModeState::from_config(&config);
        Self::with_state(state, config, host)
    }

    pub fn with_state(state: ModeState, config: Rc<ScanConfig>, host: Rc<dyn ScanHost>) -> Self {
        let chunker = state.create_chunker();
        debug!("[ScanMode] Created {}", state.name());
        Self {
            core: ModeCore::new(config, host, chunker),
            state,
        }
    }

    pub fn name(&self) -> &'static str {
        self.state.name()
    }

    pub fn state(&self) -> &ModeState {
        &self.state
    }

    pub fn core(&self) -> &ModeCore {
        &self.core
    }

    pub fn chunker(&self) -> &Chunker {
        &self.core.chunker
    }

    /// Whether the step timer is scheduled
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Whether an activation flash is in progress
    pub fn is_flashing(&self) -> bool {
        self.core.activation_timer.is_running()
    }

    pub fn max_cycles_reached(&self) -> bool {
        self.core.max_cycles_reached()
    }

    /// Scan `layer` of `layout` from the start.
    pub fn set_layer(&mut self, layout: &dyn Layout, layer: Option<&str>) {
        self.reset();
        self.core.chunker = self.state.create_chunker();
        self.core.chunker.chunk(layout, layer);
        self.init_position();
    }

    /// Drop the current keys, leaving nothing to scan.
    pub fn clear_layer(&mut self) {
        self.reset();
        self.core.chunker = self.state.create_chunker();
    }

    /// Select the starting position after a layer change or an activation.
    pub fn init_position(&mut self) {
        match &mut self.state {
            ModeState::Step(step) => step.init_position(&mut self.core),
            ModeState::Direct(direct) => direct.init_position(&mut self.core),
            ModeState::Auto(_) | ModeState::User(_) | ModeState::Over(_) => {}
        }
    }

    /// Translate a raw button or key code into an action of this mode.
    pub fn map_actions(&self, map: &DeviceMap, detail: u32, pressed: bool) -> ScanAction {
        match &self.state {
            ModeState::Auto(_) | ModeState::Over(_) => AutoScan::map_actions(map, detail, pressed),
            ModeState::User(_) => UserScan::map_actions(map, detail, pressed),
            ModeState::Step(_) | ModeState::Direct(_) => {
                if pressed {
                    map.get(&detail).copied().unwrap_or(ScanAction::Unhandled)
                } else {
                    ScanAction::Unhandled
                }
            }
        }
    }

    /// Handle a switch event of the scan device.
    pub fn handle_event(&mut self, event: &InputEvent) {
        if self.is_flashing() {
            trace!("[ScanMode] Ignoring {:?} during activation", event.kind);
            return;
        }

        let pressed = event.kind.is_press();
        let action = self.core.config.read(|settings| {
            let map = if event.kind.is_button() {
                &settings.device_button_map
            } else {
                &settings.device_key_map
            };
            self.map_actions(map, event.detail, pressed)
        });

        if action != ScanAction::Unhandled {
            self.do_action(action);
        }
    }

    pub fn do_action(&mut self, action: ScanAction) {
        trace!("[ScanMode] {} action {}", self.state.name(), action);
        let core = &mut self.core;
        match &mut self.state {
            ModeState::Auto(auto) => auto.do_action(core),
            ModeState::User(user) => user.do_action(core, action),
            ModeState::Over(over) => over.do_action(core),
            ModeState::Step(step) => step.do_action(core, action),
            ModeState::Direct(direct) => direct.do_action(core, action),
        }
        self.run_pending_init();
    }

    /// Step timer callback. Returns whether scanning continues.
    pub fn scan(&mut self) -> bool {
        let core = &mut self.core;
        let keep = match &mut self.state {
            ModeState::Auto(auto) => auto.scan(core),
            ModeState::User(user) => user.scan(core),
            ModeState::Over(over) => over.scan(core),
            ModeState::Step(_) | ModeState::Direct(_) => false,
        };
        self.run_pending_init();
        keep
    }

    /// Activate the current key.
    pub fn activate(&mut self) {
        self.core.activate();
        self.run_pending_init();
    }

    fn run_pending_init(&mut self) {
        if std::mem::take(&mut self.core.init_pending) {
            self.init_position();
        }
    }

    /// Activation timer callback: flash the key, then press it.
    fn on_activation_timer(&mut self) -> bool {
        let Some(key) = self.core.flash_key.clone() else {
            return false;
        };

        if self.core.flash > 0 {
            key.set_scanned(!key.is_scanned());
            self.core.flash -= 1;
            self.core.redraw(std::slice::from_ref(&key));
            return true;
        }

        self.core.flash_key = None;
        debug!("[ScanMode] Activating key {}", key.id());
        self.core.host.activate(&key);
        self.init_position();
        false
    }

    /// Earliest deadline of the mode's timers
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.core.step_timer.deadline(), self.core.activation_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run the callbacks of all timers due at `now`. Returns whether any fired.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        let mut fired = false;

        if self.core.activation_timer.is_due(now) {
            let generation = self.core.activation_timer.generation();
            let keep = self.on_activation_timer();
            self.core.activation_timer.complete(generation, keep);
            fired = true;
        }

        if self.core.step_timer.is_due(now) {
            let generation = self.core.step_timer.generation();
            let keep = self.scan();
            self.core.step_timer.complete(generation, keep);
            fired = true;
        }

        fired
    }

    /// Stop scanning and clear all highlights.
    pub fn reset(&mut self) {
        self.core.stop();
        let keys = self.core.chunker.highlight_all(false);
        self.core.redraw(&keys);
        self.core.chunker.reset();
        if let ModeState::Over(over) = &mut self.state {
            over.reset();
        }
    }

    /// Stop all timers and clear highlights before the mode is dropped.
    pub fn finalize(&mut self) {
        self.reset();
        self.core.activation_timer.stop();
        self.core.flash = 0;
        if let Some(key) = self.core.flash_key.take() {
            if key.is_scanned() {
                key.set_scanned(false);
                self.core.redraw(std::slice::from_ref(&key));
            }
        }
        debug!("[ScanMode] Finalized {}", self.state.name());
    }
}
