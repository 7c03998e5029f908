//! Scanner configuration
//!
//! `ScannerSettings` is the plain value type (defaults, INI defaults file, JSON
//! exchange with a settings UI). `ScanConfig` wraps it as the shared, change
//! notifying context that the scanner, its modes and its device read from.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use configparser::ini::Ini;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::mode::ScanAction;

/// Device name sentinel selecting the virtual core pointer
pub const DEFAULT_DEVICE_NAME: &str = "Default";

/// Section of the defaults file holding the scanner keys
const INI_SECTION: &str = "scanner";

/// Upper bound for notifications triggered by notification callbacks
const MAX_NOTIFY_CHAIN: usize = 64;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scanner defaults file: {0}")]
    Ini(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("malformed device name {0:?}, expected <name>:<use>")]
    MalformedDeviceName(String),

    #[error("settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Scan mode selected in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanModeKind {
    #[default]
    Autoscan,
    Overscan,
    Stepscan,
    Directed3,
    Directed5,
}

impl FromStr for ScanModeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "autoscan" | "0" => Ok(Self::Autoscan),
            "overscan" | "1" => Ok(Self::Overscan),
            "stepscan" | "2" => Ok(Self::Stepscan),
            "directed" | "directed3" | "3" => Ok(Self::Directed3),
            "directed5" | "4" => Ok(Self::Directed5),
            _ => Err(ConfigError::InvalidValue {
                key: "mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ScanModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Autoscan => "autoscan",
            Self::Overscan => "overscan",
            Self::Stepscan => "stepscan",
            Self::Directed3 => "directed3",
            Self::Directed5 => "directed5",
        };
        f.write_str(name)
    }
}

/// Identifies one setting for change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Mode,
    Cycles,
    Interval,
    IntervalFast,
    Backtrack,
    UserScan,
    Alternate,
    FeedbackFlash,
    DeviceName,
    DeviceButtonMap,
    DeviceKeyMap,
    DeviceDetach,
    StartCentered,
}

/// Raw code to scan action bindings of one input class (buttons or keys)
pub type DeviceMap = BTreeMap<u32, ScanAction>;

/// All scanner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScannerSettings {
    pub mode: ScanModeKind,
    /// Full passes over a level before a scan is aborted
    pub cycles: u32,
    pub interval_ms: u64,
    pub interval_fast_ms: u64,
    /// Steps OverScan moves back after the second press
    pub backtrack: u32,
    pub user_scan: bool,
    pub alternate: bool,
    pub feedback_flash: bool,
    pub device_name: String,
    pub device_button_map: DeviceMap,
    pub device_key_map: DeviceMap,
    pub device_detach: bool,
    /// Accepted but without effect, DirectScan always starts at the first row
    pub start_centered: bool,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            mode: ScanModeKind::Autoscan,
            cycles: 2,
            interval_ms: 1200,
            interval_fast_ms: 50,
            backtrack: 5,
            user_scan: false,
            alternate: false,
            feedback_flash: true,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            device_button_map: BTreeMap::from([(1, ScanAction::Step), (3, ScanAction::Activate)]),
            device_key_map: BTreeMap::new(),
            device_detach: false,
            start_centered: false,
        }
    }
}

impl ScannerSettings {
    /// Location of the per-user defaults file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("switch-scanner").join("scanner.conf"))
    }

    /// Load the per-user defaults file, falling back to built-in defaults.
    pub fn load_user_defaults() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_ini(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from an INI file with a `[scanner]` section.
    ///
    /// A missing file is not an error and yields the defaults.
    pub fn load_ini(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[Config] No defaults file at {}", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_ini_str(&text)
    }

    /// Parse INI text. Keys missing from the file keep their defaults.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        ini.read(text.to_string()).map_err(ConfigError::Ini)?;

        let mut settings = Self::default();

        if let Some(mode) = ini.get(INI_SECTION, "mode") {
            settings.mode = mode.parse()?;
        }
        if let Some(secs) = ini_float(&ini, "interval")? {
            settings.interval_ms = seconds_to_ms("interval", secs)?;
        }
        if let Some(secs) = ini_float(&ini, "interval-fast")? {
            settings.interval_fast_ms = seconds_to_ms("interval-fast", secs)?;
        }
        if let Some(cycles) = ini_uint(&ini, "cycles")? {
            settings.cycles = cycles;
        }
        if let Some(backtrack) = ini_uint(&ini, "backtrack")? {
            settings.backtrack = backtrack;
        }
        if let Some(value) = ini_bool(&ini, "alternate")? {
            settings.alternate = value;
        }
        if let Some(value) = ini_bool(&ini, "user-scan")? {
            settings.user_scan = value;
        }
        if let Some(value) = ini_bool(&ini, "feedback-flash")? {
            settings.feedback_flash = value;
        }
        if let Some(value) = ini_bool(&ini, "device-detach")? {
            settings.device_detach = value;
        }
        if let Some(value) = ini_bool(&ini, "start-centered")? {
            settings.start_centered = value;
        }
        if let Some(name) = ini.get(INI_SECTION, "device-name") {
            settings.device_name = name;
        }
        if let Some(map) = ini.get(INI_SECTION, "device-button-map") {
            settings.device_button_map = parse_device_map("device-button-map", &map)?;
        }
        if let Some(map) = ini.get(INI_SECTION, "device-key-map") {
            settings.device_key_map = parse_device_map("device-key-map", &map)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the scan modes cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycles < 1 {
            return Err(ConfigError::InvalidValue {
                key: "cycles",
                value: self.cycles.to_string(),
            });
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "interval",
                value: "0".to_string(),
            });
        }
        if self.interval_fast_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "interval-fast",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Raise out of range values to the smallest the setters accept.
    fn clamped(mut self) -> Self {
        if let Err(e) = self.validate() {
            warn!("[ScanConfig] {}, clamping", e);
            self.cycles = self.cycles.max(1);
            self.interval_ms = self.interval_ms.max(1);
            self.interval_fast_ms = self.interval_fast_ms.max(1);
        }
        self
    }
}

fn ini_float(ini: &Ini, key: &'static str) -> Result<Option<f64>, ConfigError> {
    ini.getfloat(INI_SECTION, key)
        .map_err(|_| invalid(ini, key))
}

fn ini_uint(ini: &Ini, key: &'static str) -> Result<Option<u32>, ConfigError> {
    match ini.getuint(INI_SECTION, key).map_err(|_| invalid(ini, key))? {
        Some(value) => u32::try_from(value).map(Some).map_err(|_| invalid(ini, key)),
        None => Ok(None),
    }
}

fn ini_bool(ini: &Ini, key: &'static str) -> Result<Option<bool>, ConfigError> {
    ini.getboolcoerce(INI_SECTION, key)
        .map_err(|_| invalid(ini, key))
}

fn invalid(ini: &Ini, key: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: ini.get(INI_SECTION, key).unwrap_or_default(),
    }
}

fn seconds_to_ms(key: &'static str, secs: f64) -> Result<u64, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: secs.to_string(),
        });
    }
    Ok((secs * 1000.0).round() as u64)
}

/// Parse `code:action` pairs, e.g. `1:step, 3:activate`
fn parse_device_map(key: &'static str, text: &str) -> Result<DeviceMap, ConfigError> {
    let mut map = DeviceMap::new();
    for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let bad = || ConfigError::InvalidValue {
            key,
            value: pair.to_string(),
        };
        let (code, action) = pair.split_once(':').ok_or_else(bad)?;
        let code: u32 = code.trim().parse().map_err(|_| bad())?;
        let action: ScanAction = action.trim().parse().map_err(|_| bad())?;
        map.insert(code, action);
    }
    Ok(map)
}

/// Handle returned by [`ScanConfig::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Rc<dyn Fn(ConfigKey)>;

/// Shared configuration context with change notification.
///
/// Notifications raised while callbacks run, or while a [`ConfigHold`] is
/// alive, are queued and delivered in order afterwards.
pub struct ScanConfig {
    settings: RefCell<ScannerSettings>,
    subscribers: RefCell<HashMap<ConfigKey, Vec<(SubscriptionId, Callback)>>>,
    pending: RefCell<VecDeque<ConfigKey>>,
    holds: Cell<u32>,
    dispatching: Cell<bool>,
    next_id: Cell<u64>,
}

impl ScanConfig {
    pub fn new(settings: ScannerSettings) -> Self {
        Self {
            settings: RefCell::new(settings.clamped()),
            subscribers: RefCell::new(HashMap::new()),
            pending: RefCell::new(VecDeque::new()),
            holds: Cell::new(0),
            dispatching: Cell::new(false),
            next_id: Cell::new(1),
        }
    }

    pub fn shared(settings: ScannerSettings) -> Rc<Self> {
        Rc::new(Self::new(settings))
    }

    /// Read the current settings without copying them.
    pub fn read<R>(&self, f: impl FnOnce(&ScannerSettings) -> R) -> R {
        f(&self.settings.borrow())
    }

    pub fn snapshot(&self) -> ScannerSettings {
        self.settings.borrow().clone()
    }

    pub fn mode(&self) -> ScanModeKind {
        self.settings.borrow().mode
    }

    pub fn cycles(&self) -> u32 {
        self.settings.borrow().cycles
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.settings.borrow().interval_ms)
    }

    pub fn interval_fast(&self) -> Duration {
        Duration::from_millis(self.settings.borrow().interval_fast_ms)
    }

    pub fn backtrack(&self) -> u32 {
        self.settings.borrow().backtrack
    }

    pub fn user_scan(&self) -> bool {
        self.settings.borrow().user_scan
    }

    pub fn alternate(&self) -> bool {
        self.settings.borrow().alternate
    }

    pub fn feedback_flash(&self) -> bool {
        self.settings.borrow().feedback_flash
    }

    pub fn device_name(&self) -> String {
        self.settings.borrow().device_name.clone()
    }

    pub fn device_detach(&self) -> bool {
        self.settings.borrow().device_detach
    }

    pub fn start_centered(&self) -> bool {
        self.settings.borrow().start_centered
    }

    pub fn set_mode(&self, mode: ScanModeKind) {
        self.update(ConfigKey::Mode, mode, |s| &mut s.mode);
    }

    pub fn set_cycles(&self, cycles: u32) {
        self.update(ConfigKey::Cycles, cycles.max(1), |s| &mut s.cycles);
    }

    pub fn set_interval(&self, interval: Duration) {
        let ms = (interval.as_millis() as u64).max(1);
        self.update(ConfigKey::Interval, ms, |s| &mut s.interval_ms);
    }

    pub fn set_interval_fast(&self, interval: Duration) {
        let ms = (interval.as_millis() as u64).max(1);
        self.update(ConfigKey::IntervalFast, ms, |s| &mut s.interval_fast_ms);
    }

    pub fn set_backtrack(&self, steps: u32) {
        self.update(ConfigKey::Backtrack, steps, |s| &mut s.backtrack);
    }

    pub fn set_user_scan(&self, enabled: bool) {
        self.update(ConfigKey::UserScan, enabled, |s| &mut s.user_scan);
    }

    pub fn set_alternate(&self, enabled: bool) {
        self.update(ConfigKey::Alternate, enabled, |s| &mut s.alternate);
    }

    pub fn set_feedback_flash(&self, enabled: bool) {
        self.update(ConfigKey::FeedbackFlash, enabled, |s| &mut s.feedback_flash);
    }

    pub fn set_device_name(&self, name: impl Into<String>) {
        self.update(ConfigKey::DeviceName, name.into(), |s| &mut s.device_name);
    }

    pub fn set_device_button_map(&self, map: DeviceMap) {
        self.update(ConfigKey::DeviceButtonMap, map, |s| &mut s.device_button_map);
    }

    pub fn set_device_key_map(&self, map: DeviceMap) {
        self.update(ConfigKey::DeviceKeyMap, map, |s| &mut s.device_key_map);
    }

    pub fn set_device_detach(&self, detach: bool) {
        self.update(ConfigKey::DeviceDetach, detach, |s| &mut s.device_detach);
    }

    pub fn set_start_centered(&self, enabled: bool) {
        self.update(ConfigKey::StartCentered, enabled, |s| &mut s.start_centered);
    }

    /// Replace every setting, notifying the keys whose value changed.
    pub fn replace(&self, settings: ScannerSettings) {
        let old = std::mem::replace(&mut *self.settings.borrow_mut(), settings.clamped());
        let new = self.settings.borrow().clone();

        let changed = [
            (ConfigKey::Mode, old.mode != new.mode),
            (ConfigKey::Cycles, old.cycles != new.cycles),
            (ConfigKey::Interval, old.interval_ms != new.interval_ms),
            (ConfigKey::IntervalFast, old.interval_fast_ms != new.interval_fast_ms),
            (ConfigKey::Backtrack, old.backtrack != new.backtrack),
            (ConfigKey::UserScan, old.user_scan != new.user_scan),
            (ConfigKey::Alternate, old.alternate != new.alternate),
            (ConfigKey::FeedbackFlash, old.feedback_flash != new.feedback_flash),
            (ConfigKey::DeviceName, old.device_name != new.device_name),
            (ConfigKey::DeviceButtonMap, old.device_button_map != new.device_button_map),
            (ConfigKey::DeviceKeyMap, old.device_key_map != new.device_key_map),
            (ConfigKey::DeviceDetach, old.device_detach != new.device_detach),
            (ConfigKey::StartCentered, old.start_centered != new.start_centered),
        ];

        let _hold = self.hold();
        for (key, differs) in changed {
            if differs {
                self.notify(key);
            }
        }
    }

    /// Register `callback` for changes of `key`.
    pub fn subscribe(&self, key: ConfigKey, callback: impl Fn(ConfigKey) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers
            .borrow_mut()
            .entry(key)
            .or_default()
            .push((id, Rc::new(callback)));
        id
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        for callbacks in self.subscribers.borrow_mut().values_mut() {
            callbacks.retain(|(sub, _)| *sub != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().values().map(Vec::len).sum()
    }

    /// Defer notifications until the returned guard is dropped.
    pub fn hold(&self) -> ConfigHold<'_> {
        self.holds.set(self.holds.get() + 1);
        ConfigHold { config: self }
    }

    fn update<T: PartialEq>(
        &self,
        key: ConfigKey,
        value: T,
        field: impl FnOnce(&mut ScannerSettings) -> &mut T,
    ) {
        {
            let mut settings = self.settings.borrow_mut();
            let slot = field(&mut settings);
            if *slot == value {
                return;
            }
            *slot = value;
        }
        debug!("[Config] {:?} changed", key);
        self.notify(key);
    }

    fn notify(&self, key: ConfigKey) {
        self.pending.borrow_mut().push_back(key);
        self.flush();
    }

    fn flush(&self) {
        if self.dispatching.get() || self.holds.get() > 0 {
            return;
        }
        self.dispatching.set(true);

        let mut delivered = 0;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(key) = next else {
                break;
            };

            delivered += 1;
            if delivered > MAX_NOTIFY_CHAIN {
                warn!("[Config] Notification loop detected at {:?}, dropping the rest", key);
                self.pending.borrow_mut().clear();
                break;
            }

            let callbacks: Vec<Callback> = self
                .subscribers
                .borrow()
                .get(&key)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            for callback in callbacks {
                callback(key);
            }
        }

        self.dispatching.set(false);
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(ScannerSettings::default())
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("settings", &*self.settings.borrow())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Guard returned by [`ScanConfig::hold`].
pub struct ConfigHold<'a> {
    config: &'a ScanConfig,
}

impl Drop for ConfigHold<'_> {
    fn drop(&mut self) {
        let holds = self.config.holds.get().saturating_sub(1);
        self.config.holds.set(holds);
        self.config.flush();
    }
}
