//! Scan Device
//!
//! Owns the one physical input device (or the virtual core pointer) whose
//! switch presses drive the scanner. Handles hot-plug, detaching the device
//! from its master, and drops the events the X server echoes through the
//! virtual core devices.

#[cfg(target_os = "linux")]
pub mod xinput;

#[cfg(target_os = "linux")]
pub use xinput::XInputCli;

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ScanConfig, DEFAULT_DEVICE_NAME};

/// Device id of the virtual core pointer
pub const DEFAULT_VCP_ID: u32 = 2;

/// Device id of the virtual core keyboard
pub const DEFAULT_VCK_ID: u32 = 3;

/// Devices never offered for scanning
pub const BLACKLIST: [&str; 5] = [
    "Virtual core pointer",
    "Virtual core keyboard",
    "Virtual core XTEST pointer",
    "Virtual core XTEST keyboard",
    "Power Button",
];

/// Role of a device in the XInput hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceUse {
    MasterPointer,
    MasterKeyboard,
    SlavePointer,
    SlaveKeyboard,
    FloatingSlave,
}

impl DeviceUse {
    pub fn code(self) -> u8 {
        match self {
            Self::MasterPointer => 1,
            Self::MasterKeyboard => 2,
            Self::SlavePointer => 3,
            Self::SlaveKeyboard => 4,
            Self::FloatingSlave => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::MasterPointer),
            2 => Some(Self::MasterKeyboard),
            3 => Some(Self::SlavePointer),
            4 => Some(Self::SlaveKeyboard),
            5 => Some(Self::FloatingSlave),
            _ => None,
        }
    }
}

/// Kind of hardware behind a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceSource {
    Keyboard,
    Mouse,
    Touchscreen,
    Touchpad,
    Eraser,
    Cursor,
    Pen,
}

/// Touch capability of a slave pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchMode {
    Direct,
    Dependent,
}

impl DeviceSource {
    /// Guess the source from the device's role, touch mode and name.
    pub fn classify(name: &str, use_kind: DeviceUse, touch: Option<TouchMode>) -> Self {
        match (use_kind, touch) {
            (DeviceUse::MasterKeyboard | DeviceUse::SlaveKeyboard, _) => Self::Keyboard,
            (DeviceUse::SlavePointer, Some(TouchMode::Direct)) => Self::Touchscreen,
            (DeviceUse::SlavePointer, Some(TouchMode::Dependent)) => Self::Touchpad,
            _ => {
                let name = name.to_lowercase();
                if name.contains("eraser") {
                    Self::Eraser
                } else if name.contains("cursor") {
                    Self::Cursor
                } else if name.contains("wacom") || name.contains("pen") {
                    Self::Pen
                } else {
                    Self::Mouse
                }
            }
        }
    }
}

/// An input device as reported by the device manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub id: u32,
    pub source: DeviceSource,
    pub use_kind: DeviceUse,
    /// Master a slave is attached to
    pub master_id: Option<u32>,
    pub enabled: bool,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, id: u32, use_kind: DeviceUse, master_id: Option<u32>) -> Self {
        let name = name.into();
        Self {
            source: DeviceSource::classify(&name, use_kind, None),
            name,
            id,
            use_kind,
            master_id,
            enabled: true,
        }
    }

    /// Serialized identity stored in the `device_name` setting
    pub fn identity(&self) -> String {
        DeviceIdentity {
            name: self.name.clone(),
            use_kind: self.use_kind,
        }
        .to_string()
    }

    pub fn is_master(&self) -> bool {
        matches!(self.use_kind, DeviceUse::MasterPointer | DeviceUse::MasterKeyboard)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.use_kind, DeviceUse::MasterPointer | DeviceUse::SlavePointer)
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self.use_kind, DeviceUse::MasterKeyboard | DeviceUse::SlaveKeyboard)
    }

    pub fn is_floating(&self) -> bool {
        self.use_kind == DeviceUse::FloatingSlave
    }
}

/// Parsed `<name>:<use>` device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub use_kind: DeviceUse,
}

impl FromStr for DeviceIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedDeviceName(s.to_string());
        let (name, use_code) = s.rsplit_once(':').ok_or_else(malformed)?;
        if name.is_empty() {
            return Err(malformed());
        }
        let use_kind = use_code
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(DeviceUse::from_code)
            .ok_or_else(malformed)?;
        Ok(Self {
            name: name.to_string(),
            use_kind,
        })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.use_kind.code())
    }
}

/// Switch event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    ButtonPress,
    ButtonRelease,
    KeyPress,
    KeyRelease,
}

impl InputKind {
    pub fn is_press(self) -> bool {
        matches!(self, Self::ButtonPress | Self::KeyPress)
    }

    pub fn is_button(self) -> bool {
        matches!(self, Self::ButtonPress | Self::ButtonRelease)
    }
}

/// A press or release of a button or key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub device_id: u32,
    pub kind: InputKind,
    /// Button number or key code
    pub detail: u32,
}

/// Events delivered by a device manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(u32),
    Removed(u32),
    Changed(u32),
    Input(InputEvent),
}

/// Which events to receive from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSelection {
    Buttons,
    Keys,
}

/// Access to the input devices of the system.
pub trait DeviceManager {
    fn devices(&self) -> Vec<DeviceInfo>;

    fn lookup(&self, id: u32) -> Option<DeviceInfo> {
        self.devices().into_iter().find(|device| device.id == id)
    }

    /// Start delivering the selected events of `device`.
    ///
    /// Selecting a master device delivers the input of all slaves attached
    /// to it, tagged with the master's id.
    fn select_events(&self, device: &DeviceInfo, selection: EventSelection) -> Result<()>;

    fn unselect_events(&self, device_id: u32) -> Result<()>;

    /// Attach a floating device to `master_id`.
    fn attach(&self, device_id: u32, master_id: u32) -> Result<()>;

    /// Detach a device from its master.
    fn detach(&self, device_id: u32) -> Result<()>;

    /// Re-read the device hierarchy and report what changed since the last call.
    fn refresh(&self) -> Result<Vec<DeviceEvent>> {
        Ok(Vec::new())
    }
}

/// What the scanner should do with a device event
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOutcome {
    /// Pass the input event on to the scan mode
    Forward,
    /// A new device the user may want to use
    Prompt(DeviceInfo),
    /// The configured device appeared and was opened
    Opened(u32),
    /// The open device went away, back to the default device
    FellBack,
    /// Input echoed through a virtual core device
    Dropped,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveDevice {
    id: u32,
    master_id: Option<u32>,
}

/// The device the scanner listens to.
pub struct ScanDevice {
    manager: Rc<dyn DeviceManager>,
    config: Rc<ScanConfig>,
    active: Option<ActiveDevice>,
    floating: bool,
    /// Events of the virtual core pointer are selected
    default_selected: bool,
}

impl ScanDevice {
    pub fn new(manager: Rc<dyn DeviceManager>, config: Rc<ScanConfig>) -> Self {
        Self {
            manager,
            config,
            active: None,
            floating: false,
            default_selected: false,
        }
    }

    /// Id of the open device, `None` while using the default device
    pub fn active_id(&self) -> Option<u32> {
        self.active.map(|active| active.id)
    }

    pub fn is_floating(&self) -> bool {
        self.floating
    }

    /// Whether the virtual core pointer feeds the scanner
    pub fn is_default_selected(&self) -> bool {
        self.default_selected
    }

    /// Devices that can be offered to the user.
    pub fn list(&self) -> Vec<DeviceInfo> {
        self.manager
            .devices()
            .into_iter()
            .filter(|device| device.enabled && !BLACKLIST.contains(&device.name.as_str()))
            .collect()
    }

    /// Whether a device can be opened for scanning.
    pub fn is_useable(device: &DeviceInfo) -> bool {
        !BLACKLIST.contains(&device.name.as_str()) && device.enabled && !device.is_floating()
    }

    /// Switch to the device named by the `device_name` setting.
    ///
    /// An identity that matches no device resets the setting to the default.
    pub fn apply_device_name(&mut self) {
        self.close();

        let name = self.config.device_name();
        if name == DEFAULT_DEVICE_NAME {
            self.select_default();
            return;
        }

        match name.parse::<DeviceIdentity>() {
            Ok(identity) => {
                let wanted = identity.to_string();
                let device = self
                    .manager
                    .devices()
                    .into_iter()
                    .find(|device| Self::is_useable(device) && device.identity() == wanted);
                if let Some(device) = device {
                    self.open(&device);
                }
            }
            Err(e) => warn!("[ScanDevice] {}", e),
        }

        if self.active.is_none() {
            debug!("[ScanDevice] Unknown device-name {:?} in configuration", name);
            self.select_default();
            self.config.set_device_detach(false);
            self.config.set_device_name(DEFAULT_DEVICE_NAME);
        }
    }

    /// Listen to the buttons of the virtual core pointer.
    fn select_default(&mut self) {
        if self.default_selected {
            return;
        }
        let pointer = self.manager.lookup(DEFAULT_VCP_ID).unwrap_or_else(|| {
            DeviceInfo::new(BLACKLIST[0], DEFAULT_VCP_ID, DeviceUse::MasterPointer, None)
        });

        match self.manager.select_events(&pointer, EventSelection::Buttons) {
            Ok(()) => {
                self.default_selected = true;
                debug!("[ScanDevice] Listening to the virtual core pointer");
            }
            Err(e) => warn!("[ScanDevice] Failed to select core pointer events: {:#}", e),
        }
    }

    fn unselect_default(&mut self) {
        if !std::mem::take(&mut self.default_selected) {
            return;
        }
        if let Err(e) = self.manager.unselect_events(DEFAULT_VCP_ID) {
            warn!("[ScanDevice] Failed to unselect core pointer events: {:#}", e);
        }
    }

    /// Follow the `device_detach` setting for the open device.
    pub fn apply_detach(&mut self) {
        if self.active.is_none() {
            return;
        }
        let detach = self.config.device_detach();
        if detach && !self.floating {
            self.detach();
        } else if !detach && self.floating {
            self.attach();
        }
    }

    /// Select events of `device` and optionally detach it.
    ///
    /// On failure the previously open device stays active.
    pub fn open(&mut self, device: &DeviceInfo) -> bool {
        let selection = if device.is_pointer() {
            EventSelection::Buttons
        } else {
            EventSelection::Keys
        };

        if let Err(e) = self.manager.select_events(device, selection) {
            warn!("[ScanDevice] Failed to open device {}: {:#}", device.id, e);
            return false;
        }

        if self.active_id().map_or(false, |id| id != device.id) {
            self.close();
        }
        self.unselect_default();
        self.active = Some(ActiveDevice {
            id: device.id,
            master_id: device.master_id,
        });
        info!("[ScanDevice] Opened device {} ({})", device.id, device.name);

        if self.config.device_detach() && !device.is_master() && !self.floating {
            self.detach();
        }
        true
    }

    /// Stop using the open device, re-attaching it first if it is floating.
    pub fn close(&mut self) {
        if self.floating {
            self.attach();
        }

        if let Some(active) = self.active.take() {
            if let Err(e) = self.manager.unselect_events(active.id) {
                warn!("[ScanDevice] Failed to close device {}: {:#}", active.id, e);
            }
            info!("[ScanDevice] Closed device {}", active.id);
        }
    }

    /// Re-attach the open device to its master.
    pub fn attach(&mut self) {
        let Some(active) = self.active else {
            return;
        };
        let Some(master_id) = active.master_id else {
            warn!("[ScanDevice] Device {} has no master to attach to", active.id);
            return;
        };

        match self.manager.attach(active.id, master_id) {
            Ok(()) => {
                self.floating = false;
                debug!("[ScanDevice] Attached device {} to {}", active.id, master_id);
            }
            Err(e) => warn!(
                "[ScanDevice] Failed to attach device {} to {}: {:#}",
                active.id, master_id, e
            ),
        }
    }

    /// Detach the open device from its master.
    pub fn detach(&mut self) {
        let Some(active) = self.active else {
            return;
        };

        match self.manager.detach(active.id) {
            Ok(()) => {
                self.floating = true;
                debug!("[ScanDevice] Detached device {}", active.id);
            }
            Err(e) => warn!("[ScanDevice] Failed to detach device {}: {:#}", active.id, e),
        }
    }

    /// Whether input from `device_id` belongs to the scanner.
    pub fn accepts(&self, device_id: u32) -> bool {
        if device_id == DEFAULT_VCK_ID {
            return false;
        }
        if device_id == DEFAULT_VCP_ID && self.config.device_name() == DEFAULT_DEVICE_NAME {
            return true;
        }
        self.active_id() == Some(device_id)
    }

    pub fn handle_event(&mut self, event: &DeviceEvent) -> DeviceOutcome {
        match event {
            DeviceEvent::Added(id) => self.device_added(*id),
            DeviceEvent::Removed(id) => {
                if self.active_id() != Some(*id) {
                    return DeviceOutcome::Ignored;
                }
                info!("[ScanDevice] Device {} removed, falling back to default", id);
                self.active = None;
                self.floating = false;
                // the backend may still watch the vanished device
                if let Err(e) = self.manager.unselect_events(*id) {
                    debug!("[ScanDevice] Unselecting removed device {}: {:#}", id, e);
                }
                self.select_default();
                self.config.set_device_detach(false);
                self.config.set_device_name(DEFAULT_DEVICE_NAME);
                DeviceOutcome::FellBack
            }
            DeviceEvent::Changed(_) => DeviceOutcome::Ignored,
            DeviceEvent::Input(input) => {
                if self.accepts(input.device_id) {
                    DeviceOutcome::Forward
                } else {
                    DeviceOutcome::Dropped
                }
            }
        }
    }

    fn device_added(&mut self, id: u32) -> DeviceOutcome {
        let Some(device) = self.manager.lookup(id) else {
            debug!("[ScanDevice] Added device {} vanished", id);
            return DeviceOutcome::Ignored;
        };
        if device.is_master() || !Self::is_useable(&device) {
            return DeviceOutcome::Ignored;
        }

        if device.identity() == self.config.device_name() {
            if self.active_id() == Some(id) || !self.open(&device) {
                return DeviceOutcome::Ignored;
            }
            return DeviceOutcome::Opened(id);
        }

        debug!("[ScanDevice] New device {} ({})", id, device.name);
        DeviceOutcome::Prompt(device)
    }

    /// Close the device before the scanner goes away.
    pub fn finalize(&mut self) {
        self.close();
        self.unselect_default();
    }
}

impl fmt::Debug for ScanDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanDevice")
            .field("active", &self.active)
            .field("floating", &self.floating)
            .field("default_selected", &self.default_selected)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeManager;
    use super::*;
    use crate::config::ScannerSettings;

    fn scan_device(manager: FakeManager, settings: ScannerSettings) -> (ScanDevice, Rc<FakeManager>, Rc<ScanConfig>) {
        let manager = Rc::new(manager);
        let config = ScanConfig::shared(settings);
        let device = ScanDevice::new(manager.clone(), config.clone());
        (device, manager, config)
    }

    fn foot_switch() -> ScannerSettings {
        ScannerSettings {
            device_name: "Foot Switch:3".to_string(),
            ..ScannerSettings::default()
        }
    }

    fn input(device_id: u32) -> DeviceEvent {
        DeviceEvent::Input(InputEvent {
            device_id,
            kind: InputKind::ButtonPress,
            detail: 1,
        })
    }

    #[test]
    fn test_identity_round_trip() {
        let device = DeviceInfo::new("Foot Switch", 12, DeviceUse::SlavePointer, Some(2));
        assert_eq!(device.identity(), "Foot Switch:3");

        let identity: DeviceIdentity = "Head: Mouse:3".parse().unwrap();
        assert_eq!(identity.name, "Head: Mouse");
        assert_eq!(identity.use_kind, DeviceUse::SlavePointer);

        assert!("Foot Switch".parse::<DeviceIdentity>().is_err());
        assert!("Foot Switch:9".parse::<DeviceIdentity>().is_err());
        assert!(":3".parse::<DeviceIdentity>().is_err());
    }

    #[test]
    fn test_classify_source() {
        assert_eq!(
            DeviceSource::classify("USB Keypad", DeviceUse::SlaveKeyboard, None),
            DeviceSource::Keyboard
        );
        assert_eq!(
            DeviceSource::classify("Panel", DeviceUse::SlavePointer, Some(TouchMode::Direct)),
            DeviceSource::Touchscreen
        );
        assert_eq!(
            DeviceSource::classify("Wacom Intuos Pen stylus", DeviceUse::SlavePointer, None),
            DeviceSource::Pen
        );
        assert_eq!(
            DeviceSource::classify("Wacom Intuos Pen eraser", DeviceUse::SlavePointer, None),
            DeviceSource::Eraser
        );
        assert_eq!(
            DeviceSource::classify("Logitech Mouse", DeviceUse::SlavePointer, None),
            DeviceSource::Mouse
        );
    }

    #[test]
    fn test_list_skips_blacklisted_and_disabled() {
        let manager = FakeManager::standard();
        manager.devices.borrow_mut()[4].enabled = false;
        let (device, _, _) = scan_device(manager, ScannerSettings::default());

        let names: Vec<_> = device.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Foot Switch"]);
    }

    #[test]
    fn test_open_configured_device() {
        let (mut device, manager, _) = scan_device(FakeManager::standard(), foot_switch());
        device.apply_device_name();

        assert_eq!(device.active_id(), Some(12));
        assert_eq!(manager.calls(), vec!["select 12 Buttons"]);
    }

    #[test]
    fn test_keyboard_device_selects_keys() {
        let settings = ScannerSettings {
            device_name: "USB Keypad:4".to_string(),
            ..ScannerSettings::default()
        };
        let (mut device, manager, _) = scan_device(FakeManager::standard(), settings);
        device.apply_device_name();
        assert_eq!(manager.calls(), vec!["select 13 Keys"]);
    }

    #[test]
    fn test_detach_on_open_and_attach_on_close() {
        let settings = ScannerSettings {
            device_detach: true,
            ..foot_switch()
        };
        let (mut device, manager, _) = scan_device(FakeManager::standard(), settings);
        device.apply_device_name();
        assert!(device.is_floating());

        device.close();
        assert!(!device.is_floating());
        assert_eq!(device.active_id(), None);
        assert_eq!(
            manager.calls(),
            vec!["select 12 Buttons", "detach 12", "attach 12 2", "unselect 12"]
        );

        // closing twice is harmless
        device.close();
        assert_eq!(manager.calls().len(), 4);
    }

    #[test]
    fn test_detach_failure_keeps_device_open() {
        let settings = ScannerSettings {
            device_detach: true,
            ..foot_switch()
        };
        let manager = FakeManager::standard();
        *manager.fail_detach.borrow_mut() = true;
        let (mut device, _, _) = scan_device(manager, settings);
        device.apply_device_name();

        assert_eq!(device.active_id(), Some(12));
        assert!(!device.is_floating());
    }

    #[test]
    fn test_failed_open_keeps_previous_device() {
        let (mut device, manager, _) = scan_device(FakeManager::standard(), foot_switch());
        device.apply_device_name();
        manager.fail_select.borrow_mut().push(13);

        let keypad = manager.lookup(13).unwrap();
        assert!(!device.open(&keypad));
        assert_eq!(device.active_id(), Some(12));
    }

    #[test]
    fn test_unknown_device_name_falls_back_to_default() {
        let settings = ScannerSettings {
            device_name: "Missing Switch:3".to_string(),
            device_detach: true,
            ..ScannerSettings::default()
        };
        let (mut device, _, config) = scan_device(FakeManager::standard(), settings);
        device.apply_device_name();

        assert_eq!(device.active_id(), None);
        assert_eq!(config.device_name(), DEFAULT_DEVICE_NAME);
        assert!(!config.device_detach());
    }

    #[test]
    fn test_malformed_device_name_falls_back_to_default() {
        let settings = ScannerSettings {
            device_name: "Foot Switch".to_string(),
            ..ScannerSettings::default()
        };
        let (mut device, manager, config) = scan_device(FakeManager::standard(), settings);
        device.apply_device_name();

        assert_eq!(config.device_name(), DEFAULT_DEVICE_NAME);
        assert_eq!(manager.calls(), vec!["select 2 Buttons"]);
        assert!(device.is_default_selected());
    }

    #[test]
    fn test_duplicate_events_dropped() {
        let (mut device, _, _) = scan_device(FakeManager::standard(), foot_switch());
        device.apply_device_name();

        assert_eq!(device.handle_event(&input(12)), DeviceOutcome::Forward);
        assert_eq!(device.handle_event(&input(DEFAULT_VCP_ID)), DeviceOutcome::Dropped);
        assert_eq!(device.handle_event(&input(DEFAULT_VCK_ID)), DeviceOutcome::Dropped);
        assert_eq!(device.handle_event(&input(13)), DeviceOutcome::Dropped);
    }

    #[test]
    fn test_default_device_forwards_core_pointer() {
        let (mut device, manager, _) = scan_device(FakeManager::standard(), ScannerSettings::default());
        device.apply_device_name();
        assert_eq!(manager.calls(), vec!["select 2 Buttons"]);
        assert!(device.is_default_selected());

        assert_eq!(device.handle_event(&input(DEFAULT_VCP_ID)), DeviceOutcome::Forward);
        assert_eq!(device.handle_event(&input(DEFAULT_VCK_ID)), DeviceOutcome::Dropped);
        assert_eq!(device.handle_event(&input(12)), DeviceOutcome::Dropped);
    }

    #[test]
    fn test_added_configured_device_opens() {
        let manager = FakeManager::standard();
        let switch = manager.devices.borrow_mut().remove(3);
        let (mut device, manager, config) = scan_device(manager, foot_switch());

        // unplugged at startup: falls back to default
        device.apply_device_name();
        assert_eq!(config.device_name(), DEFAULT_DEVICE_NAME);

        config.set_device_name("Foot Switch:3");
        manager.devices.borrow_mut().push(switch);
        assert_eq!(device.handle_event(&DeviceEvent::Added(12)), DeviceOutcome::Opened(12));
        assert_eq!(device.active_id(), Some(12));
        assert!(!device.is_default_selected());
        assert!(manager.calls().contains(&"unselect 2".to_string()));
    }

    #[test]
    fn test_added_event_for_open_device_is_ignored() {
        let (mut device, manager, _) = scan_device(FakeManager::standard(), foot_switch());
        device.apply_device_name();
        assert_eq!(device.active_id(), Some(12));

        assert_eq!(device.handle_event(&DeviceEvent::Added(12)), DeviceOutcome::Ignored);
        assert_eq!(device.active_id(), Some(12));
        assert_eq!(manager.calls(), vec!["select 12 Buttons"]);
    }

    #[test]
    fn test_added_unknown_device_prompts() {
        let (mut device, manager, _) = scan_device(FakeManager::standard(), ScannerSettings::default());
        manager
            .devices
            .borrow_mut()
            .push(DeviceInfo::new("Big Red Button", 14, DeviceUse::SlavePointer, Some(2)));

        match device.handle_event(&DeviceEvent::Added(14)) {
            DeviceOutcome::Prompt(info) => assert_eq!(info.identity(), "Big Red Button:3"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(device.handle_event(&DeviceEvent::Added(99)), DeviceOutcome::Ignored);
        assert_eq!(device.handle_event(&DeviceEvent::Added(DEFAULT_VCP_ID)), DeviceOutcome::Ignored);
    }

    #[test]
    fn test_removed_device_falls_back() {
        let settings = ScannerSettings {
            device_detach: true,
            ..foot_switch()
        };
        let (mut device, manager, config) = scan_device(FakeManager::standard(), settings);
        device.apply_device_name();

        assert_eq!(device.handle_event(&DeviceEvent::Removed(13)), DeviceOutcome::Ignored);
        assert_eq!(device.handle_event(&DeviceEvent::Removed(12)), DeviceOutcome::FellBack);
        assert_eq!(device.active_id(), None);
        assert!(!device.is_floating());
        assert_eq!(config.device_name(), DEFAULT_DEVICE_NAME);
        assert!(!config.device_detach());
        // the watcher is released, a vanished device is not re-attached
        assert_eq!(
            manager.calls(),
            vec!["select 12 Buttons", "detach 12", "unselect 12", "select 2 Buttons"]
        );
        assert!(device.is_default_selected());

        assert_eq!(device.handle_event(&DeviceEvent::Changed(12)), DeviceOutcome::Ignored);
    }

    #[test]
    fn test_switching_between_default_and_device() {
        let (mut device, manager, config) = scan_device(FakeManager::standard(), ScannerSettings::default());
        device.apply_device_name();

        config.set_device_name("Foot Switch:3");
        device.apply_device_name();
        assert_eq!(device.active_id(), Some(12));
        assert!(!device.is_default_selected());

        config.set_device_name(DEFAULT_DEVICE_NAME);
        device.apply_device_name();
        device.finalize();
        assert_eq!(
            manager.calls(),
            vec![
                "select 2 Buttons",
                "select 12 Buttons",
                "unselect 2",
                "unselect 12",
                "select 2 Buttons",
                "unselect 2",
            ]
        );
    }

    #[test]
    fn test_apply_detach_toggles() {
        let (mut device, manager, config) = scan_device(FakeManager::standard(), foot_switch());
        device.apply_device_name();
        assert!(!device.is_floating());

        config.set_device_detach(true);
        device.apply_detach();
        assert!(device.is_floating());

        config.set_device_detach(false);
        device.apply_detach();
        assert!(!device.is_floating());
        assert_eq!(
            manager.calls(),
            vec!["select 12 Buttons", "detach 12", "attach 12 2"]
        );
    }
}
