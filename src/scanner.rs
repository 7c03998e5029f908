//! Scanner
//!
//! Entry point for the keyboard: owns the active scan mode and the scan
//! device, follows configuration changes and routes device events.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ConfigKey, ScanConfig, ScanModeKind, SubscriptionId};
use crate::device::{DeviceEvent, DeviceInfo, DeviceManager, DeviceOutcome, ScanDevice};
use crate::layout::{Key, Layout};
use crate::mode::{ScanHost, ScanMode};

/// Host handed to the scan modes.
///
/// Redraws go straight through, activations are queued so the real host is
/// called only after the scanner released its state. The host may then
/// switch layers from inside `activate`.
struct DeferredHost {
    host: Rc<dyn ScanHost>,
    activations: Rc<RefCell<Vec<Key>>>,
}

impl ScanHost for DeferredHost {
    fn redraw(&self, keys: &[Key]) {
        self.host.redraw(keys);
    }

    fn activate(&self, key: &Key) {
        self.activations.borrow_mut().push(key.clone());
    }

    fn new_device_found(&self, device: &DeviceInfo) {
        self.host.new_device_found(device);
    }
}

struct ScannerInner {
    config: Rc<ScanConfig>,
    mode_host: Rc<dyn ScanHost>,
    mode: ScanMode,
    device: ScanDevice,
    layout: Option<Rc<dyn Layout>>,
    layer: Option<String>,
}

impl ScannerInner {
    /// Replace the mode with the one the configuration asks for.
    fn swap_mode(&mut self) {
        self.mode.finalize();
        self.mode = ScanMode::new(self.config.clone(), self.mode_host.clone());
        if let Some(layout) = &self.layout {
            self.mode.set_layer(layout.as_ref(), self.layer.as_deref());
        }
        info!("[Scanner] Switched to {}", self.mode.name());
    }
}

/// Switch scanning for one keyboard.
pub struct Scanner {
    inner: Rc<RefCell<ScannerInner>>,
    config: Rc<ScanConfig>,
    host: Rc<dyn ScanHost>,
    activations: Rc<RefCell<Vec<Key>>>,
    subscriptions: RefCell<Vec<SubscriptionId>>,
    finalized: Cell<bool>,
}

impl Scanner {
    pub fn new(
        config: Rc<ScanConfig>,
        host: Rc<dyn ScanHost>,
        manager: Rc<dyn DeviceManager>,
    ) -> Self {
        let _hold = config.hold();

        let activations = Rc::new(RefCell::new(Vec::new()));
        let mode_host: Rc<dyn ScanHost> = Rc::new(DeferredHost {
            host: host.clone(),
            activations: activations.clone(),
        });
        let inner = Rc::new(RefCell::new(ScannerInner {
            config: config.clone(),
            mode: ScanMode::new(config.clone(), mode_host.clone()),
            mode_host,
            device: ScanDevice::new(manager, config.clone()),
            layout: None,
            layer: None,
        }));

        let scanner = Self {
            inner,
            config: config.clone(),
            host,
            activations,
            subscriptions: RefCell::new(Vec::new()),
            finalized: Cell::new(false),
        };
        scanner.connect();

        if let Ok(mut inner) = scanner.inner.try_borrow_mut() {
            inner.device.apply_device_name();
            info!("[Scanner] Started with {}", inner.mode.name());
        }
        scanner
    }

    /// Subscribe to the settings the scanner reacts to.
    fn connect(&self) {
        let mut subscriptions = self.subscriptions.borrow_mut();

        subscriptions.push(self.subscribe(ConfigKey::Mode, |inner| inner.swap_mode()));
        subscriptions.push(self.subscribe(ConfigKey::UserScan, |inner| {
            if inner.config.mode() == ScanModeKind::Autoscan {
                inner.swap_mode();
            }
        }));
        subscriptions.push(self.subscribe(ConfigKey::DeviceName, |inner| {
            inner.device.apply_device_name()
        }));
        subscriptions.push(self.subscribe(ConfigKey::DeviceDetach, |inner| {
            inner.device.apply_detach()
        }));
    }

    fn subscribe(
        &self,
        key: ConfigKey,
        callback: impl Fn(&mut ScannerInner) + 'static,
    ) -> SubscriptionId {
        let weak: Weak<RefCell<ScannerInner>> = Rc::downgrade(&self.inner);
        self.config.subscribe(key, move |key| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match inner.try_borrow_mut() {
                Ok(mut inner) => callback(&mut inner),
                Err(_) => warn!("[Scanner] Busy, dropped {:?} change", key),
            };
        })
    }

    /// Run `f` on the scanner state, then deliver queued activations.
    ///
    /// Configuration notifications raised meanwhile are dispatched after the
    /// state is released.
    fn with_inner<R>(&self, f: impl FnOnce(&mut ScannerInner) -> R) -> Option<R> {
        let _hold = self.config.hold();
        let result = match self.inner.try_borrow_mut() {
            Ok(mut inner) => Some(f(&mut inner)),
            Err(_) => {
                warn!("[Scanner] Re-entrant call ignored");
                None
            }
        };
        self.deliver_activations();
        result
    }

    fn deliver_activations(&self) {
        let keys = std::mem::take(&mut *self.activations.borrow_mut());
        for key in keys {
            self.host.activate(&key);
        }
    }

    pub fn config(&self) -> &Rc<ScanConfig> {
        &self.config
    }

    /// Scan `layer` of `layout` from now on.
    pub fn update_layer(&self, layout: Rc<dyn Layout>, layer: Option<&str>) {
        self.with_inner(|inner| {
            debug!("[Scanner] Layer {:?}", layer);
            inner.mode.set_layer(layout.as_ref(), layer);
            inner.layout = Some(layout);
            inner.layer = layer.map(str::to_owned);
        });
    }

    /// Route an event of the device manager.
    pub fn handle_device_event(&self, event: &DeviceEvent) {
        let prompt = self
            .with_inner(|inner| match inner.device.handle_event(event) {
                DeviceOutcome::Forward => {
                    if let DeviceEvent::Input(input) = event {
                        inner.mode.handle_event(input);
                    }
                    None
                }
                DeviceOutcome::Prompt(device) => Some(device),
                DeviceOutcome::FellBack => {
                    inner.mode.reset();
                    None
                }
                DeviceOutcome::Opened(id) => {
                    debug!("[Scanner] Configured device {} is back", id);
                    None
                }
                DeviceOutcome::Dropped | DeviceOutcome::Ignored => None,
            })
            .flatten();

        if let Some(device) = prompt {
            self.host.new_device_found(&device);
        }
    }

    /// Use `device` for scanning, detached from its master.
    pub fn accept_new_device(&self, device: &DeviceInfo) {
        info!("[Scanner] Using new device {} ({})", device.id, device.name);
        let _hold = self.config.hold();
        self.config.set_device_name(device.identity());
        self.config.set_device_detach(true);
    }

    /// Fire the mode timers due at `now`. Returns whether any fired.
    pub fn fire_timers(&self, now: Instant) -> bool {
        self.with_inner(|inner| inner.mode.fire_due(now)).unwrap_or(false)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner
            .try_borrow()
            .ok()
            .and_then(|inner| inner.mode.next_deadline())
    }

    pub fn mode_name(&self) -> &'static str {
        self.with_mode(ScanMode::name).unwrap_or("")
    }

    /// Inspect the active mode.
    pub fn with_mode<R>(&self, f: impl FnOnce(&ScanMode) -> R) -> Option<R> {
        self.inner.try_borrow().ok().map(|inner| f(&inner.mode))
    }

    pub fn active_device(&self) -> Option<u32> {
        self.inner
            .try_borrow()
            .ok()
            .and_then(|inner| inner.device.active_id())
    }

    /// Devices the user may pick for scanning.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.inner
            .try_borrow()
            .map(|inner| inner.device.list())
            .unwrap_or_default()
    }

    /// Stop listening to configuration, release the device, stop the mode.
    ///
    /// Safe to call more than once.
    pub fn finalize(&self) {
        if self.finalized.replace(true) {
            return;
        }

        for id in self.subscriptions.borrow_mut().drain(..) {
            self.config.unsubscribe(id);
        }

        self.with_inner(|inner| {
            inner.device.finalize();
            inner.mode.finalize();
        });
        self.activations.borrow_mut().clear();
        info!("[Scanner] Finalized");
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Scanner");
        if let Ok(inner) = self.inner.try_borrow() {
            s.field("mode", &inner.mode.name())
                .field("device", &inner.device)
                .field("layer", &inner.layer);
        }
        s.field("finalized", &self.finalized.get()).finish()
    }
}
