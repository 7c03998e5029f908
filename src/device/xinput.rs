//! XInput Device Backend
//!
//! Drives the X input hierarchy through the `xinput` command line tool:
//! `xinput list` for enumeration, `xinput float` / `xinput reattach` for
//! detaching, and one `xinput test <id>` child per selected device whose
//! output is turned into switch events. Master devices cannot be opened by
//! `xinput test`, their raw events are read from `xinput test-xi2 --root`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::{DeviceEvent, DeviceInfo, DeviceManager, DeviceUse, EventSelection, InputEvent, InputKind};

/// Device manager backed by the `xinput` tool.
pub struct XInputCli {
    events: UnboundedSender<DeviceEvent>,
    list_re: Regex,
    test_re: Regex,
    xi2_header_re: Regex,
    xi2_detail_re: Regex,
    known: RefCell<Vec<DeviceInfo>>,
    watchers: RefCell<HashMap<u32, Child>>,
}

impl XInputCli {
    /// Create the backend. Input and hierarchy events go to `events`.
    pub fn new(events: UnboundedSender<DeviceEvent>) -> Result<Self> {
        let list_re = Regex::new(
            r"^[^\p{L}\p{N}(]*(?P<name>.*?)\s+id=\d+\s+\[(?P<kind>master\s+pointer|master\s+keyboard|slave\s+pointer|slave\s+keyboard|floating\s+slave)\s*(?:\((?P<attachment>\d+)\))?\s*\]",
        )
        .context("Failed to compile xinput list pattern")?;
        let test_re = Regex::new(r"^\s*(?P<class>button|key)\s+(?P<state>press|release)\s+(?P<detail>\d+)")
            .context("Failed to compile xinput test pattern")?;
        let xi2_header_re = Regex::new(r"^EVENT type \d+ \((?P<name>\w+)\)")
            .context("Failed to compile xinput test-xi2 event pattern")?;
        let xi2_detail_re = Regex::new(r"^\s+detail:\s*(?P<detail>\d+)")
            .context("Failed to compile xinput test-xi2 detail pattern")?;

        Ok(Self {
            events,
            list_re,
            test_re,
            xi2_header_re,
            xi2_detail_re,
            known: RefCell::new(Vec::new()),
            watchers: RefCell::new(HashMap::new()),
        })
    }

    /// Run `xinput list` and parse the device hierarchy.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        debug!("[XInput] Running xinput list");

        let output = Command::new("xinput")
            .arg("list")
            .output()
            .context("Failed to run xinput list")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("xinput list failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(self.parse_list(&stdout))
    }

    /// Parse the output of `xinput list`.
    pub fn parse_list(&self, text: &str) -> Vec<DeviceInfo> {
        text.lines().filter_map(|line| self.parse_list_line(line)).collect()
    }

    fn parse_list_line(&self, line: &str) -> Option<DeviceInfo> {
        let id = extract_device_id(line)?;
        let caps = self.list_re.captures(line)?;

        let kind = caps["kind"].split_whitespace().collect::<Vec<_>>().join(" ");
        let use_kind = match kind.as_str() {
            "master pointer" => DeviceUse::MasterPointer,
            "master keyboard" => DeviceUse::MasterKeyboard,
            "slave pointer" => DeviceUse::SlavePointer,
            "slave keyboard" => DeviceUse::SlaveKeyboard,
            _ => DeviceUse::FloatingSlave,
        };

        // for masters the number in parentheses is the paired master
        let master_id = match use_kind {
            DeviceUse::SlavePointer | DeviceUse::SlaveKeyboard => caps
                .name("attachment")
                .and_then(|m| m.as_str().parse().ok()),
            _ => None,
        };

        Some(DeviceInfo::new(caps["name"].trim(), id, use_kind, master_id))
    }

    /// Parse one line of `xinput test` output.
    pub fn parse_test_line(&self, device_id: u32, line: &str) -> Option<InputEvent> {
        parse_test_line(&self.test_re, device_id, line)
    }

    /// Parser for the output of the watcher of `device`
    fn output_parser(&self, device: &DeviceInfo) -> OutputParser {
        if device.is_master() {
            OutputParser::Xi2 {
                header: self.xi2_header_re.clone(),
                detail: self.xi2_detail_re.clone(),
                pending: None,
            }
        } else {
            OutputParser::Test(self.test_re.clone())
        }
    }

    fn run_xinput(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("xinput")
            .args(args)
            .output()
            .with_context(|| format!("Failed to run xinput {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("xinput {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(())
    }
}

impl DeviceManager for XInputCli {
    fn devices(&self) -> Vec<DeviceInfo> {
        match self.list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("[XInput] {:#}", e);
                self.known.borrow().clone()
            }
        }
    }

    fn select_events(&self, device: &DeviceInfo, selection: EventSelection) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .context("xinput test needs a running tokio runtime")?;
        let _guard = handle.enter();

        let id = device.id.to_string();
        let args = if device.is_master() {
            vec!["test-xi2", "--root", id.as_str()]
        } else {
            vec!["test", id.as_str()]
        };
        let mut child = tokio::process::Command::new("xinput")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run xinput {}", args.join(" ")))?;
        let stdout = child
            .stdout
            .take()
            .context("xinput test has no stdout")?;

        let parser = self.output_parser(device);
        handle.spawn(forward_test_output(device.id, stdout, parser, self.events.clone()));

        info!(
            "[XInput] Watching {:?} of device {} ({})",
            selection, device.id, device.name
        );
        // replacing an old watcher drops and kills it
        self.watchers.borrow_mut().insert(device.id, child);
        Ok(())
    }

    fn unselect_events(&self, device_id: u32) -> Result<()> {
        if let Some(mut child) = self.watchers.borrow_mut().remove(&device_id) {
            child
                .start_kill()
                .with_context(|| format!("Failed to stop xinput test {}", device_id))?;
        }
        Ok(())
    }

    fn attach(&self, device_id: u32, master_id: u32) -> Result<()> {
        let (device, master) = (device_id.to_string(), master_id.to_string());
        self.run_xinput(&["reattach", device.as_str(), master.as_str()])
    }

    fn detach(&self, device_id: u32) -> Result<()> {
        let device = device_id.to_string();
        self.run_xinput(&["float", device.as_str()])
    }

    fn refresh(&self) -> Result<Vec<DeviceEvent>> {
        let devices = self.list_devices()?;
        let mut known = self.known.borrow_mut();
        // the first listing only establishes the baseline
        let events = if known.is_empty() {
            Vec::new()
        } else {
            diff_devices(&known, &devices)
        };
        *known = devices;
        Ok(events)
    }
}

/// Read `xinput test` output and forward switch events until the child exits.
async fn forward_test_output(
    device_id: u32,
    stdout: ChildStdout,
    mut parser: OutputParser,
    events: UnboundedSender<DeviceEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(event) = parser.parse(device_id, &line) else {
                    continue;
                };
                if events.send(DeviceEvent::Input(event)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("[XInput] Reading xinput test {} failed: {}", device_id, e);
                break;
            }
        }
    }
    debug!("[XInput] Stopped watching device {}", device_id);
}

/// Turns watcher output into switch events.
enum OutputParser {
    /// `xinput test`: one event per line
    Test(Regex),
    /// `xinput test-xi2`: an `EVENT type` header, the detail a few lines below
    Xi2 {
        header: Regex,
        detail: Regex,
        pending: Option<InputKind>,
    },
}

impl OutputParser {
    fn parse(&mut self, device_id: u32, line: &str) -> Option<InputEvent> {
        match self {
            Self::Test(test_re) => parse_test_line(test_re, device_id, line),
            Self::Xi2 {
                header,
                detail,
                pending,
            } => {
                if let Some(caps) = header.captures(line) {
                    *pending = raw_event_kind(&caps["name"]);
                    return None;
                }
                let caps = detail.captures(line)?;
                let kind = pending.take()?;
                Some(InputEvent {
                    device_id,
                    kind,
                    detail: caps["detail"].parse().ok()?,
                })
            }
        }
    }
}

/// Raw events reach the root window whatever window is under the pointer
fn raw_event_kind(name: &str) -> Option<InputKind> {
    match name {
        "RawButtonPress" => Some(InputKind::ButtonPress),
        "RawButtonRelease" => Some(InputKind::ButtonRelease),
        "RawKeyPress" => Some(InputKind::KeyPress),
        "RawKeyRelease" => Some(InputKind::KeyRelease),
        _ => None,
    }
}

fn parse_test_line(test_re: &Regex, device_id: u32, line: &str) -> Option<InputEvent> {
    let caps = test_re.captures(line)?;
    let kind = match (&caps["class"], &caps["state"]) {
        ("button", "press") => InputKind::ButtonPress,
        ("button", _) => InputKind::ButtonRelease,
        (_, "press") => InputKind::KeyPress,
        _ => InputKind::KeyRelease,
    };
    Some(InputEvent {
        device_id,
        kind,
        detail: caps["detail"].parse().ok()?,
    })
}

/// Hierarchy changes between two device listings.
pub fn diff_devices(old: &[DeviceInfo], new: &[DeviceInfo]) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    for device in old {
        if !new.iter().any(|d| d.id == device.id) {
            events.push(DeviceEvent::Removed(device.id));
        }
    }
    for device in new {
        match old.iter().find(|d| d.id == device.id) {
            None => events.push(DeviceEvent::Added(device.id)),
            Some(before) if before != device => events.push(DeviceEvent::Changed(device.id)),
            Some(_) => {}
        }
    }

    events
}

/// Extract the device id from an xinput list line
/// Example: "⎜   ↳ Name id=15 [slave  pointer  (2)]"
fn extract_device_id(line: &str) -> Option<u32> {
    line.split_whitespace()
        .find_map(|part| part.strip_prefix("id="))
        .and_then(|id| id.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const LISTING: &str = "\
⎡ Virtual core pointer                    \tid=2\t[master pointer  (3)]
⎜   ↳ Virtual core XTEST pointer              \tid=4\t[slave  pointer  (2)]
⎜   ↳ SynPS/2 Synaptics TouchPad              \tid=11\t[slave  pointer  (2)]
⎣ Virtual core keyboard                   \tid=3\t[master keyboard (2)]
    ↳ AT Translated Set 2 keyboard            \tid=13\t[slave  keyboard (3)]
∼ Foot Switch                             \tid=12\t[floating slave]
";

    fn backend() -> XInputCli {
        let (tx, _rx) = mpsc::unbounded_channel();
        XInputCli::new(tx).unwrap()
    }

    #[test]
    fn test_extract_device_id() {
        let line = "⎜   ↳ AT Translated Set 2 keyboard id=13";
        assert_eq!(extract_device_id(line), Some(13));
    }

    #[test]
    fn test_extract_device_id_with_properties() {
        let line = "⎜   ↳ SynPS/2 Synaptics TouchPad id=11 [slave pointer (2)]";
        assert_eq!(extract_device_id(line), Some(11));
        assert_eq!(extract_device_id("no id here"), None);
    }

    #[test]
    fn test_parse_list() {
        let devices = backend().parse_list(LISTING);
        assert_eq!(devices.len(), 6);

        let vcp = &devices[0];
        assert_eq!(vcp.name, "Virtual core pointer");
        assert_eq!(vcp.use_kind, DeviceUse::MasterPointer);
        assert_eq!(vcp.master_id, None);

        let touchpad = &devices[2];
        assert_eq!(touchpad.name, "SynPS/2 Synaptics TouchPad");
        assert_eq!(touchpad.id, 11);
        assert_eq!(touchpad.master_id, Some(2));

        let keyboard = &devices[4];
        assert_eq!(keyboard.use_kind, DeviceUse::SlaveKeyboard);
        assert_eq!(keyboard.master_id, Some(3));

        let switch = &devices[5];
        assert_eq!(switch.name, "Foot Switch");
        assert!(switch.is_floating());
        assert_eq!(switch.identity(), "Foot Switch:5");
    }

    #[test]
    fn test_parse_test_line() {
        let xi = backend();
        assert_eq!(
            xi.parse_test_line(12, "button press   1 "),
            Some(InputEvent {
                device_id: 12,
                kind: InputKind::ButtonPress,
                detail: 1
            })
        );
        assert_eq!(
            xi.parse_test_line(13, "key release 36 ").map(|e| e.kind),
            Some(InputKind::KeyRelease)
        );
        assert_eq!(xi.parse_test_line(12, "motion a[0]=512 a[1]=300"), None);
    }

    #[test]
    fn test_core_pointer_raw_events() {
        let xi = backend();
        let pointer = DeviceInfo::new("Virtual core pointer", 2, DeviceUse::MasterPointer, None);
        let mut parser = xi.output_parser(&pointer);
        let output = "\
EVENT type 17 (RawMotion)
    device: 2 (11)
    detail: 0
EVENT type 15 (RawButtonPress)
    device: 2 (11)
    time: 4721950
    detail: 1
    valuators:
EVENT type 16 (RawButtonRelease)
    device: 2 (11)
    detail: 1
";
        let events: Vec<_> = output
            .lines()
            .filter_map(|line| parser.parse(2, line))
            .collect();
        assert_eq!(
            events,
            vec![
                InputEvent {
                    device_id: 2,
                    kind: InputKind::ButtonPress,
                    detail: 1
                },
                InputEvent {
                    device_id: 2,
                    kind: InputKind::ButtonRelease,
                    detail: 1
                },
            ]
        );

        // slaves keep the line based parser
        let switch = DeviceInfo::new("Foot Switch", 12, DeviceUse::SlavePointer, Some(2));
        let mut parser = xi.output_parser(&switch);
        assert_eq!(parser.parse(12, "button press   3 ").map(|e| e.detail), Some(3));
    }

    #[test]
    fn test_diff_devices() {
        let xi = backend();
        let before = xi.parse_list(LISTING);
        let mut after = before.clone();
        after.retain(|d| d.id != 11);
        after[4].use_kind = DeviceUse::SlavePointer;
        after[4].master_id = Some(2);
        after.push(DeviceInfo::new("Big Red Button", 14, DeviceUse::SlavePointer, Some(2)));

        assert_eq!(
            diff_devices(&before, &after),
            vec![
                DeviceEvent::Removed(11),
                DeviceEvent::Changed(12),
                DeviceEvent::Added(14),
            ]
        );
        assert!(diff_devices(&before, &before).is_empty());
    }

    #[test]
    fn test_select_without_runtime_fails() {
        let xi = backend();
        let device = DeviceInfo::new("Foot Switch", 12, DeviceUse::SlavePointer, Some(2));
        assert!(xi.select_events(&device, EventSelection::Buttons).is_err());
        assert!(xi.unselect_events(12).is_ok());
    }
}
