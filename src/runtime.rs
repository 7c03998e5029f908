//! Scan Loop
//!
//! Drives a [`Scanner`] on a tokio current-thread runtime: device events
//! from a channel, the mode timers and an optional poll of the device
//! hierarchy, one at a time in arrival order.

use std::future::{pending, Future};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::device::{DeviceEvent, DeviceManager};
use crate::scanner::Scanner;

/// Event loop of one scanner.
///
/// The loop holds `Rc`s, run it with `block_on` of a current-thread runtime
/// or inside a `LocalSet`.
pub struct ScanLoop {
    scanner: Rc<Scanner>,
    events: UnboundedReceiver<DeviceEvent>,
    hierarchy: Option<(Rc<dyn DeviceManager>, Duration)>,
}

impl ScanLoop {
    pub fn new(scanner: Rc<Scanner>, events: UnboundedReceiver<DeviceEvent>) -> Self {
        Self {
            scanner,
            events,
            hierarchy: None,
        }
    }

    /// Poll `manager` for added and removed devices every `period`.
    pub fn with_hierarchy_poll(mut self, manager: Rc<dyn DeviceManager>, period: Duration) -> Self {
        self.hierarchy = Some((manager, period));
        self
    }

    /// Run until `shutdown` completes, then finalize the scanner.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let Self {
            scanner,
            mut events,
            hierarchy,
        } = self;
        tokio::pin!(shutdown);

        let mut poll = hierarchy.as_ref().map(|(_, period)| {
            let mut poll = interval(*period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            poll
        });
        let mut events_open = true;

        info!("[ScanLoop] Started");
        loop {
            let deadline = scanner.next_deadline();
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                event = events.recv(), if events_open => match event {
                    Some(event) => scanner.handle_device_event(&event),
                    None => {
                        debug!("[ScanLoop] Event channel closed");
                        events_open = false;
                    }
                },

                _ = sleep_until_deadline(deadline) => {
                    scanner.fire_timers(Instant::now());
                }

                _ = tick(&mut poll) => {
                    if let Some((manager, _)) = &hierarchy {
                        poll_hierarchy(&scanner, manager.as_ref());
                    }
                }
            }
        }

        scanner.finalize();
        info!("[ScanLoop] Stopped");
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(poll) => {
            poll.tick().await;
        }
        None => pending().await,
    }
}

fn poll_hierarchy(scanner: &Scanner, manager: &dyn DeviceManager) {
    match manager.refresh() {
        Ok(changes) => {
            for event in changes {
                debug!("[ScanLoop] Hierarchy change {:?}", event);
                scanner.handle_device_event(&event);
            }
        }
        Err(e) => warn!("[ScanLoop] Failed to refresh devices: {:#}", e),
    }
}
