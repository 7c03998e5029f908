/*!
 * Switch Scanner Library
 *
 * Switch scanning for on-screen keyboards: highlights groups of keys in
 * turn and lets one to five physical switches select and press them.
 */

pub mod chunker;
pub mod config;
pub mod device;
pub mod layout;
pub mod mode;
pub mod runtime;
pub mod scanner;
pub mod timer;

// Re-export commonly used types
pub use chunker::{Chunk, ChunkStrategy, Chunker};
pub use config::{ConfigError, ConfigKey, ScanConfig, ScanModeKind, ScannerSettings};
pub use device::{DeviceEvent, DeviceInfo, DeviceManager, InputEvent, InputKind, ScanDevice};
pub use layout::{Key, Layout, LayoutGroup, LayoutTree, Rect, ScanKey};
pub use mode::{ScanAction, ScanHost, ScanMode};
pub use runtime::ScanLoop;
pub use scanner::Scanner;
pub use timer::{Repeat, ScanTimer};

#[cfg(target_os = "linux")]
pub use device::XInputCli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `default_directive`. Does nothing if a subscriber
/// is already installed.
pub fn init_tracing(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
