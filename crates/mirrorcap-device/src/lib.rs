//! mirrorcap Device
//!
//! Collaborators the capture core talks to, and their ADB-backed implementations:
//!
//! - **Remote execution**: shell commands, background processes and port
//!   forwarding through `adb`.
//! - **Agent probe**: whether the capture agent runs on the device, its
//!   reported display and frame rate, and one-shot screenshots.
//! - **Rotation watcher**: live orientation events from the watcher package.

mod adb;
mod probe;
mod rotation;
mod traits;

pub use adb::{AdbExecutor, AdbProcess};
pub use probe::{AgentInfo, AgentInfoProbe, AgentScreenshot};
pub use rotation::{parse_orientation, RotationWatcher, WATCHER_PACKAGE};
pub use traits::{
    AgentProbe, ChannelOrientationSource, DisplayInfoProvider, OrientationSource, RemoteExecutor,
    RemoteProcess, ScreenshotFallback, StaticDisplayInfo,
};
