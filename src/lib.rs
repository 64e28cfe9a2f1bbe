//! mirrorcap - Live Android screen streaming over the minicap socket protocol
//!
//! Launches the capture agent on a device, decodes its JPEG frame stream and
//! hands frames to consumers, restarting the agent whenever the screen
//! rotates.
//!
//! [`AdbCapture`] wires the ADB-backed collaborators into a [`Supervisor`];
//! the member crates are re-exported for callers that bring their own.

pub use mirrorcap_core as core;
pub use mirrorcap_device as device;
pub use mirrorcap_stream as stream;

pub use mirrorcap_core::{CaptureConfig, Error, Frame, Orientation, Result};
pub use mirrorcap_stream::{FrameFeed, SampledFeed, Supervisor, SupervisorState};

use mirrorcap_core::JpegCodec;
use mirrorcap_device::{AdbExecutor, AgentInfoProbe, AgentScreenshot, RotationWatcher};
use mirrorcap_stream::Collaborators;
use std::sync::Arc;
use tracing::info;

/// A supervisor driven by the device's rotation watcher, all over `adb`
pub struct AdbCapture {
    supervisor: Supervisor,
    watcher: RotationWatcher,
}

impl AdbCapture {
    /// Build ADB-backed collaborators for `adb`
    pub fn collaborators(adb: &AdbExecutor, config: &CaptureConfig) -> Collaborators {
        let executor = Arc::new(adb.clone());
        let codec = Arc::new(JpegCodec);
        let probe = Arc::new(AgentInfoProbe::new(executor.clone(), config.clone()));
        let screenshot = AgentScreenshot::new(
            executor.clone(),
            probe.clone(),
            codec.clone(),
            config.clone(),
        );

        Collaborators {
            executor,
            display: probe.clone(),
            probe,
            codec,
            screenshot: Some(Arc::new(screenshot)),
        }
    }

    /// Create an idle capture for the device with `serial` (or the only one attached)
    pub fn new(serial: Option<String>, config: CaptureConfig) -> Result<Self> {
        Self::with_executor(AdbExecutor::new(serial), config)
    }

    /// Like [`AdbCapture::new`], but first checks that `adb` runs and the
    /// device is online, pinning the serial when only one device is attached
    pub async fn connect(serial: Option<String>, config: CaptureConfig) -> Result<Self> {
        let adb = AdbExecutor::new(serial).resolve_device().await?;
        Self::with_executor(adb, config)
    }

    fn with_executor(adb: AdbExecutor, config: CaptureConfig) -> Result<Self> {
        let supervisor = Supervisor::new(config.clone(), Self::collaborators(&adb, &config))?;
        Ok(Self {
            supervisor,
            watcher: RotationWatcher::new(adb),
        })
    }

    /// Start the rotation watcher and stream frames once it reports an orientation
    pub async fn start(&mut self) -> Result<FrameFeed> {
        let feed = self.supervisor.capture(&mut self.watcher).await?;
        info!("Capture started at {:?}", self.supervisor.orientation());
        Ok(feed)
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// Close the supervisor and stop the rotation watcher
    pub async fn close(&mut self) -> Result<()> {
        let result = self.supervisor.close().await;
        self.watcher.stop();
        result
    }
}
