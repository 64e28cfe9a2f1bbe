//! Capture agent capability probe and one-shot screenshots

use crate::traits::{AgentProbe, DisplayInfoProvider, RemoteExecutor, ScreenshotFallback};
use async_trait::async_trait;
use mirrorcap_core::{
    CaptureConfig, CaptureParams, DisplayInfo, Error, Frame, ImageCodec, Orientation, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Display description printed by the agent with `-i`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub density: Option<f32>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub rotation: Option<u32>,
    #[serde(default)]
    pub secure: Option<bool>,
}

impl AgentInfo {
    /// Parse agent output, skipping any log lines around the JSON object
    pub fn parse(output: &str) -> Result<Self> {
        let start = output
            .find('{')
            .ok_or_else(|| Error::NotFound("agent info JSON".into()))?;
        let end = output
            .rfind('}')
            .filter(|end| *end > start)
            .ok_or_else(|| Error::NotFound("agent info JSON".into()))?;
        Ok(serde_json::from_str(&output[start..=end])?)
    }
}

/// Queries the capture agent on the device
pub struct AgentInfoProbe {
    executor: Arc<dyn RemoteExecutor>,
    config: CaptureConfig,
}

impl AgentInfoProbe {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: CaptureConfig) -> Self {
        Self { executor, config }
    }

    async fn raw_info(&self) -> Result<String> {
        self.executor
            .run_shell(&format!("{} -i", self.config.agent_command()))
            .await
    }

    /// Display description reported by the agent
    pub async fn info(&self) -> Result<AgentInfo> {
        AgentInfo::parse(&self.raw_info().await?)
    }

    /// Frame rate the agent reports for this display
    pub async fn fps(&self) -> Result<u32> {
        let info = self.info().await?;
        info.fps
            .map(|fps| fps.round() as u32)
            .ok_or_else(|| Error::NotFound("fps in agent info".into()))
    }
}

#[async_trait]
impl AgentProbe for AgentInfoProbe {
    async fn is_supported(&self) -> bool {
        match self.raw_info().await {
            Ok(out) => out.contains("width") && out.contains("height"),
            Err(e) => {
                debug!("Agent probe failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl DisplayInfoProvider for AgentInfoProbe {
    async fn display_info(&self) -> Result<DisplayInfo> {
        let info = self.info().await?;
        let orientation = match info.rotation {
            Some(degrees) => Orientation::from_degrees(degrees).unwrap_or_else(|_| {
                warn!("Agent reported unknown rotation {}, assuming portrait", degrees);
                Orientation::Portrait
            }),
            None => Orientation::Portrait,
        };
        Ok(DisplayInfo::new(
            info.width,
            info.height,
            info.density.unwrap_or(1.0),
            orientation,
        ))
    }
}

/// Takes single screenshots by running the agent in one-shot mode
pub struct AgentScreenshot {
    executor: Arc<dyn RemoteExecutor>,
    display: Arc<dyn DisplayInfoProvider>,
    codec: Arc<dyn ImageCodec>,
    config: CaptureConfig,
}

impl AgentScreenshot {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        display: Arc<dyn DisplayInfoProvider>,
        codec: Arc<dyn ImageCodec>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            executor,
            display,
            codec,
            config,
        }
    }
}

#[async_trait]
impl ScreenshotFallback for AgentScreenshot {
    async fn take_screenshot(&self) -> Result<Frame> {
        let info = self.display.display_info().await?;
        let params = CaptureParams::new(&info, info.orientation, self.config.scale)?;
        let cmd = format!("{} -P {} -s 2>/dev/null", self.config.agent_command(), params);

        let bytes = self.executor.exec_out(&cmd).await?;
        debug!("Screenshot captured: {} bytes", bytes.len());
        let image = self.codec.decode(&bytes)?;
        Ok(Frame::new(image, 0))
    }
}
