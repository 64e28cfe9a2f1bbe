//! Collaborator interfaces consumed by the capture core

use async_trait::async_trait;
use mirrorcap_core::{DisplayInfo, Frame, Orientation, Result};
use tokio::sync::mpsc;

/// A process started on the device that keeps running in the background
pub trait RemoteProcess: Send {
    /// Ask the process to terminate. Succeeds if it is already gone.
    fn terminate(&mut self) -> Result<()>;
}

/// Runs commands on the device and manages port forwarding
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command and return its textual output
    async fn run_shell(&self, cmd: &str) -> Result<String>;

    /// Run a shell command and return its raw stdout
    async fn exec_out(&self, cmd: &str) -> Result<Vec<u8>>;

    /// Start a long-running shell command
    async fn run_background(&self, cmd: &str) -> Result<Box<dyn RemoteProcess>>;

    /// Map `local_port` on the host to a device socket
    async fn forward(&self, local_port: u16, remote_socket: &str) -> Result<()>;

    /// Remove a mapping created by [`forward`](Self::forward)
    async fn remove_forward(&self, local_port: u16) -> Result<()>;

    /// Kill every device process whose `ps` line mentions `name`, returning how many were signalled
    async fn kill_process(&self, name: &str) -> Result<usize> {
        let out = self.run_shell("ps").await?;
        let pids = parse_ps_pids(&out, name);
        for pid in &pids {
            self.run_shell(&format!("kill -9 {}", pid)).await?;
        }
        Ok(pids.len())
    }
}

/// PIDs of `ps` rows mentioning `name`, using the header to locate the PID column
fn parse_ps_pids(out: &str, name: &str) -> Vec<String> {
    let mut lines = out.lines().filter(|l| !l.trim().is_empty());
    let pid_column = match lines
        .next()
        .and_then(|header| header.split_whitespace().position(|col| col == "PID"))
    {
        Some(idx) => idx,
        None => return Vec::new(),
    };

    lines
        .filter(|line| line.contains(name))
        .filter_map(|line| line.split_whitespace().nth(pid_column))
        .map(str::to_string)
        .collect()
}

/// Supplies display metadata
#[async_trait]
pub trait DisplayInfoProvider: Send + Sync {
    async fn display_info(&self) -> Result<DisplayInfo>;
}

/// Reports whether the capture agent can run on the device
#[async_trait]
pub trait AgentProbe: Send + Sync {
    async fn is_supported(&self) -> bool;
}

/// Live source of orientation changes
#[async_trait]
pub trait OrientationSource: Send {
    /// Start watching; events arrive on the returned channel until it closes
    async fn watch(&mut self) -> Result<mpsc::Receiver<Orientation>>;
}

/// Captures a single screenshot without a running stream
#[async_trait]
pub trait ScreenshotFallback: Send + Sync {
    async fn take_screenshot(&self) -> Result<Frame>;
}

/// Display provider returning fixed metadata
#[derive(Debug, Clone, Copy)]
pub struct StaticDisplayInfo(pub DisplayInfo);

#[async_trait]
impl DisplayInfoProvider for StaticDisplayInfo {
    async fn display_info(&self) -> Result<DisplayInfo> {
        Ok(self.0)
    }
}

/// Orientation source fed by the caller through a channel
pub struct ChannelOrientationSource {
    rx: Option<mpsc::Receiver<Orientation>>,
}

impl ChannelOrientationSource {
    /// Create a source and the sender used to push events into it
    pub fn new(buffer: usize) -> (mpsc::Sender<Orientation>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx: Some(rx) })
    }
}

#[async_trait]
impl OrientationSource for ChannelOrientationSource {
    async fn watch(&mut self) -> Result<mpsc::Receiver<Orientation>> {
        self.rx
            .take()
            .ok_or_else(|| mirrorcap_core::Error::InvalidState("orientation source already watched".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_watches_once() {
        let (tx, mut source) = ChannelOrientationSource::new(4);
        let mut rx = source.watch().await.unwrap();
        tx.send(Orientation::Landscape).await.unwrap();
        assert_eq!(rx.recv().await, Some(Orientation::Landscape));
        assert!(source.watch().await.is_err());
    }

    #[test]
    fn test_parse_ps_pids() {
        let out = "USER     PID   PPID  VSIZE  RSS     WCHAN    PC        NAME\n\
                   root      1     0     8904   784   ffffffff 00000000 S /init\n\
                   shell     4321  4300  10284  2860  ffffffff 00000000 S /data/local/tmp/minicap\n\
                   shell     4400  4300  10284  2860  ffffffff 00000000 S minicap\n";
        assert_eq!(parse_ps_pids(out, "minicap"), vec!["4321", "4400"]);
        assert!(parse_ps_pids("", "minicap").is_empty());
        assert!(parse_ps_pids("no header here\n1 2 minicap", "minicap").is_empty());
    }

    #[tokio::test]
    async fn test_static_display_info() {
        let info = DisplayInfo::new(720, 1280, 2.0, Orientation::Portrait);
        let provider = StaticDisplayInfo(info);
        assert_eq!(provider.display_info().await.unwrap(), info);
    }
}
