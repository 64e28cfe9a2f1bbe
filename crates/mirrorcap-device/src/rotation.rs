//! Orientation events from the on-device rotation watcher
//!
//! The watcher package prints one rotation per line on stdout whenever the
//! display rotates. Lines are parsed and forwarded over an mpsc channel.

use crate::adb::AdbExecutor;
use crate::traits::{OrientationSource, RemoteExecutor};
use async_trait::async_trait;
use mirrorcap_core::{Error, Orientation, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Package name of the rotation watcher
pub const WATCHER_PACKAGE: &str = "jp.co.cyberagent.stf.rotationwatcher";

/// Orientation source backed by the rotation watcher package
pub struct RotationWatcher {
    adb: AdbExecutor,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl RotationWatcher {
    pub fn new(adb: AdbExecutor) -> Self {
        Self {
            adb,
            child: None,
            reader: None,
        }
    }

    /// Whether the watcher process has been started
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    async fn package_path(&self) -> Result<String> {
        let out = self
            .adb
            .run_shell(&format!("pm path {}", WATCHER_PACKAGE))
            .await?;
        parse_package_path(&out)
            .ok_or_else(|| Error::NotFound(format!("package {}", WATCHER_PACKAGE)))
    }

    /// Kill the watcher process and its reader task
    pub fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Rotation watcher already gone: {}", e);
            }
        }
    }
}

#[async_trait]
impl OrientationSource for RotationWatcher {
    async fn watch(&mut self) -> Result<mpsc::Receiver<Orientation>> {
        self.stop();

        let path = self.package_path().await?;
        let cmd = format!(
            "CLASSPATH={} app_process /system/bin {}.RotationWatcher",
            path, WATCHER_PACKAGE
        );
        let mut child = self.adb.spawn_piped(&cmd)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::remote_exec(&cmd, "stdout not captured"))?;

        let (tx, rx) = mpsc::channel(16);
        self.reader = Some(tokio::spawn(forward_orientations(stdout, tx)));
        self.child = Some(child);

        info!("Rotation watcher started");
        Ok(rx)
    }
}

impl Drop for RotationWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read watcher output line by line and forward parsed orientations
async fn forward_orientations<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<Orientation>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_orientation(&line) {
                    Some(orientation) => {
                        debug!("Orientation event: {}", orientation);
                        if tx.send(orientation).await.is_err() {
                            break;
                        }
                    }
                    None => warn!("Ignoring unparseable rotation line: {:?}", line),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Rotation watcher read error: {}", e);
                break;
            }
        }
    }
    debug!("Rotation watcher output closed");
}

/// Parse a rotation line, accepting either a code (0..=3) or degrees
pub fn parse_orientation(line: &str) -> Option<Orientation> {
    let value: u32 = line.trim().parse().ok()?;
    if value <= 3 {
        Orientation::from_code(value).ok()
    } else {
        Orientation::from_degrees(value).ok()
    }
}

/// Extract the APK path from `pm path` output (`package:/data/app/.../base.apk`)
fn parse_package_path(out: &str) -> Option<String> {
    let line = out.lines().find(|l| l.trim().starts_with("package:"))?;
    let path = line.trim().trim_start_matches("package:").trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}
