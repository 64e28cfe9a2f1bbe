//! ADB-backed command execution
//!
//! Runs shell commands on an Android device, starts background processes and
//! manages `adb forward` mappings so the host can reach device-local sockets.

use crate::traits::{RemoteExecutor, RemoteProcess};
use async_trait::async_trait;
use mirrorcap_core::{Error, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Marker appended to shell commands to recover the remote exit status
const STATUS_MARKER: &str = "; echo :$?";

/// Executes commands on one device through the `adb` binary
#[derive(Debug, Clone)]
pub struct AdbExecutor {
    serial: Option<String>,
    adb_path: String,
}

impl AdbExecutor {
    /// Create an executor for the device with `serial` (or the only attached device)
    pub fn new(serial: Option<String>) -> Self {
        Self {
            serial,
            adb_path: "adb".to_string(),
        }
    }

    /// Use a specific `adb` binary
    pub fn with_adb_path(mut self, path: impl Into<String>) -> Self {
        self.adb_path = path.into();
        self
    }

    /// Device serial, if pinned
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let description = format!("adb {}", args.join(" "));
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| Error::remote_exec(&description, format!("failed to run adb: {}", e)))?;

        if !output.status.success() {
            return Err(Error::remote_exec(
                description,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }

    /// Whether the `adb` binary can be run at all
    pub async fn is_available(&self) -> bool {
        Command::new(&self.adb_path)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }

    /// Serials of attached devices that are online
    pub async fn list_devices(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.adb_path)
            .arg("devices")
            .output()
            .await
            .map_err(|e| Error::remote_exec("adb devices", e.to_string()))?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Resolve the device this executor talks to and pin its serial
    pub async fn resolve_device(mut self) -> Result<Self> {
        if !self.is_available().await {
            return Err(Error::NotFound(format!("adb binary `{}`", self.adb_path)));
        }
        let online = self.list_devices().await?;
        let serial = select_device(&online, self.serial.as_deref())?;
        info!("ADB: Using device {} ({} online)", serial, online.len());
        self.serial = Some(serial);
        Ok(self)
    }

    /// Start a shell command with stdout piped back to the caller
    pub fn spawn_piped(&self, cmd: &str) -> Result<Child> {
        self.command()
            .args(["shell", cmd])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::remote_exec(format!("adb shell {}", cmd), e.to_string()))
    }
}

#[async_trait]
impl RemoteExecutor for AdbExecutor {
    async fn run_shell(&self, cmd: &str) -> Result<String> {
        let script = format!("{}{}", cmd, STATUS_MARKER);
        let stdout = self.run(&["shell", &script]).await?;
        let (output, status) = split_exit_status(&String::from_utf8_lossy(&stdout));

        match status {
            Some(0) => Ok(output),
            Some(code) => Err(Error::remote_exec(
                format!("adb shell {}", cmd),
                format!("exit status {}", code),
            )),
            None => Err(Error::remote_exec(
                format!("adb shell {}", cmd),
                "missing exit status",
            )),
        }
    }

    async fn exec_out(&self, cmd: &str) -> Result<Vec<u8>> {
        self.run(&["exec-out", cmd]).await
    }

    async fn run_background(&self, cmd: &str) -> Result<Box<dyn RemoteProcess>> {
        let child = self
            .command()
            .args(["shell", cmd])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::remote_exec(format!("adb shell {}", cmd), e.to_string()))?;

        debug!("ADB: Started background process: {}", cmd);
        Ok(Box::new(AdbProcess { child }))
    }

    async fn forward(&self, local_port: u16, remote_socket: &str) -> Result<()> {
        self.run(&["forward", &format!("tcp:{}", local_port), remote_socket])
            .await?;
        info!("ADB: Forwarding enabled (host:{} -> {})", local_port, remote_socket);
        Ok(())
    }

    async fn remove_forward(&self, local_port: u16) -> Result<()> {
        if let Err(e) = self
            .run(&["forward", "--remove", &format!("tcp:{}", local_port)])
            .await
        {
            warn!("ADB: Failed to remove forwarding: {}", e);
            return Err(e);
        }
        info!("ADB: Forwarding removed (host:{})", local_port);
        Ok(())
    }
}

/// Host-side handle of an `adb shell` process
pub struct AdbProcess {
    child: Child,
}

impl RemoteProcess for AdbProcess {
    fn terminate(&mut self) -> Result<()> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("ADB: Background process already exited: {}", status);
            return Ok(());
        }
        self.child.start_kill().map_err(Error::from)
    }
}

/// Split shell output produced with [`STATUS_MARKER`] into output and exit status
fn split_exit_status(stdout: &str) -> (String, Option<i32>) {
    match stdout.rfind(':') {
        Some(idx) => {
            let status = stdout[idx + 1..].trim().parse().ok();
            (stdout[..idx].to_string(), status)
        }
        None => (stdout.to_string(), None),
    }
}

/// Parse `adb devices` output into the serials of ready devices
fn parse_device_list(stdout: &str) -> Vec<String> {
    // first line is the "List of devices attached" banner
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            match (columns.next(), columns.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Pick `wanted` among `online`, or the only online device when none is named
fn select_device(online: &[String], wanted: Option<&str>) -> Result<String> {
    match (wanted, online) {
        (Some(serial), _) if online.iter().any(|s| s == serial) => Ok(serial.to_string()),
        (Some(serial), _) => Err(Error::NotFound(format!("device {}", serial))),
        (None, [only]) => Ok(only.clone()),
        (None, []) => Err(Error::NotFound("no online device".into())),
        (None, _) => Err(Error::InvalidState(format!(
            "{} devices online, pick one by serial",
            online.len()
        ))),
    }
}
