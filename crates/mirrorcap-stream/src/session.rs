//! One capture agent run on the device
//!
//! A session launches the agent for a given rotation, forwards its socket to
//! a local port and runs a reader task that decodes frames into the mailbox.
//! The reader reconnects after stream errors until cancelled, closed or out of
//! retry budget.

use crate::mailbox::Mailbox;
use crate::state::SessionPhase;
use mirrorcap_core::{
    CaptureConfig, CaptureParams, DisplayInfo, Error, Frame, FrameReader, ImageCodec, Orientation,
    Result, RetryPolicy,
};
use mirrorcap_device::{
    AgentProbe, DisplayInfoProvider, RemoteExecutor, RemoteProcess, ScreenshotFallback,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Device-side services a capture needs
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn RemoteExecutor>,
    pub display: Arc<dyn DisplayInfoProvider>,
    pub probe: Arc<dyn AgentProbe>,
    pub codec: Arc<dyn ImageCodec>,
    pub screenshot: Option<Arc<dyn ScreenshotFallback>>,
}

struct ReaderTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Agent process, port forward and reader task for one rotation
pub struct CaptureSession {
    deps: Collaborators,
    config: CaptureConfig,
    mailbox: Arc<Mailbox>,
    port: u16,
    display: Option<DisplayInfo>,
    process: Option<Box<dyn RemoteProcess>>,
    forwarding: bool,
    reader: Option<ReaderTask>,
}

impl CaptureSession {
    /// Create an idle session. A configured port of 0 picks a free local port.
    pub fn new(deps: Collaborators, config: CaptureConfig, mailbox: Arc<Mailbox>) -> Result<Self> {
        config.validate()?;
        let port = if config.port == 0 {
            free_port()?
        } else {
            config.port
        };

        Ok(Self {
            deps,
            config,
            mailbox,
            port,
            display: None,
            process: None,
            forwarding: false,
            reader: None,
        })
    }

    /// Local port the agent socket is forwarded to
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn phase(&self) -> SessionPhase {
        self.mailbox.state().phase()
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.mailbox.state().orientation()
    }

    /// Whether an agent is launched and its reader is alive
    pub fn is_running(&self) -> bool {
        self.reader
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Launch the agent for `orientation`, replacing any previous run
    pub async fn start(&mut self, orientation: Orientation) -> Result<()> {
        self.stop().await;

        let state = self.mailbox.state().clone();
        state.set_phase(SessionPhase::Starting);

        if let Err(e) = self.launch(orientation).await {
            error!("Capture session failed to start: {}", e);
            self.stop().await;
            state.set_phase(SessionPhase::Failed);
            return Err(e);
        }
        Ok(())
    }

    async fn launch(&mut self, orientation: Orientation) -> Result<()> {
        if !self.deps.probe.is_supported().await {
            return Err(Error::AgentUnsupported);
        }

        let display = match self.display {
            Some(display) => display,
            None => {
                let display = self.deps.display.display_info().await?.portrait();
                self.display = Some(display);
                display
            }
        };
        let params = CaptureParams::new(&display, orientation, self.config.scale)?;

        let cmd = format!("{} -P {} -S", self.config.agent_command(), params);
        info!("Launching capture agent: {}", params);
        let process = self
            .deps
            .executor
            .run_background(&cmd)
            .await
            .map_err(|e| Error::AgentLaunch(e.to_string()))?;
        self.process = Some(process);

        tokio::time::sleep(self.config.agent_startup_delay()).await;

        self.deps
            .executor
            .forward(self.port, &self.config.remote_socket())
            .await
            .map_err(|e| Error::AgentLaunch(format!("port forward failed: {}", e)))?;
        self.forwarding = true;

        self.mailbox.state().set_orientation(orientation);

        let cancel = CancellationToken::new();
        let reader = FrameLoop {
            addr: format!("{}:{}", self.config.host, self.port),
            mailbox: self.mailbox.clone(),
            codec: self.deps.codec.clone(),
            retry: self.config.retry.clone(),
            max_frame_size: self.config.max_frame_size,
        };
        let handle = tokio::spawn(reader.run(cancel.clone()));
        self.reader = Some(ReaderTask { cancel, handle });

        Ok(())
    }

    /// Stop the reader, terminate the agent and drop the port forward.
    ///
    /// Cleanup failures are logged and otherwise ignored.
    pub async fn stop(&mut self) {
        if let Some(task) = self.reader.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Frame reader task ended abnormally: {}", e);
            }
        }

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.terminate() {
                debug!("Agent process already gone: {}", e);
            }
            match self
                .deps
                .executor
                .kill_process(&self.config.agent_name)
                .await
            {
                Ok(0) => {}
                Ok(n) => debug!("Killed {} lingering agent process(es)", n),
                Err(e) => debug!("Remote agent kill failed: {}", e),
            }
        }

        if self.forwarding {
            self.forwarding = false;
            if let Err(e) = self.deps.executor.remove_forward(self.port).await {
                debug!("Port forward cleanup failed: {}", e);
            }
        }

        let state = self.mailbox.state();
        state.clear_orientation();
        state.set_phase(SessionPhase::Closed);
    }

    /// Stop the current run and start again at `orientation`
    pub async fn restart(&mut self, orientation: Orientation) -> Result<()> {
        info!("Restarting capture session at {}", orientation);
        self.start(orientation).await
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(task) = self.reader.take() {
            task.cancel.cancel();
        }
        if let Some(mut process) = self.process.take() {
            let _ = process.terminate();
        }
    }
}

/// Pick an unused local TCP port
fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

enum ConnectionEnd {
    /// Agent closed the socket on a record boundary
    EndOfStream,
    /// Mailbox closed; stop for good
    MailboxClosed,
}

/// Reconnect-and-decode loop feeding the mailbox
struct FrameLoop {
    addr: String,
    mailbox: Arc<Mailbox>,
    codec: Arc<dyn ImageCodec>,
    retry: RetryPolicy,
    max_frame_size: u32,
}

impl FrameLoop {
    async fn run(self, cancel: CancellationToken) {
        let state = self.mailbox.state().clone();
        let mut failures: u32 = 0;

        loop {
            if self.mailbox.is_closed() {
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.stream_once(&mut failures) => outcome,
            };

            match outcome {
                Ok(ConnectionEnd::MailboxClosed) => break,
                Ok(ConnectionEnd::EndOfStream) => debug!("Agent closed the frame stream"),
                Err(e) if e.is_transient() => debug!("Frame stream interrupted: {}", e),
                Err(e) => warn!("Frame stream error: {}", e),
            }

            failures += 1;
            let delay = match self.retry.delay_for(failures) {
                Some(delay) => delay,
                None => {
                    error!(
                        "Giving up on {} after {} consecutive failures",
                        self.addr, failures
                    );
                    state.set_phase(SessionPhase::Failed);
                    break;
                }
            };

            state.record_reconnect();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Frame reader for {} stopped", self.addr);
    }

    /// One connection: header, then frames until the stream ends or fails
    async fn stream_once(&self, failures: &mut u32) -> Result<ConnectionEnd> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;

        let (header, mut frames) =
            FrameReader::handshake(BufReader::new(stream), self.codec.clone(), self.max_frame_size)
                .await?;

        let state = self.mailbox.state();
        *failures = 0;
        state.set_phase(SessionPhase::Streaming);
        info!(
            "Frame stream v{} from pid {}: {}x{} -> {}x{} at {}",
            header.version,
            header.pid,
            header.real_width,
            header.real_height,
            header.virtual_width,
            header.virtual_height,
            header.orientation
        );

        while let Some(image) = frames.next_image().await? {
            let frame = Frame::new(image, state.next_sequence());
            if !self.mailbox.publish(frame) {
                return Ok(ConnectionEnd::MailboxClosed);
            }
        }
        Ok(ConnectionEnd::EndOfStream)
    }
}
