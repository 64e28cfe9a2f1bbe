//! Fakes for exercising sessions without a device

use crate::session::Collaborators;
use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use mirrorcap_core::{
    CaptureConfig, DisplayInfo, Error, Frame, FrameImage, FrameStreamHeader, JpegCodec,
    Orientation, Result, RetryPolicy, HEADER_LENGTH,
};
use mirrorcap_device::{
    AgentProbe, RemoteExecutor, RemoteProcess, ScreenshotFallback, StaticDisplayInfo,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Single-colour image that needs no codec
struct SolidImage(u32, u32);

impl FrameImage for SolidImage {
    fn width(&self) -> u32 {
        self.0
    }

    fn height(&self) -> u32 {
        self.1
    }

    fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        (x < self.0 && y < self.1).then_some([0, 0, 0, 255])
    }
}

/// Route `tracing` output to the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn solid_frame(sequence: u64) -> Frame {
    Frame::new(Arc::new(SolidImage(4, 4)), sequence)
}

/// Config with no startup delay or jitter, a short retry backoff and a free port
pub fn test_config() -> CaptureConfig {
    CaptureConfig::default()
        .with_agent_startup_delay(Duration::ZERO)
        .with_restart_jitter(Duration::ZERO, Duration::ZERO)
        .with_retry(RetryPolicy {
            max_attempts: Some(50),
            initial_backoff_ms: 1,
            max_backoff_ms: 20,
            multiplier: 2,
        })
}

struct FakeProbe(bool);

#[async_trait]
impl AgentProbe for FakeProbe {
    async fn is_supported(&self) -> bool {
        self.0
    }
}

pub struct FakeScreenshot(pub Frame);

#[async_trait]
impl ScreenshotFallback for FakeScreenshot {
    async fn take_screenshot(&self) -> Result<Frame> {
        Ok(self.0.clone())
    }
}

/// Collaborators for a 1080x1920 portrait display
pub fn collaborators(executor: Arc<FakeExecutor>, supported: bool) -> Collaborators {
    Collaborators {
        executor,
        display: Arc::new(StaticDisplayInfo(DisplayInfo::new(
            1080,
            1920,
            3.0,
            Orientation::Portrait,
        ))),
        probe: Arc::new(FakeProbe(supported)),
        codec: Arc::new(JpegCodec),
        screenshot: None,
    }
}

/// Records commands and process lifecycle instead of touching a device
#[derive(Default)]
pub struct FakeExecutor {
    launches: Mutex<Vec<String>>,
    forwards: Mutex<Vec<u16>>,
    removed: Mutex<Vec<u16>>,
    terminated: Arc<AtomicUsize>,
    fail_launch: AtomicBool,
    fail_forward: AtomicBool,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_launch(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }

    pub fn allow_launch(&self) {
        self.fail_launch.store(false, Ordering::SeqCst);
    }

    pub fn fail_forward(&self) {
        self.fail_forward.store(true, Ordering::SeqCst);
    }

    pub fn launches(&self) -> Vec<String> {
        self.launches.lock().unwrap().clone()
    }

    pub fn forwards(&self) -> Vec<u16> {
        self.forwards.lock().unwrap().clone()
    }

    pub fn removed_forwards(&self) -> Vec<u16> {
        self.removed.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

struct FakeProcess {
    terminated: Arc<AtomicUsize>,
}

impl RemoteProcess for FakeProcess {
    fn terminate(&mut self) -> Result<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn run_shell(&self, _cmd: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn exec_out(&self, _cmd: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn run_background(&self, cmd: &str) -> Result<Box<dyn RemoteProcess>> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(Error::remote_exec(cmd, "device offline"));
        }
        self.launches.lock().unwrap().push(cmd.to_string());
        Ok(Box::new(FakeProcess {
            terminated: self.terminated.clone(),
        }))
    }

    async fn forward(&self, local_port: u16, remote_socket: &str) -> Result<()> {
        if self.fail_forward.load(Ordering::SeqCst) {
            return Err(Error::remote_exec(
                format!("forward tcp:{} {}", local_port, remote_socket),
                "cannot bind",
            ));
        }
        self.forwards.lock().unwrap().push(local_port);
        Ok(())
    }

    async fn remove_forward(&self, local_port: u16) -> Result<()> {
        self.removed.lock().unwrap().push(local_port);
        Ok(())
    }
}

fn jpeg_bytes() -> Vec<u8> {
    let img = ImageBuffer::from_pixel(8, 8, Rgb([10u8, 200, 30]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// Header, `frames` JPEG records, then an undecodable record if `corrupt`
pub fn agent_script(frames: usize, corrupt: bool) -> Vec<u8> {
    let header = FrameStreamHeader {
        version: 1,
        pid: 4321,
        real_width: 1080,
        real_height: 1920,
        virtual_width: 1080,
        virtual_height: 1920,
        orientation: Orientation::Portrait,
        reserved: [0, 0],
    };
    let mut out = header.to_bytes().to_vec();

    let jpeg = jpeg_bytes();
    for _ in 0..frames {
        out.extend_from_slice(&(jpeg.len() as u32).to_le_bytes());
        out.extend_from_slice(&jpeg);
    }
    if corrupt {
        out.extend_from_slice(&4u32.to_le_bytes());
        out.extend_from_slice(b"junk");
    }
    out
}

/// Local listener standing in for the forwarded agent socket.
///
/// Each accepted connection receives the next script and is then held open.
pub struct FakeAgent {
    pub port: u16,
    handle: JoinHandle<()>,
}

impl FakeAgent {
    pub async fn serve(scripts: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            for script in scripts {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                if socket.write_all(&script).await.is_err() {
                    continue;
                }
                held.push(socket);
            }
            std::future::pending::<()>().await;
        });

        Self { port, handle }
    }

    /// Accept one connection and write a frame every `interval` until the reader hangs up
    pub async fn stream_endless(interval: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let script = agent_script(1, false);
            let (header, record) = script.split_at(HEADER_LENGTH);
            if socket.write_all(header).await.is_err() {
                return;
            }
            while socket.write_all(record).await.is_ok() {
                tokio::time::sleep(interval).await;
            }
        });

        Self { port, handle }
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
