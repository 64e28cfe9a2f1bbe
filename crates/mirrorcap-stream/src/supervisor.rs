//! Rotation-aware capture supervisor
//!
//! The supervisor waits for the first orientation event, starts a capture
//! session at that rotation and restarts it whenever the device rotates.
//! Consumers read frames through [`FrameFeed`]s; the most recent frame is
//! also kept for [`Supervisor::last_screenshot`].
//!
//! ```text
//! Idle -> AwaitingFirstOrientation -> Streaming -> Closed
//!           (timeout / setup error -> Idle)
//! ```

use crate::mailbox::{FrameFeed, Mailbox};
use crate::sampling::{self, SampledFeed};
use crate::session::{CaptureSession, Collaborators};
use crate::state::{SessionPhase, SharedState, StreamStats};
use mirrorcap_core::{CaptureConfig, Error, Frame, Orientation, RestartPolicy, Result};
use mirrorcap_device::{OrientationSource, ScreenshotFallback};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    AwaitingFirstOrientation,
    Streaming,
    Closed,
}

struct RotationTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the capture session and restarts it on rotation
pub struct Supervisor {
    config: CaptureConfig,
    screenshot: Option<Arc<dyn ScreenshotFallback>>,
    state: Arc<SharedState>,
    mailbox: Arc<Mailbox>,
    session: Arc<Mutex<CaptureSession>>,
    lifecycle: SupervisorState,
    rotation: Option<RotationTask>,
}

impl Supervisor {
    pub fn new(config: CaptureConfig, deps: Collaborators) -> Result<Self> {
        let state = SharedState::new();
        let mailbox = Arc::new(Mailbox::new(state.clone()));
        let screenshot = deps.screenshot.clone();
        let session = CaptureSession::new(deps, config.clone(), mailbox.clone())?;

        Ok(Self {
            config,
            screenshot,
            state,
            mailbox,
            session: Arc::new(Mutex::new(session)),
            lifecycle: SupervisorState::Idle,
            rotation: None,
        })
    }

    /// Start capturing once `source` reports the current orientation.
    ///
    /// Fails with [`Error::RotationTimeout`] if no event arrives within the
    /// configured timeout, and returns to idle on any setup failure.
    pub async fn capture<S>(&mut self, source: &mut S) -> Result<FrameFeed>
    where
        S: OrientationSource + ?Sized,
    {
        match self.lifecycle {
            SupervisorState::Idle => {}
            SupervisorState::Closed => return Err(Error::AlreadyClosed),
            other => {
                return Err(Error::InvalidState(format!(
                    "capture already started ({:?})",
                    other
                )))
            }
        }

        let feed = self.mailbox.subscribe();
        self.lifecycle = SupervisorState::AwaitingFirstOrientation;
        debug!("Waiting for first orientation event");

        match self.begin(source).await {
            Ok(()) => {
                self.lifecycle = SupervisorState::Streaming;
                Ok(feed)
            }
            Err(e) => {
                warn!("Capture setup failed: {}", e);
                self.lifecycle = SupervisorState::Idle;
                Err(e)
            }
        }
    }

    async fn begin<S>(&mut self, source: &mut S) -> Result<()>
    where
        S: OrientationSource + ?Sized,
    {
        let mut events = source.watch().await?;

        let timeout = self.config.first_orientation_timeout();
        let first = match tokio::time::timeout(timeout, events.recv()).await {
            Ok(Some(orientation)) => orientation,
            Ok(None) => return Err(Error::OrientationStreamEnded),
            Err(_) => return Err(Error::RotationTimeout(timeout)),
        };
        info!("Initial orientation: {}", first);

        self.session.lock().await.start(first).await?;

        let cancel = CancellationToken::new();
        let watcher = RotationWatch {
            session: self.session.clone(),
            state: self.state.clone(),
            policy: self.config.restart_policy,
            jitter_ms: self.config.restart_jitter_ms,
        };
        let handle = tokio::spawn(watcher.run(events, cancel.clone()));
        self.rotation = Some(RotationTask { cancel, handle });
        Ok(())
    }

    /// Another consumer of the live frames
    pub fn subscribe(&self) -> FrameFeed {
        self.mailbox.subscribe()
    }

    /// Live frames resampled to exactly `freq` per second
    pub fn fixed_rate(&self, freq: u32) -> Result<SampledFeed> {
        sampling::fixed_rate(self.subscribe(), freq)
    }

    /// Live frames capped at `freq` per second
    pub fn limited_rate(&self, freq: u32) -> Result<SampledFeed> {
        sampling::limited_rate(self.subscribe(), freq)
    }

    /// Stop everything. A second call fails with [`Error::AlreadyClosed`].
    pub async fn close(&mut self) -> Result<()> {
        self.mailbox.close()?;

        if let Some(task) = self.rotation.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Rotation task ended abnormally: {}", e);
            }
        }
        self.session.lock().await.stop().await;

        self.lifecycle = SupervisorState::Closed;
        info!("Capture closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn state(&self) -> SupervisorState {
        self.lifecycle
    }

    /// Health of the underlying session
    pub fn session_phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.state.orientation()
    }

    pub fn stats(&self) -> StreamStats {
        self.state.stats()
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.mailbox.last_frame()
    }

    /// The most recent frame, or a one-shot screenshot when nothing is streaming
    pub async fn last_screenshot(&self) -> Result<Frame> {
        if let Some(frame) = self.mailbox.last_frame() {
            return Ok(frame);
        }

        match self.state.phase() {
            SessionPhase::Starting | SessionPhase::Streaming => {
                Err(Error::NotFound("no frame captured yet".into()))
            }
            SessionPhase::Closed | SessionPhase::Failed => match &self.screenshot {
                Some(fallback) => fallback.take_screenshot().await,
                None => Err(Error::NotFound("no frame and no screenshot fallback".into())),
            },
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(task) = self.rotation.take() {
            task.cancel.cancel();
        }
    }
}

/// Consumes orientation events and restarts the session on rotation
struct RotationWatch {
    session: Arc<Mutex<CaptureSession>>,
    state: Arc<SharedState>,
    policy: RestartPolicy,
    jitter_ms: (u64, u64),
}

impl RotationWatch {
    async fn run(self, mut events: mpsc::Receiver<Orientation>, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = events.recv() => next,
            };
            let Some(orientation) = next else {
                info!("Orientation source closed, keeping current session");
                break;
            };

            let running_at = self.state.orientation().filter(|_| self.state.is_live());
            if self.policy == RestartPolicy::OnChange && running_at == Some(orientation) {
                debug!("Orientation unchanged at {}", orientation);
                continue;
            }

            let restarted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.restart(orientation) => result,
            };
            match restarted {
                Ok(()) => self.state.record_restart(),
                Err(e) => warn!("Restart at {} failed: {}", orientation, e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.jitter()) => {}
            }
        }
        debug!("Rotation watch stopped");
    }

    async fn restart(&self, orientation: Orientation) -> Result<()> {
        self.session.lock().await.restart(orientation).await
    }

    fn jitter(&self) -> Duration {
        let (min, max) = self.jitter_ms;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        agent_script, collaborators, init_tracing, solid_frame, test_config, FakeAgent,
        FakeExecutor, FakeScreenshot,
    };
    use mirrorcap_device::ChannelOrientationSource;

    fn supervisor(executor: Arc<FakeExecutor>, config: CaptureConfig) -> Supervisor {
        Supervisor::new(config, collaborators(executor, true)).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_single_orientation_streams_without_restart() {
        let executor = FakeExecutor::new();
        let mut sup = supervisor(executor.clone(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);

        tx.send(Orientation::Landscape).await.unwrap();
        sup.capture(&mut source).await.unwrap();
        settle().await;

        assert_eq!(sup.state(), SupervisorState::Streaming);
        assert_eq!(sup.orientation(), Some(Orientation::Landscape));
        assert_eq!(executor.launches().len(), 1);
        assert_eq!(sup.stats().restarts, 0);
        sup.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_orientation_ignored() {
        let executor = FakeExecutor::new();
        let mut sup = supervisor(executor.clone(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);

        tx.send(Orientation::Landscape).await.unwrap();
        tx.send(Orientation::Landscape).await.unwrap();
        sup.capture(&mut source).await.unwrap();
        settle().await;

        assert_eq!(executor.launches().len(), 1);
        assert_eq!(sup.stats().restarts, 0);
        sup.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_restarts_once() {
        let executor = FakeExecutor::new();
        let mut sup = supervisor(executor.clone(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);

        tx.send(Orientation::Landscape).await.unwrap();
        tx.send(Orientation::Portrait).await.unwrap();
        sup.capture(&mut source).await.unwrap();
        settle().await;

        assert_eq!(sup.stats().restarts, 1);
        assert_eq!(sup.orientation(), Some(Orientation::Portrait));
        let launches = executor.launches();
        assert_eq!(launches.len(), 2);
        assert!(launches[0].ends_with("/90 -S"));
        assert!(launches[1].ends_with("/0 -S"));
        sup.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rotating_back_after_failed_restart_relaunches() {
        let executor = FakeExecutor::new();
        let mut sup = supervisor(executor.clone(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);

        tx.send(Orientation::Portrait).await.unwrap();
        sup.capture(&mut source).await.unwrap();

        executor.fail_launch();
        tx.send(Orientation::Landscape).await.unwrap();
        settle().await;
        assert_eq!(sup.session_phase(), SessionPhase::Failed);
        assert_eq!(sup.orientation(), None);

        executor.allow_launch();
        tx.send(Orientation::Portrait).await.unwrap();
        settle().await;

        assert_eq!(executor.launches().len(), 2);
        assert_eq!(sup.orientation(), Some(Orientation::Portrait));
        assert_ne!(sup.session_phase(), SessionPhase::Failed);
        assert_eq!(sup.stats().restarts, 1);
        sup.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_always_policy_restarts_on_repeat() {
        let executor = FakeExecutor::new();
        let config = test_config().with_restart_policy(RestartPolicy::Always);
        let mut sup = supervisor(executor.clone(), config);
        let (tx, mut source) = ChannelOrientationSource::new(4);

        tx.send(Orientation::Portrait).await.unwrap();
        tx.send(Orientation::Portrait).await.unwrap();
        sup.capture(&mut source).await.unwrap();
        settle().await;

        assert_eq!(sup.stats().restarts, 1);
        assert_eq!(executor.launches().len(), 2);
        sup.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_first_orientation_timeout() {
        let executor = FakeExecutor::new();
        let config =
            test_config().with_first_orientation_timeout(Duration::from_millis(50));
        let mut sup = supervisor(executor.clone(), config);
        let (_tx, mut source) = ChannelOrientationSource::new(4);

        let err = sup.capture(&mut source).await.unwrap_err();
        assert!(matches!(err, Error::RotationTimeout(_)));
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert!(executor.launches().is_empty());
    }

    #[tokio::test]
    async fn test_orientation_stream_ended() {
        let mut sup = supervisor(FakeExecutor::new(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);
        drop(tx);

        let err = sup.capture(&mut source).await.unwrap_err();
        assert!(matches!(err, Error::OrientationStreamEnded));
        assert_eq!(sup.state(), SupervisorState::Idle);
    }

    #[tokio::test]
    async fn test_unsupported_agent_returns_to_idle() {
        let executor = FakeExecutor::new();
        let mut sup = Supervisor::new(test_config(), collaborators(executor.clone(), false)).unwrap();
        let (tx, mut source) = ChannelOrientationSource::new(4);
        tx.send(Orientation::Portrait).await.unwrap();

        let err = sup.capture(&mut source).await.unwrap_err();
        assert!(matches!(err, Error::AgentUnsupported));
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert!(executor.launches().is_empty());
    }

    #[tokio::test]
    async fn test_capture_twice_rejected() {
        let mut sup = supervisor(FakeExecutor::new(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);
        tx.send(Orientation::Portrait).await.unwrap();
        sup.capture(&mut source).await.unwrap();

        let (_tx2, mut other) = ChannelOrientationSource::new(4);
        assert!(matches!(
            sup.capture(&mut other).await,
            Err(Error::InvalidState(_))
        ));
        sup.close().await.unwrap();
        assert!(matches!(
            sup.capture(&mut other).await,
            Err(Error::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_twice() {
        let executor = FakeExecutor::new();
        let mut sup = supervisor(executor.clone(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);
        tx.send(Orientation::Portrait).await.unwrap();
        let mut feed = sup.capture(&mut source).await.unwrap();

        sup.close().await.unwrap();
        assert!(sup.is_closed());
        assert_eq!(sup.state(), SupervisorState::Closed);
        assert!(feed.recv().await.is_none());
        assert_eq!(executor.terminated(), 1);
        assert_eq!(executor.removed_forwards().len(), 1);

        assert!(matches!(sup.close().await, Err(Error::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_close_idle() {
        let mut sup = supervisor(FakeExecutor::new(), test_config());
        sup.close().await.unwrap();
        assert!(sup.is_closed());
        assert!(sup.subscribe().recv().await.is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_frames() -> anyhow::Result<()> {
        init_tracing();
        let agent = FakeAgent::serve(vec![agent_script(3, false)]).await;
        let executor = FakeExecutor::new();
        let mut sup = supervisor(executor, test_config().with_port(agent.port));
        let (tx, mut source) = ChannelOrientationSource::new(4);
        tx.send(Orientation::Portrait).await?;

        let mut feed = sup.capture(&mut source).await?;
        let frame = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("feed ended before the first frame"))?;
        assert_eq!((frame.width(), frame.height()), (8, 8));
        assert_eq!(sup.session_phase(), SessionPhase::Streaming);

        let shot = sup.last_screenshot().await?;
        assert!(shot.sequence >= frame.sequence);
        sup.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_feed_survives_rotation() -> anyhow::Result<()> {
        init_tracing();
        let agent = FakeAgent::serve(vec![agent_script(2, false), agent_script(2, false)]).await;
        let executor = FakeExecutor::new();
        let mut sup = supervisor(executor.clone(), test_config().with_port(agent.port));
        let (tx, mut source) = ChannelOrientationSource::new(4);
        tx.send(Orientation::Portrait).await?;
        let mut feed = sup.capture(&mut source).await?;

        let wait = Duration::from_secs(5);
        tokio::time::timeout(wait, async {
            while sup.stats().frames < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        tx.send(Orientation::Landscape).await?;
        let after = tokio::time::timeout(wait, async {
            while let Some(frame) = feed.recv().await {
                if frame.sequence > 2 {
                    return Some(frame);
                }
            }
            None
        })
        .await?
        .ok_or_else(|| anyhow::anyhow!("feed ended across the restart"))?;

        assert!(after.sequence <= 4);
        assert_eq!(sup.stats().restarts, 1);
        assert_eq!(sup.orientation(), Some(Orientation::Landscape));
        assert_eq!(executor.launches().len(), 2);
        sup.close().await?;
        assert!(feed.recv().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_last_screenshot_fallback() {
        let executor = FakeExecutor::new();
        let mut deps = collaborators(executor, true);
        deps.screenshot = Some(Arc::new(FakeScreenshot(solid_frame(42))));
        let sup = Supervisor::new(test_config(), deps).unwrap();

        let shot = sup.last_screenshot().await.unwrap();
        assert_eq!(shot.sequence, 42);
    }

    #[tokio::test]
    async fn test_last_screenshot_while_starting() {
        let mut sup = supervisor(FakeExecutor::new(), test_config());
        let (tx, mut source) = ChannelOrientationSource::new(4);
        tx.send(Orientation::Portrait).await.unwrap();
        sup.capture(&mut source).await.unwrap();

        assert!(matches!(
            sup.last_screenshot().await,
            Err(Error::NotFound(_))
        ));
        sup.close().await.unwrap();
    }
}
