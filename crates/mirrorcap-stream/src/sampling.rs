//! Rate-controlled views over a frame feed
//!
//! - [`fixed_rate`] emits on every tick, repeating the last frame when
//!   nothing new arrived.
//! - [`limited_rate`] emits on a tick only when a new frame arrived since
//!   the previous emission.
//!
//! Both end when the source feed ends and never emit after that.

use crate::mailbox::FrameFeed;
use mirrorcap_core::{Error, Frame, Result};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SamplingMode {
    Fixed,
    Limited,
}

/// Emit at `freq` Hz, repeating the last frame between arrivals
pub fn fixed_rate(source: FrameFeed, freq: u32) -> Result<SampledFeed> {
    SampledFeed::spawn(source, freq, SamplingMode::Fixed)
}

/// Emit at most `freq` times per second, only when something new arrived
pub fn limited_rate(source: FrameFeed, freq: u32) -> Result<SampledFeed> {
    SampledFeed::spawn(source, freq, SamplingMode::Limited)
}

/// Output of a sampler; stops the sampler when dropped
#[derive(Debug)]
pub struct SampledFeed {
    feed: FrameFeed,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SampledFeed {
    fn spawn(source: FrameFeed, freq: u32, mode: SamplingMode) -> Result<Self> {
        if freq == 0 {
            return Err(Error::Config("sampling frequency must be positive".into()));
        }
        let period = Duration::from_secs_f64(1.0 / freq as f64);

        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sampler(source, tx, period, mode, cancel.clone()));

        Ok(Self {
            feed: FrameFeed::new(rx),
            cancel,
            handle: Some(handle),
        })
    }

    /// Wait for the next emitted frame. `None` once the source has ended.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.feed.recv().await
    }

    /// Stop sampling and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SampledFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_sampler(
    mut source: FrameFeed,
    tx: watch::Sender<Option<Frame>>,
    period: Duration,
    mode: SamplingMode,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending: Option<Frame> = None;
    let mut last: Option<Frame> = None;

    debug!("Sampler started ({:?}, every {:?})", mode, period);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // the source wins over a due tick so nothing is emitted after it ends
            next = source.recv() => match next {
                Some(frame) => pending = Some(frame),
                None => break,
            },
            _ = ticker.tick() => {
                let out = match mode {
                    SamplingMode::Fixed => pending.take().or_else(|| last.clone()),
                    SamplingMode::Limited => pending.take(),
                };
                if let Some(frame) = out {
                    last = Some(frame.clone());
                    tx.send_replace(Some(frame));
                }
            }
        }
    }
    debug!("Sampler stopped");
}
