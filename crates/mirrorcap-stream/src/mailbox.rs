//! Overwrite-newest frame distribution
//!
//! The mailbox holds at most one pending frame. Publishing replaces whatever
//! consumers have not picked up yet, so a slow consumer always sees the most
//! recent frame and the producer never waits. Closing publishes an end marker
//! that every [`FrameFeed`] observes as `None`.

use crate::state::SharedState;
use futures::Stream;
use mirrorcap_core::{Error, Frame, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Single-slot frame channel plus the latest-frame cache
pub struct Mailbox {
    state: Arc<SharedState>,
    slot: watch::Sender<Option<Frame>>,
}

impl Mailbox {
    pub fn new(state: Arc<SharedState>) -> Self {
        let (slot, _) = watch::channel(None);
        Self { state, slot }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Publish a frame, replacing any pending one.
    ///
    /// Returns `false` once the mailbox is closed.
    pub fn publish(&self, frame: Frame) -> bool {
        self.state.with_lock(|inner| {
            if inner.closed {
                return false;
            }
            inner.last_frame = Some(frame.clone());
            inner.stats.frames += 1;
            self.slot.send_replace(Some(frame));
            true
        })
    }

    /// New consumer handle. After close it yields nothing.
    pub fn subscribe(&self) -> FrameFeed {
        self.state.with_lock(|inner| {
            if inner.closed {
                FrameFeed::ended()
            } else {
                FrameFeed::new(self.slot.subscribe())
            }
        })
    }

    /// Most recently published frame
    pub fn last_frame(&self) -> Option<Frame> {
        self.state.last_frame()
    }

    /// Mark closed and wake every consumer with the end marker
    pub fn close(&self) -> Result<()> {
        self.state.with_lock(|inner| {
            if inner.closed {
                return Err(Error::AlreadyClosed);
            }
            inner.closed = true;
            self.slot.send_replace(None);
            Ok(())
        })?;
        debug!("Mailbox closed ({} consumers)", self.slot.receiver_count());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// Consumer end of a [`Mailbox`] or a sampler
#[derive(Debug)]
pub struct FrameFeed {
    rx: watch::Receiver<Option<Frame>>,
    /// Set once the end marker or a dropped source was seen
    ended: bool,
}

impl FrameFeed {
    pub(crate) fn new(rx: watch::Receiver<Option<Frame>>) -> Self {
        Self { rx, ended: false }
    }

    /// A feed that is already at its end
    pub(crate) fn ended() -> Self {
        let (_, rx) = watch::channel(None);
        Self { rx, ended: true }
    }

    /// Wait for the next frame. Returns `None` once the source has ended,
    /// and on every call after that.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.ended {
            return None;
        }
        let next = match self.rx.changed().await {
            Ok(()) => self.rx.borrow_and_update().clone(),
            Err(_) => None,
        };
        self.ended = next.is_none();
        next
    }

    /// Pending frame without waiting, if any was published
    pub fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }

    /// Adapt into a `Stream` of frames
    pub fn into_stream(self) -> impl Stream<Item = Frame> {
        futures::stream::unfold(self, |mut feed| async move {
            feed.recv().await.map(|frame| (frame, feed))
        })
    }
}
