//! State shared between the supervisor, the capture session and its reader task

use mirrorcap_core::{Frame, Orientation};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No agent running
    #[default]
    Closed,
    /// Agent launched, waiting for the stream header
    Starting,
    /// Header received, frames flowing
    Streaming,
    /// Launch failed or reconnect attempts exhausted
    Failed,
}

/// Counters for one supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames published to the mailbox
    pub frames: u64,
    /// Reconnects to the frame socket
    pub reconnects: u64,
    /// Session restarts caused by rotation
    pub restarts: u64,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) closed: bool,
    pub(crate) last_frame: Option<Frame>,
    pub(crate) orientation: Option<Orientation>,
    pub(crate) phase: SessionPhase,
    pub(crate) stats: StreamStats,
    next_sequence: u64,
}

/// Closed flag, cached frame, orientation and health behind one lock
#[derive(Default)]
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` while holding the lock
    pub(crate) fn with_lock<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Most recently published frame
    pub fn last_frame(&self) -> Option<Frame> {
        self.lock().last_frame.clone()
    }

    /// Orientation of the running session
    pub fn orientation(&self) -> Option<Orientation> {
        self.lock().orientation
    }

    pub(crate) fn set_orientation(&self, orientation: Orientation) {
        self.lock().orientation = Some(orientation);
    }

    /// Forget the orientation once no session runs at it
    pub(crate) fn clear_orientation(&self) {
        self.lock().orientation = None;
    }

    /// Whether a session is launched and not yet failed or stopped
    pub fn is_live(&self) -> bool {
        matches!(self.lock().phase, SessionPhase::Starting | SessionPhase::Streaming)
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.lock().phase = phase;
    }

    pub fn stats(&self) -> StreamStats {
        self.lock().stats
    }

    pub(crate) fn record_reconnect(&self) {
        self.lock().stats.reconnects += 1;
    }

    pub(crate) fn record_restart(&self) {
        self.lock().stats.restarts += 1;
    }

    /// Next arrival sequence number
    pub(crate) fn next_sequence(&self) -> u64 {
        let mut inner = self.lock();
        inner.next_sequence += 1;
        inner.next_sequence
    }
}
