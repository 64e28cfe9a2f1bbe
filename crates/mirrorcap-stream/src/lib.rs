//! mirrorcap Stream - Capture sessions and frame distribution
//!
//! Wires the frame protocol decoder to device collaborators:
//!
//! - [`CaptureSession`] launches the agent for one rotation and decodes its
//!   stream into a [`Mailbox`], reconnecting on errors.
//! - [`Supervisor`] follows orientation events and restarts the session on
//!   rotation.
//! - [`fixed_rate`] and [`limited_rate`] resample a [`FrameFeed`].

mod mailbox;
mod sampling;
mod session;
mod state;
mod supervisor;

#[cfg(test)]
mod testing;

pub use mailbox::{FrameFeed, Mailbox};
pub use sampling::{fixed_rate, limited_rate, SampledFeed};
pub use session::{CaptureSession, Collaborators};
pub use state::{SessionPhase, SharedState, StreamStats};
pub use supervisor::{Supervisor, SupervisorState};
