//! Session lifecycle: one explicitly owned session per process.
//!
//! [`SessionController`] owns the audio pipelines and the channel; callers
//! interact with it through a cloneable [`SessionHandle`].

mod controller;
mod state;

pub use controller::{SessionController, SessionHandle, SessionSettings};
pub use state::{SessionSnapshot, SessionState, SessionStatus};
