//! Per-element watch sessions: the playback state machine, the listener
//! registry and the tracker that commits finished intervals.

pub mod registry;
pub mod state;
pub mod tracker;

pub use registry::{ListenerRegistry, Subscription};
pub use state::{PlaybackState, Session, StopReason};
pub use tracker::{SessionContext, SessionTracker};
