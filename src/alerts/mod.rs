pub mod messages;
pub mod milestones;
pub mod scheduler;
pub mod state;

pub use scheduler::{AlertConfig, LimitAlertScheduler, LimitInputs, MIN_SNOOZE_MINUTES};
pub use state::{SchedulerState, SchedulerStatus};
