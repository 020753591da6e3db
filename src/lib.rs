pub mod error;
pub mod scheduler;
pub mod state;
pub mod timer;

pub use error::SchedulerError;
pub use scheduler::Scheduler;
pub use state::TimerState;
pub use timer::{CallbackFuture, CountdownTimer, StateCallback};
