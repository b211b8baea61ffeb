pub mod scheduler;
pub mod subscriber;

pub use scheduler::{Scheduler, SchedulerConfig};
pub use subscriber::subscribe;
