pub mod controller;
pub mod detector;
pub mod events;
pub mod queue;
pub mod scheduler;
mod worker;

pub use controller::Monitor;
pub use detector::{detect, Detection};
pub use events::WatchEvent;
pub use queue::RenderQueue;
pub use scheduler::{is_due, next_sleep, ScheduleEntry, SchedulerController, TickReport};
