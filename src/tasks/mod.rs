//! Background tasks.

mod scheduler;

pub use scheduler::RoundScheduler;
