//! Delivery scheduler.
//!
//! Picks up due documents, runs one protocol exchange per claimed document
//! and records the result through the delivery state machine.

mod backoff;
mod config;
mod recorder;
mod runner;
mod types;
mod worker;

pub use backoff::RetryPolicy;
pub use config::SchedulerConfig;
pub use recorder::ResultRecorder;
pub use runner::DeliveryScheduler;
pub use types::{SchedulerError, SchedulerStatus, TickReport};
