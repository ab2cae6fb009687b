//! REST Ingestion
//!
//! HTTP client with 429 / 5xx retry classification and the cadence-driven
//! scheduler that runs the job catalog through the shared rate limiter.

mod client;
mod error;
mod scheduler;

pub use client::{ErrorCategory, RestClient, RetryPolicy, categorize_status, parse_retry_after};
pub use error::RestError;
pub use scheduler::{RestScheduler, SchedulerSnapshot, SchedulerStats};
