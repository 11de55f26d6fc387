//! # Resilience Module
//!
//! Retry and polling support for talking to a slow, poll-only scanning service.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scan_orchestrator::resilience::{poll_with_retry, Attempt, PollPolicy};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = PollPolicy::new(Duration::from_secs(10), 15);
//!
//! let outcome = poll_with_retry("unpack", &policy, |_attempt| async {
//!     // Ask the tool for the job status here
//!     Ok::<_, String>(Attempt::Done("Completed"))
//! })
//! .await;
//! assert!(outcome.is_settled());
//! # }
//! ```

pub mod poll;

pub use poll::{payload_poll_interval, poll_with_retry, Attempt, PollOutcome, PollPolicy};
