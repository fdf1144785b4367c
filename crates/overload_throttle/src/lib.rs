//! Admission control for load drivers that keep a bounded number of requests in flight.
//!
//! The crate tracks sent, completed, failed and overload-signalled requests over a current
//! measurement window and over the whole run, and uses the overload ratio of each window to
//! shrink the ceiling on outstanding requests.
//!
//! # Algorithm Overview
//!
//! 1. Every submission is counted as sent, every resolution as completed.
//! 2. A response that signals overload (for example HTTP 503 "slow down") is not completed
//!    right away. Its completion is deferred by a fixed delay, which lowers the effective
//!    completion rate without counting a failure.
//! 3. When a window is folded into the lifetime totals, the ceiling is reduced by
//!    `multiplier × overload / sent` percent. The controller never grows the ceiling on its
//!    own; only [`throttle::Throttle::set_ceiling`] raises it.
//! 4. The driver suspends in [`throttle::Throttle::wait_until`] between submissions until the
//!    number of pending requests drops to the limit.
//!
//! # Basic Usage
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use overload_throttle::throttle::{Outcome, Throttle, ThrottleSettings};
//!
//! # async fn run() {
//! let throttle = Arc::new(Throttle::new(ThrottleSettings::default()));
//! throttle.set_ceiling(400);
//!
//! let completion = throttle.begin();
//! tokio::spawn(async move {
//!     // ... perform the request ...
//!     completion.resolve(Outcome::Success);
//! });
//!
//! throttle.wait_for_capacity(Duration::from_secs(10)).await;
//! throttle.maybe_report(Duration::from_secs(10));
//! throttle.drain(Duration::from_secs(10)).await;
//! throttle.shutdown();
//! # }
//! ```
//!
//! # Metrics
//! Emits gauges and counters through the `metrics` facade via the `InternalEvent` trait.
pub mod throttle;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
