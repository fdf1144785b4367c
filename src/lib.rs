//! Object-store load driver.
//!
//! Submits PUT or GET requests against an S3-style endpoint as fast as the
//! [`overload_throttle`] admission ceiling allows, and reports throughput as it goes.
pub mod config;
pub mod driver;
pub mod payload;

pub use config::{BenchConfig, ConfigError, Method};
pub use driver::{Driver, RunSummary};

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
