use std::time::Duration;

use metrics::{counter, gauge};

use super::stats::Report;

/// An observable occurrence inside the throttle, emitted as metrics plus a log record.
pub trait InternalEvent {
    fn emit(self);
}

#[derive(Debug)]
pub struct ThroughputReported<'a> {
    pub report: &'a Report,
}

impl InternalEvent for ThroughputReported<'_> {
    fn emit(self) {
        let report = self.report;
        gauge!("overload_throttle_window_throughput").set(report.window_throughput);
        gauge!("overload_throttle_lifetime_throughput").set(report.lifetime_throughput);
        gauge!("overload_throttle_ceiling").set(report.ceiling as f64);
        gauge!("overload_throttle_pending").set(report.pending as f64);

        info!(
            target: "overload_throttle::stats",
            window_secs = report.window_elapsed.as_secs(),
            window_rps = report.window_throughput as u64,
            lifetime_rps = report.lifetime_throughput as u64,
            completed = report.lifetime_completed,
            failures = report.lifetime_failed,
            overload_signals = report.overload_signals,
            ceiling = report.ceiling,
            transferred = report.transferred,
            "{}", report
        );
    }
}

#[derive(Debug)]
pub struct CeilingAdjusted {
    pub from: u64,
    pub to: u64,
    pub overload_pct: u64,
}

impl InternalEvent for CeilingAdjusted {
    fn emit(self) {
        counter!("overload_throttle_ceiling_adjustments_total").increment(1);
        gauge!("overload_throttle_ceiling").set(self.to as f64);
        debug!(
            target: "overload_throttle::stats",
            from = self.from,
            to = self.to,
            overload_pct = self.overload_pct,
            "Max. pending {} => {} ({}%)", self.from, self.to, self.overload_pct
        );
    }
}

#[derive(Debug)]
pub struct CeilingSet {
    pub value: u64,
}

impl InternalEvent for CeilingSet {
    fn emit(self) {
        gauge!("overload_throttle_ceiling").set(self.value as f64);
        debug!(target: "overload_throttle::stats", ceiling = self.value, "Max. pending set.");
    }
}

#[derive(Debug)]
pub struct CompletionDeferred {
    pub delay: Duration,
}

impl InternalEvent for CompletionDeferred {
    fn emit(self) {
        counter!("overload_throttle_overload_signals_total").increment(1);
        trace!(delay_ms = self.delay.as_millis() as u64, "Completion deferred after overload signal.");
    }
}

#[derive(Debug)]
pub struct OperationFailed {
    pub status: Option<u16>,
}

impl InternalEvent for OperationFailed {
    fn emit(self) {
        let kind = if self.status.is_some() { "status" } else { "transport" };
        counter!("overload_throttle_failures_total", "kind" => kind).increment(1);
    }
}
