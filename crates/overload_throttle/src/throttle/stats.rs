//! Periodic throughput reports.

use std::{fmt, sync::Arc, time::Duration};

use super::{
    admission::AdmissionController,
    counters::{WindowSnapshot, WindowedCounters},
    internal_event::{InternalEvent, ThroughputReported},
};

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// One throughput summary.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub window_elapsed: Duration,
    pub lifetime_elapsed: Duration,
    /// Completions per second within the window.
    pub window_throughput: f64,
    /// Completions per second since the start of the run.
    pub lifetime_throughput: f64,
    pub window_completed: u64,
    pub lifetime_completed: u64,
    pub lifetime_failed: u64,
    /// Overload signals of the window.
    pub overload_signals: u64,
    pub pending: u64,
    pub ceiling: u64,
    /// Whether the window was folded into the lifetime totals for this report.
    pub transferred: bool,
}

impl Report {
    fn new(snapshot: &WindowSnapshot, ceiling: u64, transferred: bool) -> Self {
        Self {
            window_elapsed: snapshot.window_elapsed,
            lifetime_elapsed: snapshot.lifetime_elapsed,
            window_throughput: per_second(snapshot.window.completed, snapshot.window_elapsed),
            lifetime_throughput: per_second(snapshot.lifetime.completed, snapshot.lifetime_elapsed),
            window_completed: snapshot.window.completed,
            lifetime_completed: snapshot.lifetime.completed,
            lifetime_failed: snapshot.lifetime.failed,
            overload_signals: snapshot.window.overload_signals,
            pending: snapshot.pending,
            ceiling,
            transferred,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.0}/{:.0} requests/s, overall: {} requests, {} failures",
            self.window_elapsed.as_secs(),
            self.window_throughput,
            self.lifetime_throughput,
            self.lifetime_completed,
            self.lifetime_failed,
        )?;
        if self.overload_signals > 0 {
            write!(f, ", {} rr", self.overload_signals)?;
        }
        write!(f, ", {} max. pending", self.ceiling)
    }
}

/// Turns counter windows into throughput reports and feeds the overload ratio of every
/// closed window into the admission controller.
#[derive(Debug)]
pub struct StatisticsReporter {
    counters: Arc<WindowedCounters>,
    admission: Arc<AdmissionController>,
}

impl StatisticsReporter {
    pub fn new(counters: Arc<WindowedCounters>, admission: Arc<AdmissionController>) -> Self {
        Self {
            counters,
            admission,
        }
    }

    /// Closes the current window and reports it, if it is older than `interval`.
    pub fn maybe_report(&self, interval: Duration) -> Option<Report> {
        if self.counters.window_elapsed() < interval {
            return None;
        }
        Some(self.report_transfer())
    }

    /// Closes the current window unconditionally, adjusts the ceiling and reports.
    pub fn report_transfer(&self) -> Report {
        let snapshot = self.counters.transfer_window();
        self.admission
            .adjust_ceiling(snapshot.window.sent, snapshot.window.overload_signals);
        self.emit(Report::new(&snapshot, self.admission.ceiling(), true))
    }

    /// Reports the current values without closing the window. Safe to call repeatedly.
    pub fn report_snapshot(&self) -> Report {
        let snapshot = self.counters.snapshot();
        self.emit(Report::new(&snapshot, self.admission.ceiling(), false))
    }

    fn emit(&self, report: Report) -> Report {
        ThroughputReported { report: &report }.emit();
        report
    }
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;
    use crate::throttle::ThrottleSettings;

    fn reporter(
        ceiling: u64,
    ) -> (
        Arc<WindowedCounters>,
        Arc<AdmissionController>,
        StatisticsReporter,
    ) {
        let counters = Arc::new(WindowedCounters::new());
        let settings = ThrottleSettings::builder().initial_ceiling(ceiling).build();
        let admission = Arc::new(AdmissionController::new(counters.clone(), &settings));
        let reporter = StatisticsReporter::new(counters.clone(), admission.clone());
        (counters, admission, reporter)
    }

    fn overloaded_window(counters: &WindowedCounters) {
        for i in 0..100 {
            counters.record_sent();
            if i < 10 {
                counters.record_overload_signal();
            }
        }
    }

    #[tokio::test]
    async fn reports_only_after_interval() {
        tokio::time::pause();
        let (counters, _, reporter) = reporter(400);
        counters.record_sent();
        counters.record_completed();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(reporter.maybe_report(Duration::from_secs(10)).is_none());
        assert_eq!(counters.snapshot().window.completed, 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        let report = reporter.maybe_report(Duration::from_secs(10)).unwrap();
        assert!(report.transferred);
        assert_eq!(report.window_completed, 1);
        assert_eq!(report.lifetime_completed, 1);
        assert_eq!(counters.snapshot().window.completed, 0);
        assert!(reporter.maybe_report(Duration::from_secs(10)).is_none());
    }

    #[tokio::test]
    async fn throughput_is_per_second() {
        tokio::time::pause();
        let (counters, _, reporter) = reporter(400);
        for _ in 0..40 {
            counters.record_sent();
            counters.record_completed();
        }
        tokio::time::advance(Duration::from_secs(4)).await;
        let first = reporter.report_transfer();
        assert_eq!(first.window_throughput, 10.0);
        assert_eq!(first.lifetime_throughput, 10.0);

        for _ in 0..10 {
            counters.record_sent();
            counters.record_completed();
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = reporter.report_transfer();
        assert_eq!(second.window_throughput, 10.0);
        assert_eq!(second.lifetime_completed, 50);
        assert_eq!(second.lifetime_throughput, 10.0);
    }

    #[test]
    fn zero_elapsed_has_zero_throughput() {
        assert_eq!(per_second(10, Duration::ZERO), 0.0);
    }

    #[test]
    fn transfer_shrinks_ceiling_on_overload() {
        let (counters, admission, reporter) = reporter(400);
        overloaded_window(&counters);

        let report = reporter.report_transfer();
        assert_eq!(report.overload_signals, 10);
        assert_eq!(report.ceiling, 280);
        assert_eq!(admission.ceiling(), 280);

        // The next window is clean, so the ceiling stays where it is.
        assert_eq!(reporter.report_transfer().ceiling, 280);
    }

    #[test]
    fn snapshot_does_not_reset_or_adjust() {
        let (counters, admission, reporter) = reporter(400);
        overloaded_window(&counters);
        counters.record_failed();

        for _ in 0..3 {
            let report = reporter.report_snapshot();
            assert!(!report.transferred);
            assert_eq!(report.overload_signals, 10);
            assert_eq!(report.lifetime_failed, 1);
            assert_eq!(report.pending, 100);
        }
        assert_eq!(admission.ceiling(), 400);
        assert_eq!(counters.snapshot().window.sent, 100);
    }

    #[test]
    fn display_matches_log_shape() {
        let report = Report {
            window_elapsed: Duration::from_secs(10),
            lifetime_elapsed: Duration::from_secs(30),
            window_throughput: 120.4,
            lifetime_throughput: 99.6,
            window_completed: 1204,
            lifetime_completed: 2988,
            lifetime_failed: 2,
            overload_signals: 7,
            pending: 12,
            ceiling: 280,
            transferred: true,
        };
        assert_eq!(
            report.to_string(),
            "10 120/100 requests/s, overall: 2988 requests, 2 failures, 7 rr, 280 max. pending"
        );
    }

    #[test]
    fn emits_ceiling_gauge() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let (counters, _, reporter) = reporter(400);
        overloaded_window(&counters);

        metrics::with_local_recorder(&recorder, || {
            reporter.report_transfer();
        });

        let ceiling = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "overload_throttle_ceiling")
            .map(|(_, _, _, value)| value);
        match ceiling {
            Some(DebugValue::Gauge(value)) => assert_eq!(value.into_inner(), 280.0),
            other => panic!("unexpected ceiling metric: {other:?}"),
        }
    }
}
