//! Bound the number of requests in flight and back off when the remote side is overloaded.

mod admission;
mod backoff;
mod completion;
mod counters;
pub mod internal_event;
mod outcome;
mod stats;

use std::{sync::Arc, time::Duration};

use bon::Builder;

pub use admission::AdmissionController;
pub use backoff::OverloadBackoff;
pub use completion::Completion;
pub use counters::{CounterValues, WindowSnapshot, WindowedCounters};
pub use outcome::{Cause, LastError, Outcome};
pub use stats::{Report, StatisticsReporter};

use internal_event::{InternalEvent, OperationFailed};
use outcome::ErrorState;

/// Configuration of the throttle.
///
/// The defaults reproduce the behaviour the benchmark was tuned with. The shrink multiplier and
/// the overload delay have no deeper derivation, so they are exposed rather than hard-coded.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `initial_ceiling` | 400 | Ceiling on pending requests until the driver sets its own |
/// | `min_ceiling` | 1 | Lower bound for the ceiling; zero would stall submission forever |
/// | `shrink_multiplier` | 3 | A window with overload fraction `f` shrinks the ceiling by `multiplier × f` |
/// | `overload_delay` | 2s | How long the completion of an overloaded request is deferred |
/// | `stall_report_interval` | 10s | Cadence of snapshot reports while the driver is suspended |
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use overload_throttle::throttle::ThrottleSettings;
///
/// let settings = ThrottleSettings::builder()
///     .initial_ceiling(100)
///     .overload_delay(Duration::from_millis(500))
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Builder)]
pub struct ThrottleSettings {
    #[builder(default = default_initial_ceiling())]
    pub(super) initial_ceiling: u64,

    #[builder(default = default_min_ceiling())]
    pub(super) min_ceiling: u64,

    /// Applied to the overload percentage of a window. With 3, a window where 10% of the sent
    /// requests were overloaded shrinks the ceiling by 30%.
    #[builder(default = default_shrink_multiplier())]
    pub(super) shrink_multiplier: u64,

    #[builder(default = default_overload_delay())]
    pub(super) overload_delay: Duration,

    #[builder(default = default_stall_report_interval())]
    pub(super) stall_report_interval: Duration,
}

const fn default_initial_ceiling() -> u64 {
    400
}

const fn default_min_ceiling() -> u64 {
    1
}

const fn default_shrink_multiplier() -> u64 {
    3
}

const fn default_overload_delay() -> Duration {
    Duration::from_millis(2000)
}

const fn default_stall_report_interval() -> Duration {
    Duration::from_secs(10)
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            initial_ceiling: default_initial_ceiling(),
            min_ceiling: default_min_ceiling(),
            shrink_multiplier: default_shrink_multiplier(),
            overload_delay: default_overload_delay(),
            stall_report_interval: default_stall_report_interval(),
        }
    }
}

impl ThrottleSettings {
    pub fn get_initial_ceiling(&self) -> u64 {
        self.initial_ceiling
    }
    pub fn get_overload_delay(&self) -> Duration {
        self.overload_delay
    }
}

/// Driver-facing entry point: counters, ceiling, overload backoff, reports and error state.
///
/// Every method may be called concurrently from any number of completion tasks. Only the
/// `wait_*`/[`drain`](Self::drain) methods suspend.
#[derive(Debug)]
pub struct Throttle {
    counters: Arc<WindowedCounters>,
    admission: Arc<AdmissionController>,
    reporter: StatisticsReporter,
    backoff: OverloadBackoff,
    errors: ErrorState,
}

impl Throttle {
    /// Creates the throttle and starts its timer task. Must be called from within a Tokio
    /// runtime.
    pub fn new(settings: ThrottleSettings) -> Self {
        let counters = Arc::new(WindowedCounters::new());
        let admission = Arc::new(AdmissionController::new(counters.clone(), &settings));
        let reporter = StatisticsReporter::new(counters.clone(), admission.clone());
        let backoff = OverloadBackoff::spawn(counters.clone(), settings.overload_delay);
        Self {
            counters,
            admission,
            reporter,
            backoff,
            errors: ErrorState::default(),
        }
    }

    /// Counts a submission and returns the handle through which it must be resolved.
    pub fn begin(self: &Arc<Self>) -> Completion {
        self.record_sent();
        Completion::new(self.clone())
    }

    pub fn record_sent(&self) {
        self.counters.record_sent();
    }

    /// Completion callback: classifies and counts one resolved operation.
    ///
    /// Must be invoked exactly once per [`record_sent`](Self::record_sent). Never fails; the
    /// driver observes errors through [`last_error`](Self::last_error) and the reports.
    pub fn complete(&self, outcome: Outcome) {
        match outcome {
            Outcome::Success | Outcome::NotModified => {}
            Outcome::Overload => {
                self.backoff.defer_completion();
                return;
            }
            Outcome::HttpStatus(status) => {
                self.counters.record_failed();
                self.errors.record_status(status);
                OperationFailed {
                    status: Some(status),
                }
                .emit();
            }
            Outcome::Transport(cause) => {
                self.counters.record_failed();
                self.errors.record_cause(cause);
                OperationFailed { status: None }.emit();
            }
            Outcome::NoResponse => {
                debug!(message = "Operation finished with neither response nor error.");
            }
        }
        self.counters.record_completed();
    }

    /// Requests submitted but not yet resolved.
    pub fn pending(&self) -> u64 {
        self.counters.pending()
    }

    pub fn counters(&self) -> WindowSnapshot {
        self.counters.snapshot()
    }

    pub fn ceiling(&self) -> u64 {
        self.admission.ceiling()
    }

    /// Overwrites the ceiling, e.g. after a warm-up phase. Returns the stored value.
    pub fn set_ceiling(&self, value: u64) -> u64 {
        self.admission.set_ceiling(value)
    }

    /// Suspends until at most `limit` (clamped to the ceiling) requests are pending, or
    /// `timeout` elapses. Long waits emit a snapshot report every stall-report interval.
    pub async fn wait_until(&self, limit: u64, timeout: Duration) -> bool {
        self.admission
            .wait_until(limit, timeout, || {
                self.reporter.report_snapshot();
            })
            .await
    }

    /// Suspends until the pending requests fit below the current ceiling.
    pub async fn wait_for_capacity(&self, timeout: Duration) -> bool {
        self.wait_until(u64::MAX, timeout).await
    }

    /// Suspends until nothing is pending.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.wait_until(0, timeout).await
    }

    pub fn maybe_report(&self, interval: Duration) -> Option<Report> {
        self.reporter.maybe_report(interval)
    }

    pub fn report_snapshot(&self) -> Report {
        self.reporter.report_snapshot()
    }

    pub fn report_transfer(&self) -> Report {
        self.reporter.report_transfer()
    }

    pub fn last_error(&self) -> LastError {
        self.errors.get()
    }

    /// Cancels deferred completions and stops the timer task.
    pub fn shutdown(&self) {
        self.backoff.shutdown();
    }
}
