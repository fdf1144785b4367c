//! Ceiling on outstanding requests and the suspension point of the driver loop.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::{Instant, timeout_at};

use super::{
    ThrottleSettings,
    counters::WindowedCounters,
    internal_event::{CeilingAdjusted, CeilingSet, InternalEvent},
};

/// Used when a wait timeout cannot be represented as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Computes the damped ceiling after a window with `overload_signals` out of `window_sent`.
///
/// `new = ceiling × (100 − multiplier × 100 × overload / sent) / 100`, never below
/// `min_ceiling` and never above `ceiling`.
pub(crate) fn shrunk_ceiling(
    ceiling: u64,
    window_sent: u64,
    overload_signals: u64,
    multiplier: u64,
    min_ceiling: u64,
) -> u64 {
    if window_sent == 0 || overload_signals == 0 {
        return ceiling;
    }
    let reduction_pct = overload_signals
        .saturating_mul(multiplier)
        .saturating_mul(100)
        / window_sent;
    let keep_pct = 100u64.saturating_sub(reduction_pct);
    let shrunk = ((ceiling as u128 * keep_pct as u128) / 100) as u64;
    shrunk.max(min_ceiling).min(ceiling)
}

/// Owns the ceiling on outstanding requests.
///
/// The ceiling has two writers with different semantics: [`adjust_ceiling`](Self::adjust_ceiling)
/// only ever lowers it and gives way to a concurrent explicit write, while
/// [`set_ceiling`](Self::set_ceiling) overwrites it unconditionally.
#[derive(Debug)]
pub struct AdmissionController {
    counters: Arc<WindowedCounters>,
    ceiling: AtomicU64,
    min_ceiling: u64,
    shrink_multiplier: u64,
    stall_report_interval: Duration,
}

impl AdmissionController {
    pub fn new(counters: Arc<WindowedCounters>, settings: &ThrottleSettings) -> Self {
        let min_ceiling = settings.min_ceiling.max(1);
        Self {
            counters,
            ceiling: AtomicU64::new(settings.initial_ceiling.max(min_ceiling)),
            min_ceiling,
            shrink_multiplier: settings.shrink_multiplier,
            stall_report_interval: settings.stall_report_interval,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling.load(Ordering::Acquire)
    }

    /// Overwrites the ceiling. Values below the minimum are raised to it.
    ///
    /// Returns the value actually stored.
    pub fn set_ceiling(&self, value: u64) -> u64 {
        let value = value.max(self.min_ceiling);
        self.ceiling.store(value, Ordering::Release);
        CeilingSet { value }.emit();
        // A raised ceiling may already satisfy a waiter.
        self.counters.wake_waiters();
        value
    }

    /// Shrinks the ceiling in proportion to the overload ratio of the last window.
    ///
    /// Returns the new ceiling if it was lowered. A concurrent [`set_ceiling`](Self::set_ceiling)
    /// wins over this adjustment.
    pub fn adjust_ceiling(&self, window_sent: u64, overload_signals: u64) -> Option<u64> {
        self.adjust_from(self.ceiling(), window_sent, overload_signals)
    }

    /// Shrinks starting from `observed`. Gives up if the ceiling no longer holds that value.
    fn adjust_from(&self, observed: u64, window_sent: u64, overload_signals: u64) -> Option<u64> {
        if window_sent == 0 || overload_signals == 0 {
            return None;
        }
        let target = shrunk_ceiling(
            observed,
            window_sent,
            overload_signals,
            self.shrink_multiplier,
            self.min_ceiling,
        );
        if target == observed {
            return None;
        }
        match self
            .ceiling
            .compare_exchange(observed, target, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                CeilingAdjusted {
                    from: observed,
                    to: target,
                    overload_pct: overload_signals.saturating_mul(100) / window_sent,
                }
                .emit();
                Some(target)
            }
            Err(actual) => {
                debug!(
                    message = "Ceiling changed concurrently; keeping it.",
                    expected = observed,
                    actual
                );
                None
            }
        }
    }

    /// Suspends until at most `limit` requests are pending or `timeout` elapses.
    ///
    /// `limit` is clamped to the live ceiling on every check, so `u64::MAX` waits for room
    /// below the ceiling and `0` waits for a full drain. While suspended, `on_stall` runs once
    /// per stall-report interval. Returns whether the condition was met; a timeout is a
    /// normal outcome, not an error.
    pub async fn wait_until<F>(&self, limit: u64, timeout: Duration, mut on_stall: F) -> bool
    where
        F: FnMut(),
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut next_stall_report = started + self.stall_report_interval;

        loop {
            let completed = self.counters.completions().notified();
            tokio::pin!(completed);
            // Register before checking, so a completion between check and await is not missed.
            completed.as_mut().enable();

            let pending = self.counters.pending();
            let limit = limit.min(self.ceiling());
            if pending <= limit {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                trace!(message = "Wait timed out.", pending, limit);
                return false;
            }
            if now >= next_stall_report {
                on_stall();
                next_stall_report = now + self.stall_report_interval;
            }

            trace!(message = "Waiting for completions.", pending, limit);
            let _ = timeout_at(deadline.min(next_stall_report), completed).await;
        }
    }
}
