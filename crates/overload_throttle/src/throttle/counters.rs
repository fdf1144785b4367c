//! Request counters kept for the current measurement window and for the run lifetime.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

/// Plain counter values of one window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterValues {
    pub sent: u64,
    pub completed: u64,
    pub failed: u64,
    pub overload_signals: u64,
}

impl CounterValues {
    fn merged(&self, other: &CounterValues) -> CounterValues {
        CounterValues {
            sent: self.sent + other.sent,
            completed: self.completed + other.completed,
            failed: self.failed + other.failed,
            overload_signals: self.overload_signals + other.overload_signals,
        }
    }
}

#[derive(Debug)]
struct CounterSet {
    start: Instant,
    values: CounterValues,
}

#[derive(Debug)]
struct Windows {
    current: CounterSet,
    lifetime: CounterSet,
}

impl Windows {
    fn pending(&self) -> u64 {
        let sent = self.lifetime.values.sent + self.current.values.sent;
        let completed = self.lifetime.values.completed + self.current.values.completed;
        // Completions are only recorded for previously sent requests, so this never saturates
        // while the lock is held.
        sent.saturating_sub(completed)
    }
}

/// A consistent view of both counter sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Values of the current window.
    pub window: CounterValues,
    /// Lifetime totals, including the current window.
    pub lifetime: CounterValues,
    pub window_elapsed: Duration,
    pub lifetime_elapsed: Duration,
    /// Requests submitted but not yet resolved.
    pub pending: u64,
}

/// Sent/completed/failed/overload counters over a current window and the lifetime of the run.
///
/// All counters live behind one mutex, so [`pending`](Self::pending) and
/// [`transfer_window`](Self::transfer_window) always observe both sets at the same instant.
/// Every recorded completion wakes the tasks suspended in the admission controller.
#[derive(Debug)]
pub struct WindowedCounters {
    windows: Mutex<Windows>,
    completions: Notify,
}

impl Default for WindowedCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowedCounters {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            windows: Mutex::new(Windows {
                current: CounterSet {
                    start: now,
                    values: CounterValues::default(),
                },
                lifetime: CounterSet {
                    start: now,
                    values: CounterValues::default(),
                },
            }),
            completions: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        // Counter updates cannot panic half way, so a poisoned lock still guards valid data.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_sent(&self) {
        self.lock().current.values.sent += 1;
    }

    /// Counts a resolved request and wakes every waiter so it can re-check its limit.
    pub fn record_completed(&self) {
        self.lock().current.values.completed += 1;
        self.completions.notify_waiters();
    }

    /// Counts a failure. Callers still report the completion separately.
    pub fn record_failed(&self) {
        self.lock().current.values.failed += 1;
    }

    pub fn record_overload_signal(&self) {
        self.lock().current.values.overload_signals += 1;
    }

    pub fn pending(&self) -> u64 {
        self.lock().pending()
    }

    /// Time since the current window started.
    pub fn window_elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.lock().current.start)
    }

    /// Reads both counter sets without modifying them.
    pub fn snapshot(&self) -> WindowSnapshot {
        let now = Instant::now();
        let windows = self.lock();
        WindowSnapshot {
            window: windows.current.values,
            lifetime: windows.lifetime.values.merged(&windows.current.values),
            window_elapsed: now.saturating_duration_since(windows.current.start),
            lifetime_elapsed: now.saturating_duration_since(windows.lifetime.start),
            pending: windows.pending(),
        }
    }

    /// Folds the current window into the lifetime totals and starts a new window.
    ///
    /// Returns the values the window held before the reset together with the updated lifetime
    /// totals.
    pub fn transfer_window(&self) -> WindowSnapshot {
        let now = Instant::now();
        let mut windows = self.lock();
        let window = std::mem::take(&mut windows.current.values);
        let window_elapsed = now.saturating_duration_since(windows.current.start);
        windows.current.start = now;
        windows.lifetime.values = windows.lifetime.values.merged(&window);
        WindowSnapshot {
            window,
            lifetime: windows.lifetime.values,
            window_elapsed,
            lifetime_elapsed: now.saturating_duration_since(windows.lifetime.start),
            pending: windows.pending(),
        }
    }

    pub(crate) fn completions(&self) -> &Notify {
        &self.completions
    }

    /// Wakes waiters without recording anything, e.g. after the ceiling was raised.
    pub(crate) fn wake_waiters(&self) {
        self.completions.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_tracks_sent_minus_completed() {
        let counters = WindowedCounters::new();
        assert_eq!(counters.pending(), 0);

        for _ in 0..5 {
            counters.record_sent();
        }
        assert_eq!(counters.pending(), 5);

        counters.record_completed();
        counters.record_completed();
        assert_eq!(counters.pending(), 3);

        // A transfer does not change what is in flight.
        counters.transfer_window();
        assert_eq!(counters.pending(), 3);

        // Completions of requests sent in an earlier window.
        counters.record_completed();
        counters.record_completed();
        counters.record_completed();
        assert_eq!(counters.pending(), 0);
    }

    #[test]
    fn failures_do_not_resolve_requests() {
        let counters = WindowedCounters::new();
        counters.record_sent();
        counters.record_failed();
        assert_eq!(counters.pending(), 1);

        counters.record_completed();
        assert_eq!(counters.pending(), 0);
        assert_eq!(counters.snapshot().lifetime.failed, 1);
    }

    #[test]
    fn transfer_conserves_completions() {
        let counters = WindowedCounters::new();
        let mut observed = 0;

        for round in 1..=4u64 {
            for _ in 0..round * 3 {
                counters.record_sent();
            }
            for _ in 0..round * 2 {
                counters.record_completed();
            }
            observed += counters.snapshot().window.completed;
            let transfer = counters.transfer_window();
            assert_eq!(transfer.window.completed, round * 2);
            assert_eq!(transfer.lifetime.completed, observed);
            assert_eq!(counters.snapshot().window, CounterValues::default());
        }

        counters.record_completed();
        assert_eq!(counters.snapshot().lifetime.completed, observed + 1);
    }

    #[test]
    fn snapshot_is_not_destructive() {
        let counters = WindowedCounters::new();
        counters.record_sent();
        counters.record_overload_signal();

        let first = counters.snapshot();
        let second = counters.snapshot();
        assert_eq!(first.window, second.window);
        assert_eq!(first.window.overload_signals, 1);
        assert_eq!(first.lifetime.sent, 1);
    }

    #[tokio::test]
    async fn transfer_restarts_the_window() {
        tokio::time::pause();
        let counters = WindowedCounters::new();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(counters.window_elapsed(), Duration::from_secs(3));

        let transfer = counters.transfer_window();
        assert_eq!(transfer.window_elapsed, Duration::from_secs(3));
        assert_eq!(counters.window_elapsed(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(2)).await;
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.window_elapsed, Duration::from_secs(2));
        assert_eq!(snapshot.lifetime_elapsed, Duration::from_secs(5));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let counters = std::sync::Arc::new(WindowedCounters::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        counters.record_sent();
                        counters.record_completed();
                        if i % 100 == 0 {
                            counters.transfer_window();
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.lifetime.sent, 8000);
        assert_eq!(snapshot.lifetime.completed, 8000);
        assert_eq!(snapshot.pending, 0);
    }
}
