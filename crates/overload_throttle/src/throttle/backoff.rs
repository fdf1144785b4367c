//! Deferred completion of overloaded requests.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    sync::mpsc,
    time::Instant,
};
use tokio_util::time::DelayQueue;

use super::{
    counters::WindowedCounters,
    internal_event::{CompletionDeferred, InternalEvent},
};

#[derive(Debug)]
enum TimerCommand {
    Complete { at: Instant },
    Shutdown,
}

/// Defers the completion of requests that were answered with an overload signal.
///
/// The overload signal is counted immediately, the completion only after a fixed delay, so
/// the pending count stays high and the driver slows down without counting a failure. All
/// deferred completions share one timer task backed by a [`DelayQueue`].
#[derive(Debug)]
pub struct OverloadBackoff {
    counters: Arc<WindowedCounters>,
    delay: Duration,
    commands: mpsc::UnboundedSender<TimerCommand>,
}

impl OverloadBackoff {
    /// Starts the timer task. Must be called from within a Tokio runtime.
    pub fn spawn(counters: Arc<WindowedCounters>, delay: Duration) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_timer(counters.clone(), receiver));
        Self {
            counters,
            delay,
            commands,
        }
    }

    /// Counts an overload signal and schedules the completion after the delay.
    pub fn defer_completion(&self) {
        self.counters.record_overload_signal();
        let at = Instant::now() + self.delay;
        if self.commands.send(TimerCommand::Complete { at }).is_err() {
            // The timer is gone after shutdown; resolve right away so nothing stays pending.
            debug!(message = "Backoff timer stopped; completing without delay.");
            self.counters.record_completed();
            return;
        }
        CompletionDeferred { delay: self.delay }.emit();
    }

    /// Stops the timer task. Deferred completions that have not fired yet are cancelled.
    pub fn shutdown(&self) {
        let _ = self.commands.send(TimerCommand::Shutdown);
    }
}

async fn run_timer(
    counters: Arc<WindowedCounters>,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
) {
    let mut deferred: DelayQueue<()> = DelayQueue::new();
    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(TimerCommand::Complete { at }) => {
                    deferred.insert_at((), at);
                }
                Some(TimerCommand::Shutdown) | None => break,
            },
            Some(_) = deferred.next(), if !deferred.is_empty() => {
                counters.record_completed();
            }
        }
    }
    if !deferred.is_empty() {
        debug!(
            message = "Cancelled deferred completions.",
            cancelled = deferred.len()
        );
    }
    commands.close();
}
