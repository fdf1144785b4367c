use std::sync::Arc;

use super::{Outcome, Throttle};

/// Pending-request handle issued by [`Throttle::begin`].
///
/// Resolving it reports the outcome exactly once. A handle dropped unresolved (the task was
/// cancelled or panicked) resolves as [`Outcome::NoResponse`], so the request never stays
/// pending forever.
#[must_use = "an unresolved completion is reported as NoResponse when dropped"]
#[derive(Debug)]
pub struct Completion {
    throttle: Arc<Throttle>,
    resolved: bool,
}

impl Completion {
    pub(super) fn new(throttle: Arc<Throttle>) -> Self {
        Self {
            throttle,
            resolved: false,
        }
    }

    pub fn resolve(mut self, outcome: Outcome) {
        self.resolved = true;
        self.throttle.complete(outcome);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.resolved {
            self.throttle.complete(Outcome::NoResponse);
        }
    }
}
