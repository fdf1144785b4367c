use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

/// Opaque cause of a transport-level failure.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Classified result of one operation, as reported to [`Throttle::complete`](super::Throttle::complete).
#[derive(Clone)]
pub enum Outcome {
    Success,
    /// Conditional read whose cached validator still matches. Counts as success.
    NotModified,
    /// The remote side asked to slow down. A rate signal, not a failure.
    Overload,
    /// Any other error status.
    HttpStatus(u16),
    /// The request never produced a response.
    Transport(Cause),
    /// Neither a response nor an error was produced.
    NoResponse,
}

impl Outcome {
    pub fn transport(error: impl Into<crate::Error>) -> Self {
        Outcome::Transport(Arc::from(error.into()))
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "Success"),
            Outcome::NotModified => write!(f, "NotModified"),
            Outcome::Overload => write!(f, "Overload"),
            Outcome::HttpStatus(status) => write!(f, "HttpStatus({status})"),
            Outcome::Transport(cause) => write!(f, "Transport({cause})"),
            Outcome::NoResponse => write!(f, "NoResponse"),
        }
    }
}

/// Latest transport failure and latest error status. Each slot is overwritten by the next
/// qualifying event.
#[derive(Clone, Debug, Default)]
pub struct LastError {
    pub cause: Option<Cause>,
    pub status: Option<u16>,
}

impl LastError {
    pub fn is_empty(&self) -> bool {
        self.cause.is_none() && self.status.is_none()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ErrorState {
    last: Mutex<LastError>,
}

impl ErrorState {
    pub(crate) fn record_cause(&self, cause: Cause) {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).cause = Some(cause);
    }

    pub(crate) fn record_status(&self, status: u16) {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).status = Some(status);
    }

    pub(crate) fn get(&self) -> LastError {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Refused(&'static str);

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection refused: {}", self.0)
        }
    }

    impl std::error::Error for Refused {}

    #[test]
    fn latest_error_wins() {
        let state = ErrorState::default();
        assert!(state.get().is_empty());

        state.record_status(500);
        state.record_status(403);
        state.record_cause(Arc::new(Refused("first")));
        state.record_cause(Arc::new(Refused("second")));

        let last = state.get();
        assert_eq!(last.status, Some(403));
        assert_eq!(
            last.cause.map(|cause| cause.to_string()),
            Some("connection refused: second".to_string())
        );
    }

    #[test]
    fn transport_debug_shows_cause() {
        assert_eq!(
            format!("{:?}", Outcome::transport(Refused("x"))),
            "Transport(connection refused: x)"
        );
    }
}
