use crate::Error as CrateError;
use snafu::Snafu;

/// Errors of a single object-store exchange.
///
/// Error statuses are reported as [`StoreError::ServerError`] so that callers can tell an
/// overload response from other failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The request never produced a response (connection, DNS, TLS, broken body).
    #[snafu(display("Object store transport error: {}", source))]
    Transport { source: CrateError },

    /// The request could not be built.
    #[snafu(display("Invalid object store request: {}", details))]
    InvalidRequest { details: String },

    /// The server answered with an error status.
    #[snafu(display("Object store error response (status {}): {}", status, body))]
    ServerError { status: u16, body: String },

    #[snafu(display("Object store request timed out"))]
    Timeout,
}

impl StoreError {
    pub const fn status(&self) -> Option<u16> {
        match self {
            StoreError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }
}
