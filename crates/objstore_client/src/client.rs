use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use http::StatusCode;
use overload_throttle::throttle::{Outcome, Throttle};
use tokio::{task::JoinHandle, time::Instant};
use tower::{Service, ServiceExt};

use crate::{
    Error as CrateError,
    http::StoreError,
    request::{ObjectRequest, ObjectResponse, OperationKind},
};

/// Statuses the object store uses to ask clients to slow down.
fn is_overload_status(status: u16) -> bool {
    status == StatusCode::SERVICE_UNAVAILABLE.as_u16()
        || status == StatusCode::TOO_MANY_REQUESTS.as_u16()
}

/// Maps the result of one exchange onto the throttle's outcome taxonomy.
pub fn classify(result: Result<ObjectResponse, CrateError>) -> Outcome {
    match result {
        Ok(response) if response.is_not_modified() => Outcome::NotModified,
        Ok(_) => Outcome::Success,
        Err(error) => match error.downcast_ref::<StoreError>().and_then(StoreError::status) {
            Some(status) if is_overload_status(status) => Outcome::Overload,
            Some(status) => Outcome::HttpStatus(status),
            // Timeouts from the service stack land here as well.
            None => Outcome::transport(error),
        },
    }
}

/// Submits object-store operations without waiting for them, counting every submission and
/// completion in the shared [`Throttle`].
///
/// Keeps the last validator (ETag) seen per key so repeated GETs are conditional.
#[derive(Clone)]
pub struct ThrottledClient<S> {
    service: S,
    throttle: Arc<Throttle>,
    validators: Arc<Mutex<HashMap<String, String>>>,
    acl: Option<String>,
}

impl<S> ThrottledClient<S>
where
    S: Service<ObjectRequest, Response = ObjectResponse> + Clone + Send + 'static,
    S::Error: Into<CrateError> + Send + 'static,
    S::Future: Send + 'static,
{
    pub fn new(service: S, throttle: Arc<Throttle>) -> Self {
        Self {
            service,
            throttle,
            validators: Arc::new(Mutex::new(HashMap::new())),
            acl: None,
        }
    }

    /// Canned ACL applied to every PUT.
    pub fn with_acl(mut self, acl: Option<String>) -> Self {
        self.acl = acl;
        self
    }

    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    pub fn validator(&self, key: &str) -> Option<String> {
        self.validators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn put(&self, key: impl Into<String>, payload: impl Into<Bytes>) -> JoinHandle<()> {
        self.submit(ObjectRequest::Put {
            key: key.into(),
            payload: payload.into(),
            acl: self.acl.clone(),
        })
    }

    /// Conditional on the cached validator of the key, if any.
    pub fn get(&self, key: impl Into<String>) -> JoinHandle<()> {
        let key = key.into();
        let if_none_match = self.validator(&key);
        self.submit(ObjectRequest::Get { key, if_none_match })
    }

    fn submit(&self, request: ObjectRequest) -> JoinHandle<()> {
        let completion = self.throttle.begin();
        let mut service = self.service.clone();
        let validators = self.validators.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let key = request.key().to_string();
            let kind = request.kind();
            let sent_validator = match &request {
                ObjectRequest::Get { if_none_match, .. } => if_none_match.clone(),
                ObjectRequest::Put { .. } => None,
            };

            let result = match service.ready().await {
                Ok(ready) => ready.call(request).await.map_err(Into::into),
                Err(e) => Err(e.into()),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if let Ok(response) = &result {
                remember_validator(&validators, &key, kind, sent_validator, response);
            }
            let outcome = classify(result);
            match &outcome {
                Outcome::Success => {
                    debug!(target: "objstore_client", %key, ?kind, elapsed_ms, "Operation succeeded")
                }
                Outcome::NotModified => {
                    debug!(target: "objstore_client", %key, elapsed_ms, "Not modified")
                }
                Outcome::Overload => {
                    debug!(target: "objstore_client", %key, ?kind, elapsed_ms, "Overloaded, completion deferred")
                }
                Outcome::HttpStatus(status) => {
                    warn!(target: "objstore_client", %key, ?kind, elapsed_ms, status, "Operation failed")
                }
                Outcome::Transport(cause) => {
                    warn!(target: "objstore_client", %key, ?kind, elapsed_ms, error = %cause, "Operation failed")
                }
                Outcome::NoResponse => {}
            }
            completion.resolve(outcome);
        })
    }
}

fn remember_validator(
    validators: &Mutex<HashMap<String, String>>,
    key: &str,
    kind: OperationKind,
    sent_validator: Option<String>,
    response: &ObjectResponse,
) {
    if response.is_not_modified() {
        return;
    }
    let Some(etag) = &response.etag else {
        return;
    };
    if kind == OperationKind::Get && sent_validator.as_deref() == Some(etag.as_str()) {
        return;
    }
    debug!(target: "objstore_client", %key, %etag, "Validator updated");
    validators
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key.to_string(), etag.clone());
}
