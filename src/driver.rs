//! The benchmark loop: warm up, open the ceiling, then submit as fast as admission allows.

use std::{fmt, future::Future, io, time::Duration};

use objstore_client::{ObjectRequest, ObjectResponse, ThrottledClient};
use tower::Service;

use crate::{
    Error,
    config::{BenchConfig, Method},
    payload::{PayloadGenerator, object_key},
};

const WARM_UP_TIMEOUT: Duration = Duration::from_secs(3);
const CAPACITY_TIMEOUT: Duration = Duration::from_secs(10);
const FINAL_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Totals of a finished run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Requests that never completed, e.g. deferred completions cancelled at shutdown.
    pub pending: u64,
    pub ceiling: u64,
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests submitted, {} completed, {} failures, {} pending",
            self.submitted, self.completed, self.failed, self.pending
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

pub struct Driver<S> {
    config: BenchConfig,
    client: ThrottledClient<S>,
    payloads: PayloadGenerator,
}

impl<S> Driver<S>
where
    S: Service<ObjectRequest, Response = ObjectResponse> + Clone + Send + 'static,
    S::Error: Into<Error> + Send + 'static,
    S::Future: Send + 'static,
{
    pub fn new(config: BenchConfig, client: ThrottledClient<S>) -> Self {
        let payloads = PayloadGenerator::new(config.payload_template.clone(), config.payload_length);
        Self {
            config,
            client,
            payloads,
        }
    }

    /// Runs until every request is submitted and drained, or Ctrl-C is received.
    pub async fn run(&self) -> RunSummary {
        self.run_with_shutdown(tokio::signal::ctrl_c()).await
    }

    /// Runs with an externally supplied shutdown signal. Either way the throttle is drained
    /// briefly, reported on and shut down before returning.
    pub async fn run_with_shutdown<F>(&self, shutdown: F) -> RunSummary
    where
        F: Future<Output = io::Result<()>>,
    {
        info!(
            method = %self.config.method,
            requests = self.config.requests,
            concurrency = self.config.concurrency,
            keys = self.config.keys,
            "Benchmark started."
        );

        let shutdown = async move {
            match shutdown.await {
                Ok(()) => info!("Shutdown signal received."),
                Err(e) => {
                    warn!(error = %e, "Unable to listen for the shutdown signal.");
                    std::future::pending::<()>().await;
                }
            }
        };

        let mut submitted = 0;
        let interrupted = tokio::select! {
            biased;
            _ = shutdown => true,
            _ = self.run_requests(&mut submitted) => false,
        };
        self.finish(submitted, interrupted).await
    }

    async fn run_requests(&self, submitted: &mut u64) {
        let throttle = self.client.throttle();
        if self.config.requests == 0 {
            return;
        }

        self.submit(0);
        *submitted = 1;
        if throttle.drain(WARM_UP_TIMEOUT).await && throttle.last_error().is_empty() {
            let ceiling = throttle.set_ceiling(self.config.concurrency.saturating_mul(2));
            info!(ceiling, "Warm-up request completed, ceiling opened.");
        } else {
            warn!(
                ceiling = throttle.ceiling(),
                pending = throttle.pending(),
                "Warm-up request did not complete cleanly, aborting the run."
            );
            return;
        }

        for n in 1..self.config.requests {
            self.submit(n);
            *submitted += 1;
            if !throttle.wait_for_capacity(CAPACITY_TIMEOUT).await {
                debug!(pending = throttle.pending(), ceiling = throttle.ceiling(), "Still at the ceiling.");
            }
            throttle.maybe_report(self.config.report_interval);
        }

        if !throttle.drain(FINAL_DRAIN_TIMEOUT).await {
            warn!(pending = throttle.pending(), "Requests still pending after the final drain.");
        }
    }

    fn submit(&self, n: u64) {
        let key = object_key(n, self.config.keys);
        // The task reports through the throttle; its handle is not needed.
        let _ = match self.config.method {
            Method::Put => self.client.put(key, self.payloads.payload(n)),
            Method::Get => self.client.get(key),
        };
    }

    async fn finish(&self, submitted: u64, interrupted: bool) -> RunSummary {
        let throttle = self.client.throttle();
        throttle.drain(SHUTDOWN_DRAIN_TIMEOUT).await;
        info!(pending = throttle.pending(), "Shutting down.");

        let report = throttle.report_transfer();
        let last = throttle.last_error();
        if !last.is_empty() {
            warn!(
                status = ?last.status,
                error = ?last.cause.map(|cause| cause.to_string()),
                "Run finished with errors."
            );
        }
        throttle.shutdown();

        RunSummary {
            submitted,
            completed: report.lifetime_completed,
            failed: report.lifetime_failed,
            pending: report.pending,
            ceiling: report.ceiling,
            interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        sync::{Arc, Mutex},
    };

    use http::StatusCode;
    use objstore_client::StoreError;
    use overload_throttle::throttle::Throttle;
    use tower_test::mock::{self, Handle, Mock};

    use super::*;

    fn config(requests: u64, method: Method) -> BenchConfig {
        BenchConfig::builder()
            .endpoint("http://unused")
            .concurrency(5)
            .keys(4)
            .requests(requests)
            .method(method)
            .build()
    }

    fn driver(config: BenchConfig) -> (Driver<Mock<ObjectRequest, ObjectResponse>>, Handle<ObjectRequest, ObjectResponse>) {
        let (service, handle) = mock::pair::<ObjectRequest, ObjectResponse>();
        let throttle = Arc::new(Throttle::new(config.throttle_settings()));
        (Driver::new(config, ThrottledClient::new(service, throttle)), handle)
    }

    /// Answers every request; the first `fail_first` get a 403.
    fn respond(
        mut handle: Handle<ObjectRequest, ObjectResponse>,
        fail_first: usize,
        seen: Arc<Mutex<Vec<ObjectRequest>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut served = 0;
            while let Some((request, send)) = handle.next_request().await {
                seen.lock().unwrap().push(request);
                if served < fail_first {
                    send.send_error(StoreError::ServerError {
                        status: 403,
                        body: "AccessDenied".to_string(),
                    });
                } else {
                    send.send_response(ObjectResponse::new(StatusCode::OK, Some("\"e\"".to_string())));
                }
                served += 1;
            }
        })
    }

    #[tokio::test]
    async fn runs_all_requests_and_opens_ceiling() {
        let (driver, handle) = driver(config(20, Method::Put));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let responder = respond(handle, 0, seen.clone());

        let summary = driver.run_with_shutdown(std::future::pending()).await;
        responder.abort();

        assert_eq!(
            summary,
            RunSummary {
                submitted: 20,
                completed: 20,
                failed: 0,
                pending: 0,
                ceiling: 10,
                interrupted: false,
            }
        );

        let seen = seen.lock().unwrap();
        let keys: BTreeSet<_> = seen.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![
                "benchmark/client00000",
                "benchmark/client00001",
                "benchmark/client00002",
                "benchmark/client00003",
            ]
        );
        assert!(seen.iter().any(|r| matches!(
            r,
            ObjectRequest::Put { payload, .. } if payload.as_ref() == b"Hello, S3, 00000!"
        )));
    }

    #[tokio::test]
    async fn failed_warm_up_aborts_run() {
        let (driver, handle) = driver(config(50, Method::Get));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let responder = respond(handle, 50, seen.clone());

        let summary = driver.run_with_shutdown(std::future::pending()).await;
        responder.abort();

        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ceiling, 10);
        assert!(!summary.interrupted);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], ObjectRequest::Get { .. }));
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_submitting() {
        let (driver, _handle) = driver(config(1000, Method::Put));
        let summary = driver.run_with_shutdown(std::future::ready(Ok(()))).await;
        assert!(summary.interrupted);
        assert_eq!(summary.submitted, 0);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.pending, 0);
    }

    #[test]
    fn summary_display() {
        let summary = RunSummary {
            submitted: 100,
            completed: 98,
            failed: 1,
            pending: 2,
            ceiling: 400,
            interrupted: true,
        };
        assert_eq!(
            summary.to_string(),
            "100 requests submitted, 98 completed, 1 failures, 2 pending (interrupted)"
        );
    }
}
