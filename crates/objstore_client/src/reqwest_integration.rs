use std::{
    task::{Context, Poll},
    time::Duration,
};

use bon::Builder;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{
    StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
};
use reqwest::Url;
use tower::{
    Service, ServiceBuilder,
    limit::ConcurrencyLimit,
    timeout::Timeout,
};

use crate::{
    http::StoreError,
    request::{ObjectRequest, ObjectResponse},
};

const ACL_HEADER: &str = "x-amz-acl";
const PUT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Connection settings for the object store.
#[derive(Clone, Debug, Builder)]
pub struct StoreConfig {
    #[builder(into)]
    pub endpoint: String,

    #[builder(into, default = "devices".to_string())]
    pub bucket: String,

    /// Bound on requests handed to the transport at the same time.
    #[builder(default = 200)]
    pub concurrency: usize,

    #[builder(default = Duration::from_secs(30))]
    pub op_timeout: Duration,

    pub reqwest_client: Option<reqwest::Client>,
}

/// Full service stack used by the driver.
pub type ObjectStoreService = ConcurrencyLimit<Timeout<ReqwestService>>;

/// Builds the service stack: transport concurrency limit, per-operation timeout, reqwest.
pub fn build_service(config: &StoreConfig) -> Result<ObjectStoreService, StoreError> {
    let client = match &config.reqwest_client {
        Some(client) => client.clone(),
        None => reqwest::Client::builder()
            .pool_max_idle_per_host(config.concurrency)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::InvalidRequest {
                details: format!("Failed to build reqwest client: {}", e),
            })?,
    };
    let service = ReqwestService::new(client, &config.endpoint, &config.bucket)?;

    info!(
        target: "objstore_client",
        endpoint = %config.endpoint,
        bucket = %config.bucket,
        concurrency = config.concurrency,
        "Object store service initialized"
    );

    Ok(ServiceBuilder::new()
        .concurrency_limit(config.concurrency.max(1))
        .timeout(config.op_timeout)
        .service(service))
}

/// A `tower::Service` that performs object-store operations with `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestService {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
}

impl ReqwestService {
    pub fn new(client: reqwest::Client, endpoint: &str, bucket: &str) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint).map_err(|e| StoreError::InvalidRequest {
            details: format!("Invalid endpoint '{}': {}", endpoint, e),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::InvalidRequest {
                details: format!("Endpoint '{}' cannot carry a path", endpoint),
            });
        }
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.to_string(),
        })
    }

    /// `{endpoint}/{bucket}/{key}`, path-style addressing.
    pub fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let url = format!("{}/{}/{}", base, self.bucket, key.trim_start_matches('/'));
        Url::parse(&url).map_err(|e| StoreError::InvalidRequest {
            details: format!("Invalid object URL '{}': {}", url, e),
        })
    }
}

impl Service<ObjectRequest> for ReqwestService {
    type Response = ObjectResponse;
    type Error = StoreError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ObjectRequest) -> Self::Future {
        let url = match self.object_url(request.key()) {
            Ok(url) => url,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let request_builder = match request {
            ObjectRequest::Put { payload, acl, .. } => {
                let mut builder = self
                    .client
                    .put(url)
                    .header(CONTENT_TYPE, PUT_CONTENT_TYPE)
                    .header(CONTENT_LENGTH, payload.len());
                if let Some(acl) = acl {
                    builder = builder.header(ACL_HEADER, acl);
                }
                builder.body(payload)
            }
            ObjectRequest::Get { if_none_match, .. } => {
                let mut builder = self.client.get(url);
                if let Some(etag) = if_none_match {
                    builder = builder.header(IF_NONE_MATCH, etag);
                }
                builder
            }
        };

        let request_future = request_builder.send();
        Box::pin(async move {
            let response = request_future.await.map_err(from_reqwest)?;
            let status = response.status();
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);

            if status.is_success() {
                // Read the object so GET throughput includes the transfer.
                let _body: Bytes = response.bytes().await.map_err(from_reqwest)?;
                Ok(ObjectResponse::new(status, etag))
            } else if status == StatusCode::NOT_MODIFIED {
                Ok(ObjectResponse::new(status, etag))
            } else {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Could not read error body".to_string());
                Err(StoreError::ServerError {
                    status: status.as_u16(),
                    body,
                })
            }
        })
    }
}

fn from_reqwest(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Transport {
            source: Box::new(e),
        }
    }
}
