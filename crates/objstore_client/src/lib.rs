//! Object-store client for the load driver: a `tower` service over `reqwest` that speaks plain
//! HTTP PUT/GET against `{endpoint}/{bucket}/{key}`, and a [`ThrottledClient`] that submits
//! operations through an [`overload_throttle::throttle::Throttle`].
pub mod client;
pub mod http;
pub mod request;
pub mod reqwest_integration;

pub use client::{ThrottledClient, classify};
pub use http::StoreError;
pub use request::{ObjectRequest, ObjectResponse, OperationKind};
pub use reqwest_integration::{ObjectStoreService, ReqwestService, StoreConfig, build_service};

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
