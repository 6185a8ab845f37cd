//! `reqpipe` is the shared request pipeline behind API SDK resource clients:
//! one executor that builds, sends, retries, classifies and observes JSON
//! HTTP calls.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use reqpipe::prelude::{
//!     CallContext, Client, ClientConfig, InMemoryMetrics, RetryPolicy, W3cTracer,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct CreateLedger<'a> {
//!     name: &'a str,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct Ledger {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metrics = Arc::new(InMemoryMetrics::new());
//!     let client = Client::builder(ClientConfig::new("https://api.example.com/v1"))
//!         .bearer_token("sk_test_123")
//!         .retry_policy(
//!             RetryPolicy::builder()
//!                 .max_retries(3)
//!                 .initial_backoff(Duration::from_millis(100))
//!                 .max_backoff(Duration::from_secs(2))
//!                 .build()?,
//!         )
//!         .tracer(Arc::new(W3cTracer))
//!         .metrics_recorder(metrics.clone())
//!         .try_build()?;
//!
//!     let context = CallContext::new().with_timeout(Duration::from_secs(10));
//!     let ledger: Option<Ledger> = client
//!         .post(&context, "/ledgers", &CreateLedger { name: "ops" })
//!         .await?;
//!
//!     println!("created {ledger:?}; operations={}", metrics.snapshot().operations);
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Use `RetryPolicy::standard()` for SDK traffic.
//! - Bound every call with a `CallContext` deadline, not only the per-attempt timeout.
//! - Keep telemetry off unless a tracer or recorder is actually consumed.

mod auth;
mod classify;
mod client;
mod codec;
mod config;
mod context;
mod error;
mod metrics;
#[cfg(feature = "otel")]
mod otel;
mod retry;
mod telemetry;
mod trace;
mod transport;
mod util;

pub use crate::auth::{AuthTokenProvider, StaticAuthToken};
pub use crate::classify::classify;
pub use crate::client::{Client, ClientBuilder};
pub use crate::codec::{decode_json, encode_json};
pub use crate::config::ClientConfig;
pub use crate::context::CallContext;
pub use crate::error::{Error, ErrorCode, ErrorKind, TransportErrorKind};
pub use crate::metrics::{InMemoryMetrics, MetricsSnapshot};
#[cfg(feature = "otel")]
pub use crate::otel::{OtelMetrics, OtelTracer};
pub use crate::retry::{RetryCondition, RetryPolicy, RetryPolicyBuilder, run_with_retry};
pub use crate::telemetry::{
    ActiveSpan, MetricSample, MetricsRecorder, RouteNormalizer, SpanOutcome,
    StandardRouteNormalizer, Tracer, W3cTracer,
};
pub use crate::trace::{TRACEPARENT_HEADER, TraceContext};
pub use crate::transport::{
    HyperTransport, InboundResult, OutboundRequest, Transport, TransportError,
};
pub use crate::util::append_query_params;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CallContext, Client, ClientBuilder, ClientConfig, Error, ErrorCode, ErrorKind,
        InMemoryMetrics, MetricsSnapshot, Result, RetryCondition, RetryPolicy, StaticAuthToken,
        TraceContext, TransportErrorKind, W3cTracer,
    };
}
