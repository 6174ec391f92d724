#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Transport core for the platform REST client
//!
//! Every call runs through the same stack:
//! - the interceptor pipeline's request phase (gzip, then body serialization)
//! - dispatch over hyper with rustls (HTTPS only by default), User-Agent
//!   injection and transparent response decompression
//! - body read with a size limit and a per-attempt timeout
//! - the response phase (content-type driven parsing)
//! - the retry engine, which classifies failures and re-runs the attempt with
//!   exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use platform_http::{HttpClient, Payload};
//!
//! let client = HttpClient::builder()
//!     .base_url("https://api.example.com/v2/")
//!     .default_header("authorization", "Bearer <token>")
//!     .stringify_functions(true)
//!     .build()?;
//!
//! let input = Payload::from(serde_json::json!({ "maxDepth": 2 }))
//!     .with_field("pageFunction", Payload::code("async ({ page }) => page.title()"));
//! let run: serde_json::Value = client
//!     .call(client.post("acts/my-actor/runs").payload(input))
//!     .await?
//!     .deserialize_data()?;
//! ```

mod attempt;
mod builder;
mod client;
pub mod codec;
pub mod compression;
mod config;
mod error;
pub mod layers;
pub mod pipeline;
mod request;
mod response;
pub mod security;
mod tls;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use codec::{ContentKind, FunctionEncoding, Payload};
pub use config::{
    Compression, DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_GZIP_BYTES, DEFAULT_USER_AGENT,
    ExponentialBackoff, GzipOptions, HttpClientConfig, IDEMPOTENCY_KEY_HEADER, QUEUE_MAX_ATTEMPTS,
    RETRY_ATTEMPT_HEADER, RetryPolicy, RetryTrigger, TlsRootConfig, TransportSecurity,
};
pub use error::{BoxError, BuildError, ClassifiedError, ErrorKind};
pub use layers::{RetryEvent, RetryLayer, RetryObserver, RetryService, RetryState};
pub use pipeline::{InterceptorPipeline, RequestInterceptor, ResponseInterceptor};
pub use request::{RequestBody, RequestDescriptor, RequestFlags, ResponseType, StreamSource};
pub use response::{ResponseBody, ResponseEnvelope, parse_retry_after};
