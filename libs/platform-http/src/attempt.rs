//! A single attempt: request phase, dispatch, body read, status check, response phase.

use crate::config::TransportSecurity;
use crate::error::{BoxError, ClassifiedError};
use crate::pipeline::InterceptorPipeline;
use crate::request::{RequestBody, RequestDescriptor, ResponseType};
use crate::response::{ResponseBody, ResponseEnvelope, WireBody, read_body_limited, status_error};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::Request;
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};
use url::Url;

/// Request body type handed to hyper
pub type OutgoingBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

/// Type-erased wire transport (user agent, decompression, hyper)
pub type Dispatch = BoxCloneSyncService<Request<OutgoingBody>, http::Response<WireBody>, ClassifiedError>;

/// Inner service of the retry layer
#[derive(Clone)]
pub struct AttemptService {
    dispatch: Dispatch,
    pipeline: Arc<InterceptorPipeline>,
    base_url: Arc<Url>,
    transport: TransportSecurity,
    max_body_size: usize,
}

impl AttemptService {
    pub fn new(
        dispatch: Dispatch,
        pipeline: Arc<InterceptorPipeline>,
        base_url: Arc<Url>,
        transport: TransportSecurity,
        max_body_size: usize,
    ) -> Self {
        Self {
            dispatch,
            pipeline,
            base_url,
            transport,
            max_body_size,
        }
    }
}

impl Service<RequestDescriptor> for AttemptService {
    type Response = ResponseEnvelope;
    type Error = ClassifiedError;
    type Future = Pin<Box<dyn Future<Output = Result<ResponseEnvelope, ClassifiedError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Dispatch readiness is awaited per call via `oneshot`
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, descriptor: RequestDescriptor) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.run(descriptor).await })
    }
}

impl AttemptService {
    async fn run(self, descriptor: RequestDescriptor) -> Result<ResponseEnvelope, ClassifiedError> {
        if let Some(reason) = descriptor.build_error() {
            return Err(ClassifiedError::validation(reason.to_owned()));
        }

        let prepared = Arc::new(self.pipeline.run_request(descriptor)?);
        let request = self.wire_request(&prepared)?;

        let response = send(self.dispatch.clone(), request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let raw = read_body_limited(response, self.max_body_size).await?;

        let body = match prepared.flags().response_type {
            ResponseType::Text if !prepared.flags().force_buffer => {
                ResponseBody::Text(String::from_utf8_lossy(&raw).into_owned())
            }
            _ => ResponseBody::Bytes(raw),
        };
        let envelope = ResponseEnvelope::new(status, headers, body, prepared);

        if !status.is_success() {
            return Err(status_error(envelope));
        }
        self.pipeline.run_response(envelope)
    }

    fn resolve_url(&self, descriptor: &RequestDescriptor) -> Result<Url, ClassifiedError> {
        let mut url = self.base_url.join(descriptor.path()).map_err(|e| {
            ClassifiedError::validation(format!("Invalid URL '{}': {e}", descriptor.path()))
        })?;

        match url.scheme() {
            "https" => {}
            "http" if self.transport == TransportSecurity::AllowInsecureHttp => {}
            "http" => {
                return Err(ClassifiedError::validation(
                    "URL scheme 'http' not allowed: HTTPS required (transport security enforced)",
                ));
            }
            other => {
                return Err(ClassifiedError::validation(format!(
                    "URL scheme '{other}' not allowed: only http and https are supported"
                )));
            }
        }

        if !descriptor.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.query_pairs());
        }
        Ok(url)
    }

    fn wire_request(&self, descriptor: &RequestDescriptor) -> Result<Request<OutgoingBody>, ClassifiedError> {
        let url = self.resolve_url(descriptor)?;

        let body: OutgoingBody = match descriptor.request_body() {
            RequestBody::Absent => full(Bytes::new()),
            RequestBody::Bytes(bytes) => full(bytes.clone()),
            RequestBody::Text(text) => full(Bytes::from(text.clone())),
            RequestBody::Structured(_) => {
                return Err(ClassifiedError::validation(
                    "Structured body reached dispatch without being serialized",
                ));
            }
            RequestBody::Stream(source) => StreamBody::new(
                source
                    .open()
                    .map_ok(Frame::data)
                    .map_err(BoxError::from),
            )
            .boxed_unsync(),
        };

        let mut request = Request::builder()
            .method(descriptor.method().clone())
            .uri(url.as_str())
            .body(body)
            .map_err(|e| ClassifiedError::validation(format!("Failed to build request: {e}")))?;
        *request.headers_mut() = descriptor.headers().clone();
        Ok(request)
    }
}

/// Boxes the dispatch future so its type does not leak into the caller's async state
fn send(
    dispatch: Dispatch,
    request: Request<OutgoingBody>,
) -> Pin<Box<dyn Future<Output = Result<http::Response<WireBody>, ClassifiedError>> + Send>> {
    Box::pin(dispatch.oneshot(request))
}

fn full(bytes: Bytes) -> OutgoingBody {
    Full::new(bytes)
        .map_err(|never| -> BoxError { match never {} })
        .boxed_unsync()
}
