//! Ordered request/response interceptors run once per attempt.

use crate::codec;
use crate::compression;
use crate::config::GzipOptions;
use crate::error::ClassifiedError;
use crate::request::RequestDescriptor;
use crate::response::ResponseEnvelope;
use std::fmt;
use std::sync::Arc;

/// Transforms a descriptor before dispatch
pub trait RequestInterceptor: Send + Sync {
    /// # Errors
    /// Any error aborts the attempt; remaining interceptors are skipped.
    fn intercept(&self, descriptor: RequestDescriptor) -> Result<RequestDescriptor, ClassifiedError>;
}

/// Transforms a successful response before it is returned
pub trait ResponseInterceptor: Send + Sync {
    /// # Errors
    /// Any error fails the attempt; remaining interceptors are skipped.
    fn intercept(&self, envelope: ResponseEnvelope) -> Result<ResponseEnvelope, ClassifiedError>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(RequestDescriptor) -> Result<RequestDescriptor, ClassifiedError> + Send + Sync,
{
    fn intercept(&self, descriptor: RequestDescriptor) -> Result<RequestDescriptor, ClassifiedError> {
        self(descriptor)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(ResponseEnvelope) -> Result<ResponseEnvelope, ClassifiedError> + Send + Sync,
{
    fn intercept(&self, envelope: ResponseEnvelope) -> Result<ResponseEnvelope, ClassifiedError> {
        self(envelope)
    }
}

/// Gzips large bodies
#[derive(Debug, Clone, Copy)]
pub struct GzipInterceptor {
    options: GzipOptions,
}

impl GzipInterceptor {
    #[must_use]
    pub fn new(options: GzipOptions) -> Self {
        Self { options }
    }
}

impl RequestInterceptor for GzipInterceptor {
    fn intercept(&self, descriptor: RequestDescriptor) -> Result<RequestDescriptor, ClassifiedError> {
        Ok(compression::maybe_compress(descriptor, &self.options))
    }
}

/// Encodes structured payloads
#[derive(Debug, Clone, Copy)]
pub struct SerializeInterceptor {
    stringify_functions: bool,
}

impl SerializeInterceptor {
    #[must_use]
    pub fn new(stringify_functions: bool) -> Self {
        Self {
            stringify_functions,
        }
    }
}

impl RequestInterceptor for SerializeInterceptor {
    fn intercept(&self, descriptor: RequestDescriptor) -> Result<RequestDescriptor, ClassifiedError> {
        codec::serialize(descriptor, self.stringify_functions)
    }
}

/// Parses buffered response bodies by content type
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseInterceptor;

impl ResponseInterceptor for ParseInterceptor {
    fn intercept(&self, envelope: ResponseEnvelope) -> Result<ResponseEnvelope, ClassifiedError> {
        codec::parse(envelope)
    }
}

#[derive(Clone, Default)]
pub struct InterceptorPipeline {
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
}

impl InterceptorPipeline {
    /// Empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gzip then serialize on the way out, parse on the way in
    #[must_use]
    pub fn with_defaults(gzip: GzipOptions, stringify_functions: bool) -> Self {
        Self::new()
            .with_request_interceptor(Arc::new(GzipInterceptor::new(gzip)))
            .with_request_interceptor(Arc::new(SerializeInterceptor::new(stringify_functions)))
            .with_response_interceptor(Arc::new(ParseInterceptor))
    }

    /// Append a request interceptor; runs after the existing ones
    #[must_use]
    pub fn with_request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request.push(interceptor);
        self
    }

    /// Append a response interceptor; runs after the existing ones
    #[must_use]
    pub fn with_response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response.push(interceptor);
        self
    }

    /// Run the request phase left to right, stopping at the first error
    ///
    /// # Errors
    /// The first interceptor error.
    pub fn run_request(&self, descriptor: RequestDescriptor) -> Result<RequestDescriptor, ClassifiedError> {
        self.request
            .iter()
            .try_fold(descriptor, |desc, interceptor| interceptor.intercept(desc))
    }

    /// Run the response phase left to right, stopping at the first error
    ///
    /// # Errors
    /// The first interceptor error.
    pub fn run_response(&self, envelope: ResponseEnvelope) -> Result<ResponseEnvelope, ClassifiedError> {
        self.response
            .iter()
            .try_fold(envelope, |env, interceptor| interceptor.intercept(env))
    }
}

impl fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .finish()
    }
}
