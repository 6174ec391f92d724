use crate::response::ResponseEnvelope;
use http::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used as the cause of a [`ClassifiedError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Closed taxonomy of call failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A response arrived but its body could not be parsed
    InvalidResponseBody,
    /// Connection-level failure, including a truncated body transfer
    Network,
    /// The server answered with a non-2xx status
    HttpStatus,
    /// A single attempt exceeded its timeout
    Timeout,
    /// The request was rejected before it left the client
    Validation,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidResponseBody => "invalid-response-body",
            Self::Network => "network",
            Self::HttpStatus => "http-status",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type every call resolves to
///
/// Immutable once built; the `with_*` methods consume and return it.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    status: Option<StatusCode>,
    error_type: Option<String>,
    retry_after: Option<Duration>,
    #[source]
    cause: Option<BoxError>,
    response: Option<Box<ResponseEnvelope>>,
    body_limit_exceeded: bool,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            error_type: None,
            retry_after: None,
            cause: None,
            response: None,
            body_limit_exceeded: false,
        }
    }

    /// Rejected before dispatch
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Connection-level failure wrapping the transport error
    pub fn network(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::new(ErrorKind::Network, format!("Network error: {cause}")).with_boxed_cause(cause)
    }

    /// Attempt timed out after `after`
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Request attempt timed out after {after:?}"),
        )
    }

    /// Body of `envelope` could not be parsed
    pub fn invalid_response_body(envelope: ResponseEnvelope, cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self::new(
            ErrorKind::InvalidResponseBody,
            format!("Failed to parse response body: {cause}"),
        )
        .with_status(envelope.status())
        .with_boxed_cause(cause)
        .with_response(envelope)
    }

    /// Response body grew past the client's `max_body_size`.
    ///
    /// Classified as `InvalidResponseBody` but matches no retry trigger: the
    /// same response would exceed the limit again.
    #[must_use]
    pub fn body_too_large(limit: usize, received: usize) -> Self {
        let mut err = Self::new(
            ErrorKind::InvalidResponseBody,
            format!("Response body too large: limit {limit} bytes, got {received} bytes"),
        );
        err.body_limit_exceeded = true;
        err
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    #[must_use]
    pub fn with_cause(self, cause: impl Into<BoxError>) -> Self {
        self.with_boxed_cause(cause.into())
    }

    fn with_boxed_cause(mut self, cause: BoxError) -> Self {
        self.cause = Some(cause);
        self
    }

    #[must_use]
    pub fn with_response(mut self, envelope: ResponseEnvelope) -> Self {
        self.response = Some(Box::new(envelope));
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn http_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Platform error type from the `{"error": {"type": ...}}` body, if any
    #[must_use]
    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    /// Parsed `Retry-After` hint of an `HttpStatus` error
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Envelope of the response that caused the error, if one arrived
    #[must_use]
    pub fn response(&self) -> Option<&ResponseEnvelope> {
        self.response.as_deref()
    }

    /// Whether the response body exceeded the configured size limit
    #[must_use]
    pub fn is_body_limit_exceeded(&self) -> bool {
        self.body_limit_exceeded
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::HttpStatus && self.status == Some(StatusCode::NOT_FOUND)
    }
}

/// Errors raised while building an [`crate::HttpClient`]
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),
}
