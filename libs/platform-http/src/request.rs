use crate::codec::Payload;
use crate::config::{IDEMPOTENCY_KEY_HEADER, RetryPolicy};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

type StreamFactory = dyn Fn() -> BoxStream<'static, Result<Bytes, std::io::Error>> + Send + Sync;

/// Replayable streaming body.
///
/// Holds a factory rather than a live stream so each attempt can re-open it.
#[derive(Clone)]
pub struct StreamSource {
    open: Arc<StreamFactory>,
}

impl StreamSource {
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> BoxStream<'static, Result<Bytes, std::io::Error>> + Send + Sync + 'static,
    {
        Self {
            open: Arc::new(open),
        }
    }

    /// Start a fresh stream for one attempt
    #[must_use]
    pub fn open(&self) -> BoxStream<'static, Result<Bytes, std::io::Error>> {
        (self.open)()
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").finish_non_exhaustive()
    }
}

/// Request body variants
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Absent,
    Bytes(Bytes),
    Text(String),
    /// Serialized by the codec before dispatch
    Structured(Payload),
    Stream(StreamSource),
}

impl RequestBody {
    /// Length of in-memory bodies; `None` for absent, structured and stream bodies
    #[must_use]
    pub fn buffered_len(&self) -> Option<usize> {
        match self {
            Self::Bytes(b) => Some(b.len()),
            Self::Text(t) => Some(t.len()),
            Self::Absent | Self::Structured(_) | Self::Stream(_) => None,
        }
    }
}

/// How the response body should be handed back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    /// Buffer the body and parse it according to its content type
    #[default]
    Bytes,
    /// Decode the body as (lossy) UTF-8 text, whatever the content type
    Text,
}

/// Per-request flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// Overrides the client's function-stringification setting
    pub stringify_functions: Option<bool>,
    /// Keep the raw response bytes and skip parsing
    pub force_buffer: bool,
    pub response_type: ResponseType,
}

/// Everything needed to perform one logical call.
///
/// The retry engine clones it for every attempt; interceptors receive the
/// clone by value and return a transformed copy.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: RequestBody,
    flags: RequestFlags,
    retry_policy: Option<Arc<RetryPolicy>>,
    error: Option<String>,
}

impl RequestDescriptor {
    /// Descriptor for `path`, absolute or relative to the client base URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: RequestBody::Absent,
            flags: RequestFlags::default(),
            retry_policy: None,
            error: None,
        }
    }

    /// Add a header.
    ///
    /// Invalid names or values are remembered and reported as a
    /// `Validation` error when the call is made.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.error = Some(format!("invalid header name '{name}': {e}")),
            (_, Err(e)) => self.error = Some(format!("invalid value for header '{name}': {e}")),
        }
        self
    }

    /// Add a typed header
    #[must_use]
    pub fn typed_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn content_type(self, value: &str) -> Self {
        self.header(CONTENT_TYPE.as_str(), value)
    }

    /// Set an `Idempotency-Key` so the server can discard duplicates of a retried write
    #[must_use]
    pub fn idempotency_key(self, key: &str) -> Self {
        self.header(IDEMPOTENCY_KEY_HEADER, key)
    }

    /// Append one query parameter
    #[must_use]
    pub fn query_pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append the fields of a serializable struct as query parameters.
    ///
    /// `None` fields are skipped by `serde_urlencoded`.
    #[must_use]
    pub fn query<T: Serialize + ?Sized>(mut self, params: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        let pairs = serde_urlencoded::to_string(params)
            .map_err(|e| e.to_string())
            .and_then(|encoded| {
                serde_urlencoded::from_str::<Vec<(String, String)>>(&encoded)
                    .map_err(|e| e.to_string())
            });
        match pairs {
            Ok(pairs) => self.query.extend(pairs),
            Err(e) => self.error = Some(format!("query encoding failed: {e}")),
        }
        self
    }

    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn bytes(self, body: impl Into<Bytes>) -> Self {
        self.body(RequestBody::Bytes(body.into()))
    }

    #[must_use]
    pub fn text(self, body: impl Into<String>) -> Self {
        self.body(RequestBody::Text(body.into()))
    }

    /// Structured body, JSON-encoded by the codec
    #[must_use]
    pub fn payload(self, payload: Payload) -> Self {
        self.body(RequestBody::Structured(payload))
    }

    /// Structured body from any serializable value
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match Payload::from_serializable(value) {
            Ok(payload) => self.body = RequestBody::Structured(payload),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(format!("JSON encoding failed: {e}"));
                }
            }
        }
        self
    }

    #[must_use]
    pub fn stringify_functions(mut self, enabled: bool) -> Self {
        self.flags.stringify_functions = Some(enabled);
        self
    }

    #[must_use]
    pub fn force_buffer(mut self) -> Self {
        self.flags.force_buffer = true;
        self
    }

    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.flags.response_type = response_type;
        self
    }

    /// Override the client's retry policy for this call
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    #[must_use]
    pub fn request_body(&self) -> &RequestBody {
        &self.body
    }

    /// Swap in a new body, returning the old one
    pub fn replace_body(&mut self, body: RequestBody) -> RequestBody {
        std::mem::replace(&mut self.body, body)
    }

    #[must_use]
    pub fn flags(&self) -> RequestFlags {
        self.flags
    }

    #[must_use]
    pub fn policy_override(&self) -> Option<&Arc<RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    /// First deferred builder error, if any
    #[must_use]
    pub fn build_error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
