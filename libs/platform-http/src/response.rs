use crate::error::{BoxError, ClassifiedError, ErrorKind};
use crate::request::RequestDescriptor;
use crate::security::ERROR_BODY_PREVIEW_LIMIT;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Parse `Retry-After` header value into a Duration.
///
/// Supports both formats per RFC 7231:
/// - Delay in seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2015 07:28:00 GMT`
///
/// Returns `None` when the header is missing, unparsable, or in the past.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    let at = httpdate::parse_http_date(trimmed).ok()?;
    at.duration_since(SystemTime::now()).ok()
}

/// Boxed wire body produced by the decompression layer
pub type WireBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Response body after the response phase
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Absent,
    Bytes(Bytes),
    Json(serde_json::Value),
    Text(String),
}

/// Result of one successful attempt
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    request: Arc<RequestDescriptor>,
}

impl ResponseEnvelope {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: ResponseBody,
        request: Arc<RequestDescriptor>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            request,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// The (pipeline-transformed) descriptor this response answers
    #[must_use]
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    #[must_use]
    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Deserialize the body into `T`.
    ///
    /// # Errors
    /// `InvalidResponseBody` if the body is absent or does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ClassifiedError> {
        let result = match &self.body {
            ResponseBody::Json(value) => T::deserialize(value),
            ResponseBody::Text(text) => serde_json::from_str(text),
            ResponseBody::Bytes(bytes) => serde_json::from_slice(bytes),
            ResponseBody::Absent => {
                return Err(ClassifiedError::new(
                    ErrorKind::InvalidResponseBody,
                    "Response has no body",
                )
                .with_status(self.status));
            }
        };
        result.map_err(|e| ClassifiedError::invalid_response_body(self.clone(), e))
    }

    /// Deserialize the `data` member of the platform's `{"data": ...}` wrapper
    ///
    /// # Errors
    /// `InvalidResponseBody` if the wrapper is missing or does not match `T`.
    pub fn deserialize_data<T: DeserializeOwned>(&self) -> Result<T, ClassifiedError> {
        #[derive(serde::Deserialize)]
        struct Wrapper<T> {
            data: T,
        }
        self.deserialize::<Wrapper<T>>().map(|w| w.data)
    }
}

/// Turn a non-2xx envelope into an `HttpStatus` error.
///
/// Message and type come from a `{"error": {"type", "message"}}` body when
/// present, otherwise from the status line and a body preview.
#[must_use]
pub fn status_error(envelope: ResponseEnvelope) -> ClassifiedError {
    let status = envelope.status();
    let raw: &[u8] = match envelope.body() {
        ResponseBody::Bytes(b) => b,
        ResponseBody::Text(t) => t.as_bytes(),
        ResponseBody::Json(_) | ResponseBody::Absent => &[],
    };

    let platform_error = serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .filter(serde_json::Value::is_object);

    let message_of = |field: &str| {
        platform_error
            .as_ref()
            .and_then(|e| e.get(field))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    };
    let error_type = message_of("type");
    let message = message_of("message").unwrap_or_else(|| {
        let end = raw.len().min(ERROR_BODY_PREVIEW_LIMIT);
        let preview = String::from_utf8_lossy(&raw[..end]);
        if preview.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {preview}")
        }
    });

    let retry_after = parse_retry_after(envelope.headers());
    let mut err = ClassifiedError::new(ErrorKind::HttpStatus, message)
        .with_status(status)
        .with_retry_after(retry_after);
    if let Some(error_type) = error_type {
        err = err.with_error_type(error_type);
    }
    err.with_response(envelope)
}

/// Read a response body into memory, failing once it exceeds `limit` bytes.
///
/// A body stream error mid-transfer is a `Network` error; an oversized body
/// is a non-retryable `InvalidResponseBody` (see [`ClassifiedError::body_too_large`]).
///
/// # Errors
/// See above.
pub async fn read_body_limited(
    response: Response<WireBody>,
    limit: usize,
) -> Result<Bytes, ClassifiedError> {
    let (parts, body) = response.into_parts();

    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ClassifiedError::network)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(
                    ClassifiedError::body_too_large(limit, collected.len() + chunk.len())
                        .with_status(parts.status),
                );
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::Method;
    use http_body_util::Full;

    fn envelope(status: u16, body: &'static [u8]) -> ResponseEnvelope {
        ResponseEnvelope::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            ResponseBody::Bytes(Bytes::from_static(body)),
            Arc::new(RequestDescriptor::new(Method::GET, "actors")),
        )
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "  120 ".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_rejects_negative_and_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "-5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(http::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = SystemTime::now() + Duration::from_secs(3600);
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            httpdate::fmt_http_date(future).parse().unwrap(),
        );
        let parsed = parse_retry_after(&headers).unwrap();
        assert!(parsed > Duration::from_secs(3500) && parsed <= Duration::from_secs(3600));

        headers.insert(
            http::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_status_error_uses_platform_error_body() {
        let err = status_error(envelope(
            404,
            br#"{"error":{"type":"record-not-found","message":"Actor was not found"}}"#,
        ));
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(err.http_status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.error_type(), Some("record-not-found"));
        assert_eq!(err.message(), "Actor was not found");
        assert!(err.response().is_some());
    }

    #[test]
    fn test_status_error_falls_back_to_preview() {
        let err = status_error(envelope(502, b"bad gateway"));
        assert_eq!(err.message(), "HTTP 502 Bad Gateway: bad gateway");
        assert!(err.error_type().is_none());

        let err = status_error(envelope(500, b""));
        assert_eq!(err.message(), "HTTP 500 Internal Server Error");
    }

    #[test]
    fn test_deserialize_data_wrapper() {
        #[derive(serde::Deserialize)]
        struct User {
            username: String,
        }
        let env = envelope(200, b"").with_body(ResponseBody::Json(
            serde_json::json!({"data": {"username": "alice"}}),
        ));
        let user: User = env.deserialize_data().unwrap();
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn test_deserialize_mismatch_is_invalid_body() {
        let env = envelope(200, b"").with_body(ResponseBody::Json(serde_json::json!([1, 2])));
        let err = env.deserialize::<std::collections::HashMap<String, u32>>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponseBody);
    }

    #[tokio::test]
    async fn test_read_body_limited() {
        let body = || {
            Full::new(Bytes::from_static(b"0123456789"))
                .map_err(|never| -> BoxError { match never {} })
                .boxed()
        };
        let bytes = read_body_limited(Response::new(body()), 10).await.unwrap();
        assert_eq!(bytes.len(), 10);

        let err = read_body_limited(Response::new(body()), 9).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponseBody);
        assert!(err.is_body_limit_exceeded());
        assert_eq!(err.http_status(), Some(StatusCode::OK));
    }
}
