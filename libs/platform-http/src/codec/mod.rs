//! Body codec: request serialization and content-type driven response parsing.

mod payload;

pub use payload::{FunctionEncoding, Payload};

use crate::error::ClassifiedError;
use crate::request::{RequestBody, RequestDescriptor, ResponseType};
use crate::response::{ResponseBody, ResponseEnvelope};
use http::HeaderMap;
use http::header::{CONTENT_TYPE, HeaderValue};

const JSON_UTF8: &str = "application/json; charset=utf-8";
const TEXT_UTF8: &str = "text/plain; charset=utf-8";

/// How a response body is decoded, derived from its `Content-Type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// `application/json` or any `+json` suffix
    Json,
    /// `text/*`
    Text,
    /// Anything else, including a missing or unparsable header
    Raw,
}

impl ContentKind {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match parse_content_type(headers) {
            Some(Ok(mime)) => Self::from_mime(&mime),
            Some(Err(())) | None => Self::Raw,
        }
    }

    #[must_use]
    pub fn from_mime(mime: &mime::Mime) -> Self {
        if mime.type_() == mime::APPLICATION
            && (mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON))
        {
            Self::Json
        } else if mime.type_() == mime::TEXT {
            Self::Text
        } else {
            Self::Raw
        }
    }
}

/// `None` when the header is missing, `Some(Err)` when it does not parse
fn parse_content_type(headers: &HeaderMap) -> Option<Result<mime::Mime, ()>> {
    let value = headers.get(CONTENT_TYPE)?;
    Some(
        value
            .to_str()
            .map_err(|_| ())
            .and_then(|s| s.parse::<mime::Mime>().map_err(|_| ())),
    )
}

/// Request-phase transform.
///
/// Structured payloads become JSON bytes; text gets a default content type.
/// With function stringification enabled (`default_stringify`, overridable per
/// request) and a content type that parses as JSON, function values are written
/// as their source text.
///
/// # Errors
/// `Validation` if the payload cannot be encoded.
pub fn serialize(
    mut descriptor: RequestDescriptor,
    default_stringify: bool,
) -> Result<RequestDescriptor, ClassifiedError> {
    let stringify = descriptor
        .flags()
        .stringify_functions
        .unwrap_or(default_stringify);

    match descriptor.replace_body(RequestBody::Absent) {
        RequestBody::Structured(payload) => {
            set_default_content_type(descriptor.headers_mut(), JSON_UTF8);

            let functions = match parse_content_type(descriptor.headers()) {
                Some(Ok(mime)) if stringify && ContentKind::from_mime(&mime) == ContentKind::Json => {
                    FunctionEncoding::Source
                }
                _ => FunctionEncoding::Omit,
            };
            tracing::trace!(?functions, "serializing structured body");

            let bytes = payload.to_json_vec(functions).map_err(|e| {
                ClassifiedError::validation(format!("Failed to serialize request body: {e}"))
                    .with_cause(e)
            })?;
            descriptor.replace_body(RequestBody::Bytes(bytes.into()));
        }
        RequestBody::Text(text) => {
            set_default_content_type(descriptor.headers_mut(), TEXT_UTF8);
            descriptor.replace_body(RequestBody::Text(text));
        }
        other => {
            descriptor.replace_body(other);
        }
    }
    Ok(descriptor)
}

fn set_default_content_type(headers: &mut HeaderMap, value: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }
}

/// Response-phase transform.
///
/// Only raw buffers of default-typed, non-`force_buffer` requests are parsed.
/// An empty buffer becomes [`ResponseBody::Absent`].
///
/// # Errors
/// `InvalidResponseBody` carrying the envelope when the body does not parse.
pub fn parse(envelope: ResponseEnvelope) -> Result<ResponseEnvelope, ClassifiedError> {
    let flags = envelope.request().flags();
    if flags.force_buffer || flags.response_type != ResponseType::Bytes {
        return Ok(envelope);
    }
    let ResponseBody::Bytes(raw) = envelope.body() else {
        return Ok(envelope);
    };
    if raw.is_empty() {
        return Ok(envelope.with_body(ResponseBody::Absent));
    }

    let kind = ContentKind::from_headers(envelope.headers());
    tracing::trace!(?kind, len = raw.len(), "parsing response body");

    let parsed = match kind {
        ContentKind::Json => match serde_json::from_slice(raw) {
            Ok(value) => ResponseBody::Json(value),
            Err(e) => return Err(ClassifiedError::invalid_response_body(envelope, e)),
        },
        ContentKind::Text => match String::from_utf8(raw.to_vec()) {
            Ok(text) => ResponseBody::Text(text),
            Err(e) => return Err(ClassifiedError::invalid_response_body(envelope, e)),
        },
        ContentKind::Raw => return Ok(envelope),
    };
    Ok(envelope.with_body(parsed))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn envelope_with(content_type: Option<&str>, body: &'static [u8]) -> ResponseEnvelope {
        envelope_for(RequestDescriptor::new(Method::GET, "x"), content_type, body)
    }

    fn envelope_for(
        request: RequestDescriptor,
        content_type: Option<&str>,
        body: &'static [u8],
    ) -> ResponseEnvelope {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, ct.parse().unwrap());
        }
        ResponseEnvelope::new(
            StatusCode::OK,
            headers,
            ResponseBody::Bytes(Bytes::from_static(body)),
            Arc::new(request),
        )
    }

    fn body_bytes(desc: &RequestDescriptor) -> Bytes {
        match desc.request_body() {
            RequestBody::Bytes(b) => b.clone(),
            other => panic!("expected bytes body, got {other:?}"),
        }
    }

    fn input() -> Payload {
        Payload::from(json!({ "startUrls": ["https://example.com"], "maxDepth": 2 }))
            .with_field("pageFunction", Payload::code("function pageFunction() {}"))
    }

    #[test]
    fn test_content_kind_dispatch() {
        let kind = |ct: &str| ContentKind::from_mime(&ct.parse().unwrap());
        assert_eq!(kind("application/json"), ContentKind::Json);
        assert_eq!(kind("application/json; charset=utf-8"), ContentKind::Json);
        assert_eq!(kind("application/problem+json"), ContentKind::Json);
        assert_eq!(kind("text/html"), ContentKind::Text);
        assert_eq!(kind("image/png"), ContentKind::Raw);
        assert_eq!(ContentKind::from_headers(&HeaderMap::new()), ContentKind::Raw);
    }

    #[test]
    fn test_serialize_structured_sets_json_content_type() {
        let desc = RequestDescriptor::new(Method::POST, "runs").payload(input());
        let out = serialize(desc, false).unwrap();

        assert_eq!(out.headers().get(CONTENT_TYPE).unwrap(), JSON_UTF8);
        let value: Value = serde_json::from_slice(&body_bytes(&out)).unwrap();
        assert!(value.get("pageFunction").is_none());
        assert_eq!(value["maxDepth"], 2);
    }

    #[test]
    fn test_serialize_stringifies_functions_when_enabled() {
        let desc = RequestDescriptor::new(Method::POST, "runs").payload(input());
        let out = serialize(desc, true).unwrap();

        let value: Value = serde_json::from_slice(&body_bytes(&out)).unwrap();
        assert_eq!(value["pageFunction"], "function pageFunction() {}");
        assert_eq!(value["startUrls"], json!(["https://example.com"]));
    }

    #[test]
    fn test_serialize_descriptor_flag_overrides_client() {
        let desc = RequestDescriptor::new(Method::POST, "runs")
            .payload(input())
            .stringify_functions(false);
        let out = serialize(desc, true).unwrap();
        let value: Value = serde_json::from_slice(&body_bytes(&out)).unwrap();
        assert!(value.get("pageFunction").is_none());
    }

    #[test]
    fn test_serialize_unparsable_content_type_keeps_default_output() {
        let desc = RequestDescriptor::new(Method::POST, "runs")
            .content_type("not a mime type")
            .payload(input());
        let out = serialize(desc, true).unwrap();
        let value: Value = serde_json::from_slice(&body_bytes(&out)).unwrap();
        assert!(value.get("pageFunction").is_none());
    }

    #[test]
    fn test_serialize_non_json_content_type_does_not_stringify() {
        let desc = RequestDescriptor::new(Method::POST, "runs")
            .content_type("text/plain")
            .payload(input());
        let out = serialize(desc, true).unwrap();
        let value: Value = serde_json::from_slice(&body_bytes(&out)).unwrap();
        assert!(value.get("pageFunction").is_none());
    }

    #[test]
    fn test_serialize_text_and_bytes() {
        let out = serialize(RequestDescriptor::new(Method::PUT, "kv").text("hello"), false).unwrap();
        assert_eq!(out.headers().get(CONTENT_TYPE).unwrap(), TEXT_UTF8);
        assert!(matches!(out.request_body(), RequestBody::Text(t) if t == "hello"));

        let out = serialize(
            RequestDescriptor::new(Method::PUT, "kv").bytes(Bytes::from_static(b"\x00\x01")),
            false,
        )
        .unwrap();
        assert!(out.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(body_bytes(&out), Bytes::from_static(b"\x00\x01"));
    }

    #[test]
    fn test_serialize_absent_body_passes_through() {
        let out = serialize(RequestDescriptor::new(Method::GET, "actors"), true).unwrap();
        assert!(matches!(out.request_body(), RequestBody::Absent));
        assert!(out.headers().is_empty());
    }

    #[test]
    fn test_parse_empty_buffer_is_absent() {
        let out = parse(envelope_with(Some("application/json"), b"")).unwrap();
        assert_eq!(out.body(), &ResponseBody::Absent);
    }

    #[test]
    fn test_parse_json_and_text() {
        let out = parse(envelope_with(Some("application/json"), br#"{"a":1}"#)).unwrap();
        assert_eq!(out.body(), &ResponseBody::Json(json!({"a": 1})));

        let out = parse(envelope_with(Some("text/plain"), b"hi")).unwrap();
        assert_eq!(out.body(), &ResponseBody::Text("hi".to_owned()));
    }

    #[test]
    fn test_parse_raw_fallback_keeps_bytes() {
        let out = parse(envelope_with(Some("application/octet-stream"), b"\x01")).unwrap();
        assert_eq!(out.body(), &ResponseBody::Bytes(Bytes::from_static(b"\x01")));

        let out = parse(envelope_with(None, b"{}")).unwrap();
        assert_eq!(out.body(), &ResponseBody::Bytes(Bytes::from_static(b"{}")));
    }

    #[test]
    fn test_parse_malformed_json_is_invalid_body() {
        let err = parse(envelope_with(Some("application/json"), b"{not json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponseBody);
        assert!(err.response().is_some());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_parse_skipped_for_force_buffer() {
        let req = RequestDescriptor::new(Method::GET, "x").force_buffer();
        let out = parse(envelope_for(req, Some("application/json"), b"{not json")).unwrap();
        assert_eq!(
            out.body(),
            &ResponseBody::Bytes(Bytes::from_static(b"{not json"))
        );
    }
}
