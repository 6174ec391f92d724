//! Request-body gzip compression.

use crate::config::{Compression, GzipOptions};
use crate::request::{RequestBody, RequestDescriptor};
use bytes::Bytes;
use flate2::write::GzEncoder;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderValue};
use std::io::Write;

/// Gzip the body of `descriptor` when it is worth it.
///
/// Leaves the descriptor untouched when compression is disabled, a
/// `Content-Encoding` is already set, the body is not in-memory bytes or text,
/// or it is shorter than `options.min_bytes`. Encoder failures are logged and
/// also leave it untouched.
#[must_use]
pub fn maybe_compress(mut descriptor: RequestDescriptor, options: &GzipOptions) -> RequestDescriptor {
    if options.compression == Compression::Disabled {
        return descriptor;
    }
    if descriptor.headers().contains_key(CONTENT_ENCODING) {
        tracing::trace!("content-encoding already set, skipping gzip");
        return descriptor;
    }
    let Some(len) = descriptor.request_body().buffered_len() else {
        return descriptor;
    };
    if len < options.min_bytes {
        tracing::trace!(len, min = options.min_bytes, "body below gzip threshold");
        return descriptor;
    }

    let raw: &[u8] = match descriptor.request_body() {
        RequestBody::Bytes(b) => b,
        RequestBody::Text(t) => t.as_bytes(),
        _ => return descriptor,
    };

    match gzip(raw) {
        Ok(compressed) => {
            tracing::trace!(len, compressed = compressed.len(), "gzipped request body");
            if matches!(descriptor.request_body(), RequestBody::Text(_))
                && !descriptor.headers().contains_key(CONTENT_TYPE)
            {
                descriptor.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
            }
            descriptor
                .headers_mut()
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            descriptor.replace_body(RequestBody::Bytes(Bytes::from(compressed)));
            descriptor
        }
        Err(e) => {
            tracing::debug!(error = %e, "gzip failed, sending body uncompressed");
            descriptor
        }
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
