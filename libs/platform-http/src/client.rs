use crate::builder::HttpClientBuilder;
use crate::error::ClassifiedError;
use crate::request::RequestDescriptor;
use crate::response::ResponseEnvelope;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;
use url::Url;

pub(crate) type CallService = BoxCloneSyncService<RequestDescriptor, ResponseEnvelope, ClassifiedError>;

/// Platform HTTP client
///
/// Cheap to clone and `Send + Sync`; clones share the connection pool and the
/// immutable configuration.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: CallService,
    pub(crate) base_url: Arc<Url>,
    pub(crate) default_headers: Arc<HeaderMap>,
}

impl HttpClient {
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Base URL with a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// New descriptor carrying the client's default headers
    #[must_use]
    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::new(method, path);
        descriptor.headers_mut().extend(
            self.default_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        descriptor
    }

    #[must_use]
    pub fn get(&self, path: impl Into<String>) -> RequestDescriptor {
        self.request(Method::GET, path)
    }

    #[must_use]
    pub fn post(&self, path: impl Into<String>) -> RequestDescriptor {
        self.request(Method::POST, path)
    }

    #[must_use]
    pub fn put(&self, path: impl Into<String>) -> RequestDescriptor {
        self.request(Method::PUT, path)
    }

    #[must_use]
    pub fn delete(&self, path: impl Into<String>) -> RequestDescriptor {
        self.request(Method::DELETE, path)
    }

    /// Perform one logical call, retries included
    ///
    /// # Errors
    /// The classified error of the final attempt.
    pub async fn call(&self, descriptor: RequestDescriptor) -> Result<ResponseEnvelope, ClassifiedError> {
        self.service.clone().oneshot(descriptor).await
    }

    /// Perform a call and deserialize the response body
    ///
    /// # Errors
    /// As [`HttpClient::call`], or `InvalidResponseBody` if the body does not match `T`.
    pub async fn call_json<T: DeserializeOwned>(&self, descriptor: RequestDescriptor) -> Result<T, ClassifiedError> {
        self.call(descriptor).await?.deserialize()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::codec::Payload;
    use crate::config::{HttpClientConfig, RetryPolicy};
    use crate::error::ErrorKind;
    use crate::layers::{RetryEvent, RetryObserver, RetryState};
    use crate::response::ResponseBody;
    use bytes::Bytes;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_client(server: &MockServer) -> HttpClient {
        HttpClientBuilder::with_config(HttpClientConfig::for_testing(server.base_url()))
            .build()
            .unwrap()
    }

    fn gzip_compress(data: &[u8]) -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_get_parses_json() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/acts").query_param("limit", "2");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"data": {"total": 0}}));
        });

        let client = test_client(&server);
        let env = client
            .call(client.get("acts").query_pair("limit", "2"))
            .await
            .unwrap();
        assert_eq!(env.status(), http::StatusCode::OK);
        assert_eq!(env.body(), &ResponseBody::Json(json!({"data": {"total": 0}})));
    }

    #[tokio::test]
    async fn test_json_without_content_type_stays_bytes() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/untyped");
            then.status(200).body(r#"{"data":{"total":0}}"#);
        });

        let client = test_client(&server);
        let env = client.call(client.get("untyped")).await.unwrap();
        assert_eq!(
            env.body(),
            &ResponseBody::Bytes(Bytes::from_static(br#"{"data":{"total":0}}"#))
        );
        let data: serde_json::Value = env.deserialize_data().unwrap();
        assert_eq!(data["total"], 0);
    }

    #[tokio::test]
    async fn test_default_headers_and_user_agent_sent() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET)
                .path("/users/me")
                .header("authorization", "Bearer secret")
                .header("user-agent", "sdk-test/1.0");
            then.status(200).body("");
        });

        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing(server.base_url()))
            .default_header("authorization", "Bearer secret")
            .user_agent("sdk-test/1.0")
            .build()
            .unwrap();
        let env = client.call(client.get("users/me")).await.unwrap();

        m.assert();
        assert_eq!(env.body(), &ResponseBody::Absent);
    }

    #[tokio::test]
    async fn test_large_text_body_is_gzipped_on_the_wire() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(PUT)
                .path("/kv/record")
                .header("content-encoding", "gzip");
            then.status(201);
        });

        let client = test_client(&server);
        client
            .call(client.put("kv/record").text("x".repeat(4096)))
            .await
            .unwrap();
        m.assert();
    }

    #[tokio::test]
    async fn test_function_stringification_end_to_end() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/acts/a1/runs").json_body(json!({
                "maxDepth": 1,
                "pageFunction": "async () => 42"
            }));
            then.status(201).json_body(json!({"data": {"id": "run1"}}));
        });

        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing(server.base_url()))
            .stringify_functions(true)
            .build()
            .unwrap();
        let payload = Payload::from(json!({"maxDepth": 1}))
            .with_field("pageFunction", Payload::code("async () => 42"));
        let env = client
            .call(client.post("acts/a1/runs").payload(payload))
            .await
            .unwrap();

        m.assert();
        let run: serde_json::Value = env.deserialize_data().unwrap();
        assert_eq!(run["id"], "run1");
    }

    #[tokio::test]
    async fn test_gzip_response_decompressed_and_parsed() {
        let server = MockServer::start();
        let compressed = gzip_compress(br#"{"items":["a","b"]}"#);
        let _m = server.mock(|when, then| {
            when.method(GET).path("/gz");
            then.status(200)
                .header("content-type", "application/json")
                .header("content-encoding", "gzip")
                .body(compressed);
        });

        let client = test_client(&server);
        let env = client.call(client.get("gz")).await.unwrap();
        assert_eq!(env.body(), &ResponseBody::Json(json!({"items": ["a", "b"]})));
    }

    #[tokio::test]
    async fn test_force_buffer_keeps_raw_bytes() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/raw");
            then.status(200)
                .header("content-type", "application/json")
                .body("{not json");
        });

        let client = test_client(&server);
        let env = client.call(client.get("raw").force_buffer()).await.unwrap();
        assert_eq!(env.body(), &ResponseBody::Bytes(Bytes::from_static(b"{not json")));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_server_errors_retried_until_exhausted() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503).body("unavailable");
        });

        let client = test_client(&server);
        let err = client.call(client.get("flaky")).await.unwrap_err();

        assert_eq!(m.calls(), 3);
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(err.http_status(), Some(http::StatusCode::SERVICE_UNAVAILABLE));
        assert!(err.message().contains("unavailable"));
        assert!(logs_contain("retrying request"));
        assert!(logs_contain("retries exhausted"));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/acts");
            then.status(400).json_body(json!({
                "error": {"type": "invalid-input", "message": "Input is not valid"}
            }));
        });

        let client = test_client(&server);
        let err = client
            .call(client.post("acts").json(&json!({"name": ""})))
            .await
            .unwrap_err();

        assert_eq!(m.calls(), 1);
        assert_eq!(err.error_type(), Some("invalid-input"));
        assert_eq!(err.message(), "Input is not valid");
    }

    #[tokio::test]
    async fn test_malformed_json_retried_then_surfaces() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET).path("/broken");
            then.status(200)
                .header("content-type", "application/json")
                .body("{truncated");
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing(server.base_url()))
            .retry(RetryPolicy::fast(2))
            .retry_observer(RetryObserver::new(move |e: &RetryEvent| {
                sink.lock().unwrap().push(e.state);
            }))
            .build()
            .unwrap();
        let err = client.call(client.get("broken")).await.unwrap_err();

        assert_eq!(m.calls(), 2);
        assert_eq!(err.kind(), ErrorKind::InvalidResponseBody);
        assert_eq!(events.lock().unwrap().last(), Some(&RetryState::Failed));
    }

    #[tokio::test]
    async fn test_oversized_body_not_retried() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET).path("/huge");
            then.status(200).body(vec![b'a'; 4096]);
        });

        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing(server.base_url()))
            .max_body_size(1024)
            .retry(RetryPolicy::fast(5))
            .build()
            .unwrap();
        let err = client.call(client.get("huge")).await.unwrap_err();

        assert_eq!(m.calls(), 1);
        assert_eq!(err.kind(), ErrorKind::InvalidResponseBody);
        assert!(err.is_body_limit_exceeded());
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_classified() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_millis(500)).body("late");
        });

        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing(server.base_url()))
            .timeout(Duration::from_millis(50))
            .retry(RetryPolicy::disabled())
            .build()
            .unwrap();
        let err = client.call(client.get("slow")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        // Nothing listens on the discard port of localhost in CI
        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing("http://127.0.0.1:9/"))
            .retry(RetryPolicy::disabled())
            .build()
            .unwrap();
        let err = client.call(client.get("x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_call_json() {
        #[derive(serde::Deserialize)]
        struct Page {
            count: u64,
        }
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200).json_body(json!({"count": 3}));
        });

        let client = test_client(&server);
        let page: Page = client.call_json(client.get("page")).await.unwrap();
        assert_eq!(page.count, 3);
    }

    #[test]
    fn test_http_client_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<HttpClient>();
    }
}
