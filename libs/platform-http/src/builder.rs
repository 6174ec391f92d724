use crate::attempt::{AttemptService, Dispatch, OutgoingBody};
use crate::config::{
    Compression, GzipOptions, HttpClientConfig, RetryPolicy, TlsRootConfig, TransportSecurity,
};
use crate::error::{BoxError, BuildError, ClassifiedError};
use crate::layers::{RetryLayer, RetryObserver, UserAgentLayer};
use crate::pipeline::{InterceptorPipeline, RequestInterceptor, ResponseInterceptor};
use crate::response::WireBody;
use crate::tls;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response};
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use url::Url;

/// Builder for an [`crate::HttpClient`] with a layered tower stack
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    observer: Option<RetryObserver>,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
            observer: None,
        }
    }

    /// Base URL that descriptor paths are resolved against
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Set the per-attempt timeout
    ///
    /// Covers dispatch and reading the body. Each retry gets its own budget.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Header sent with every request unless the descriptor overrides it
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Observe retry state transitions
    #[must_use]
    pub fn retry_observer(mut self, observer: RetryObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.gzip.compression = compression;
        self
    }

    /// Bodies at least this long are gzipped
    #[must_use]
    pub fn min_gzip_bytes(mut self, min_bytes: usize) -> Self {
        self.config.gzip.min_bytes = min_bytes;
        self
    }

    #[must_use]
    pub fn gzip(mut self, gzip: GzipOptions) -> Self {
        self.config.gzip = gzip;
        self
    }

    /// Encode function-valued payload fields as their source text
    #[must_use]
    pub fn stringify_functions(mut self, enabled: bool) -> Self {
        self.config.stringify_functions = enabled;
        self
    }

    /// Append a request interceptor after the built-in gzip and serialize steps
    #[must_use]
    pub fn with_request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    /// Append a response interceptor after the built-in parse step
    #[must_use]
    pub fn with_response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response_interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow insecure HTTP connections (for mock servers only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "platform_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Idle connection timeout for the pool (`None` keeps connections forever)
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Invalid base URL, default headers or user agent, or TLS setup failure.
    pub fn build(self) -> Result<crate::HttpClient, BuildError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let base_url = parse_base_url(&self.config.base_url)?;
        let default_headers = header_map(&self.config.default_headers)?;
        let timeout = self.config.request_timeout;

        let https = tls::https_connector(self.config.tls_roots, self.config.transport)?;
        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle) = self.config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle);
        }
        let hyper_client = client_builder.build::<_, OutgoingBody>(https);

        // Stack, outer to inner:
        //   Retry -> Timeout -> Attempt(pipeline, status check) -> UserAgent -> Decompression -> hyper
        let dispatch = ServiceBuilder::new()
            .layer(UserAgentLayer::try_new(&self.config.user_agent)?)
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(map_decompression_response)
            .map_err(ClassifiedError::network);
        let dispatch: Dispatch = BoxCloneSyncService::new(dispatch);

        let mut pipeline =
            InterceptorPipeline::with_defaults(self.config.gzip, self.config.stringify_functions);
        for interceptor in self.request_interceptors {
            pipeline = pipeline.with_request_interceptor(interceptor);
        }
        for interceptor in self.response_interceptors {
            pipeline = pipeline.with_response_interceptor(interceptor);
        }

        let attempt = AttemptService::new(
            dispatch,
            Arc::new(pipeline),
            Arc::new(base_url.clone()),
            self.config.transport,
            self.config.max_body_size,
        );

        let service = ServiceBuilder::new()
            .layer(RetryLayer::new(self.config.retry.clone()).with_observer(self.observer))
            .service(
                ServiceBuilder::new()
                    .layer(TimeoutLayer::new(timeout))
                    .service(attempt)
                    .map_err(move |e: BoxError| map_tower_error(e, timeout)),
            );

        Ok(crate::HttpClient {
            service: BoxCloneSyncService::new(service),
            base_url: Arc::new(base_url),
            default_headers: Arc::new(default_headers),
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the base URL, making sure relative paths resolve beneath it
fn parse_base_url(raw: &str) -> Result<Url, BuildError> {
    let invalid = |reason: String| BuildError::InvalidBaseUrl {
        url: raw.to_owned(),
        reason,
    };
    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid("URL has no host".to_owned()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap, BuildError> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }
    Ok(headers)
}

/// Map tower errors to `ClassifiedError` with the actual timeout duration
///
/// Errors from the attempt service arrive boxed and are unwrapped unchanged.
fn map_tower_error(err: BoxError, timeout: Duration) -> ClassifiedError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return ClassifiedError::timeout(timeout);
    }
    match err.downcast::<ClassifiedError>() {
        Ok(classified) => *classified,
        Err(other) => ClassifiedError::network(other),
    }
}

/// Box the decompression body into the wire body type
fn map_decompression_response<B>(response: Response<B>) -> Response<WireBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;
    use crate::error::ErrorKind;

    #[test]
    fn test_builder_default() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.request_timeout, Duration::from_secs(360));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.config.retry.max_attempts, 9);
        assert!(builder.request_interceptors.is_empty());
    }

    #[test]
    fn test_builder_setters() {
        let builder = HttpClientBuilder::new()
            .base_url("https://api.example.com/v2")
            .timeout(Duration::from_secs(5))
            .min_gzip_bytes(10)
            .compression(Compression::Disabled)
            .stringify_functions(true)
            .default_header("authorization", "Bearer t");
        assert_eq!(builder.config.request_timeout, Duration::from_secs(5));
        assert_eq!(builder.config.gzip.min_bytes, 10);
        assert_eq!(builder.config.gzip.compression, Compression::Disabled);
        assert!(builder.config.stringify_functions);
        assert_eq!(builder.config.default_headers.len(), 1);
    }

    #[test]
    fn test_parse_base_url_appends_slash() {
        let url = parse_base_url("https://api.example.com/v2").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/");
        assert_eq!(
            url.join("actors").unwrap().as_str(),
            "https://api.example.com/v2/actors"
        );
    }

    #[test]
    fn test_parse_base_url_rejects_garbage() {
        assert!(matches!(
            parse_base_url("not a url"),
            Err(BuildError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            parse_base_url("mailto:someone@example.com"),
            Err(BuildError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_invalid_default_header_fails_build() {
        let result = HttpClientBuilder::new()
            .base_url("https://api.example.com/")
            .default_header("bad header", "v")
            .build();
        assert!(matches!(result, Err(BuildError::InvalidHeaderName(_))));
    }

    #[test]
    fn test_map_tower_error_elapsed() {
        let err: BoxError = Box::new(tower::timeout::error::Elapsed::new());
        let mapped = map_tower_error(err, Duration::from_secs(7));
        assert_eq!(mapped.kind(), ErrorKind::Timeout);
        assert!(mapped.message().contains("7s"));
    }

    #[test]
    fn test_map_tower_error_unwraps_classified() {
        let err: BoxError = Box::new(ClassifiedError::validation("nope"));
        let mapped = map_tower_error(err, Duration::from_secs(1));
        assert_eq!(mapped.kind(), ErrorKind::Validation);
        assert_eq!(mapped.message(), "nope");
    }
}
