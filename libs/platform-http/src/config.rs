use crate::error::{ClassifiedError, ErrorKind};
use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for platform requests
pub const DEFAULT_USER_AGENT: &str = concat!("platform-http/", env!("CARGO_PKG_VERSION"));

/// Standard idempotency key header name (display form)
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Header carrying the retry ordinal on repeated attempts
pub const RETRY_ATTEMPT_HEADER: &str = "x-retry-attempt";

/// Total attempts (first attempt included) for ordinary endpoints
pub const DEFAULT_MAX_ATTEMPTS: u32 = 9;

/// Total attempts for request-queue endpoints, which see more rate limiting
pub const QUEUE_MAX_ATTEMPTS: u32 = 10;

/// Default minimum body size, in bytes, before gzip kicks in
pub const DEFAULT_MIN_GZIP_BYTES: usize = 1024;

/// Conditions that trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Connection-level failures (refused, reset, DNS, truncated body)
    Network,
    /// Per-attempt timeout elapsed
    Timeout,
    /// A 2xx response whose body could not be parsed
    InvalidResponseBody,
    /// Specific HTTP status code
    Status(u16),
    /// Any 5xx status
    ServerError,
}

impl RetryTrigger {
    /// HTTP 429 Too Many Requests
    pub const TOO_MANY_REQUESTS: Self = Self::Status(429);

    /// Map an error to the trigger that would allow retrying it.
    ///
    /// Returns `None` for errors no trigger can match (validation failures and
    /// bodies over the size limit).
    #[must_use]
    pub fn for_error(err: &ClassifiedError) -> Option<Self> {
        match err.kind() {
            ErrorKind::Network => Some(Self::Network),
            ErrorKind::Timeout => Some(Self::Timeout),
            ErrorKind::InvalidResponseBody if err.is_body_limit_exceeded() => None,
            ErrorKind::InvalidResponseBody => Some(Self::InvalidResponseBody),
            ErrorKind::HttpStatus => err.http_status().map(|s| Self::Status(s.as_u16())),
            ErrorKind::Validation => None,
        }
    }
}

/// Exponential backoff configuration for retries
///
/// Delay for the zero-based attempt index `i` is
/// `min(max, base * multiplier^i + U[0, jitter])`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry (default: 500ms)
    pub base: Duration,

    /// Upper bound for any single delay (default: 30s)
    pub max: Duration,

    /// Growth factor per attempt (default: 2.0)
    pub multiplier: f64,

    /// Upper bound of the uniform random component added to each delay (default: 250ms)
    pub jitter: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}

impl ExponentialBackoff {
    /// Create backoff with custom base and max durations
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            ..Default::default()
        }
    }

    /// Create fast backoff for testing (1ms base, 20ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            base: Duration::from_millis(1),
            max: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }
}

/// Immutable retry policy shared by all calls of a client
///
/// A call may override it through [`crate::RequestDescriptor::retry_policy`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. `0` behaves like `1`.
    pub max_attempts: u32,

    /// Backoff strategy configuration
    pub backoff: ExponentialBackoff,

    /// Errors matching one of these triggers are retried
    pub retry_on: HashSet<RetryTrigger>,

    /// Use the server's `Retry-After` hint (capped at `backoff.max`) instead of
    /// the computed delay when present (default: false)
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: ExponentialBackoff::default(),
            retry_on: Self::default_triggers(),
            respect_retry_after: false,
        }
    }
}

impl RetryPolicy {
    fn default_triggers() -> HashSet<RetryTrigger> {
        HashSet::from([
            RetryTrigger::Network,
            RetryTrigger::Timeout,
            RetryTrigger::InvalidResponseBody,
            RetryTrigger::TOO_MANY_REQUESTS,
            RetryTrigger::ServerError,
        ])
    }

    /// Policy for request-queue endpoints
    #[must_use]
    pub fn for_queue() -> Self {
        Self {
            max_attempts: QUEUE_MAX_ATTEMPTS,
            ..Self::default()
        }
    }

    /// Policy that performs a single attempt
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Default triggers with fast backoff and the given attempt count
    #[must_use]
    pub fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: ExponentialBackoff::fast(),
            ..Self::default()
        }
    }

    /// Attempt ceiling with the `0 == 1` normalization applied
    #[must_use]
    pub fn attempt_ceiling(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether `err` matches one of the configured triggers.
    ///
    /// Validation failures are never retried. A status matches either its own
    /// `Status(code)` trigger or, for 5xx, `ServerError`.
    #[must_use]
    pub fn should_retry(&self, err: &ClassifiedError) -> bool {
        let Some(trigger) = RetryTrigger::for_error(err) else {
            return false;
        };
        if self.retry_on.contains(&trigger) {
            return true;
        }
        err.kind() == ErrorKind::HttpStatus
            && err.http_status().is_some_and(|s| s.is_server_error())
            && self.retry_on.contains(&RetryTrigger::ServerError)
    }
}

/// Whether request bodies may be gzip-compressed
///
/// Decided once when the client is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Compress eligible bodies
    #[default]
    Gzip,
    /// Never compress
    Disabled,
}

/// Request-body compression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipOptions {
    pub compression: Compression,
    /// Bodies shorter than this are sent as-is
    pub min_bytes: usize,
}

impl Default for GzipOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Gzip,
            min_bytes: DEFAULT_MIN_GZIP_BYTES,
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for every request (default)
    #[default]
    TlsOnly,
    /// Allow plain `http://` URLs. Only for mock servers in tests.
    AllowInsecureHttp,
}

/// Overall client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL every descriptor path is resolved against
    pub base_url: String,

    /// Timeout for a single attempt, covering dispatch and body read (default: 360s)
    pub request_timeout: Duration,

    /// Largest response body read into memory (default: 50 MB)
    pub max_body_size: usize,

    /// User-Agent sent when a request carries none
    pub user_agent: String,

    /// Headers added to every descriptor the client creates
    pub default_headers: Vec<(String, String)>,

    pub retry: RetryPolicy,

    pub gzip: GzipOptions,

    /// Encode function-valued payload fields as their source text (default: false)
    pub stringify_functions: bool,

    pub transport: TransportSecurity,

    pub tls_roots: TlsRootConfig,

    /// Idle connection timeout for the pool (`None` keeps connections forever)
    pub pool_idle_timeout: Option<Duration>,

    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(360),
            max_body_size: 50 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_headers: Vec::new(),
            retry: RetryPolicy::default(),
            gzip: GzipOptions::default(),
            stringify_functions: false,
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// Configuration for tests against local mock servers
    ///
    /// Plain HTTP, short timeout, three attempts with millisecond backoff.
    #[must_use]
    pub fn for_testing(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            retry: RetryPolicy::fast(3),
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: Some(Duration::from_secs(5)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::StatusCode;

    fn status_error(code: u16) -> ClassifiedError {
        let status = StatusCode::from_u16(code).unwrap();
        ClassifiedError::new(ErrorKind::HttpStatus, "status").with_status(status)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(!policy.respect_retry_after);
        assert_eq!(policy.backoff.base, Duration::from_millis(500));
        assert_eq!(policy.backoff.max, Duration::from_secs(30));
        assert_eq!(policy.retry_on.len(), 5);
    }

    #[test]
    fn test_queue_policy_allows_one_more_attempt() {
        assert_eq!(RetryPolicy::for_queue().max_attempts, QUEUE_MAX_ATTEMPTS);
        assert_eq!(QUEUE_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS + 1);
    }

    #[test]
    fn test_attempt_ceiling_normalizes_zero() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempt_ceiling(), 1);
    }

    #[test]
    fn test_should_retry_by_kind() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&ClassifiedError::new(ErrorKind::Network, "reset")));
        assert!(policy.should_retry(&ClassifiedError::new(ErrorKind::Timeout, "slow")));
        assert!(policy.should_retry(&ClassifiedError::new(
            ErrorKind::InvalidResponseBody,
            "bad json"
        )));
        assert!(!policy.should_retry(&ClassifiedError::new(ErrorKind::Validation, "empty id")));
        assert!(!policy.should_retry(&ClassifiedError::body_too_large(10, 20)));
        assert_eq!(RetryTrigger::for_error(&ClassifiedError::body_too_large(10, 20)), None);
    }

    #[test]
    fn test_should_retry_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&status_error(429)));
        assert!(policy.should_retry(&status_error(500)));
        assert!(policy.should_retry(&status_error(503)));
        assert!(!policy.should_retry(&status_error(400)));
        assert!(!policy.should_retry(&status_error(404)));
    }

    #[test]
    fn test_should_retry_explicit_status_without_server_error() {
        let policy = RetryPolicy {
            retry_on: HashSet::from([RetryTrigger::Status(502)]),
            ..RetryPolicy::default()
        };
        assert!(policy.should_retry(&status_error(502)));
        assert!(!policy.should_retry(&status_error(503)));
        assert!(!policy.should_retry(&ClassifiedError::new(ErrorKind::Network, "x")));
    }

    #[test]
    fn test_gzip_defaults() {
        let gzip = GzipOptions::default();
        assert_eq!(gzip.compression, Compression::Gzip);
        assert_eq!(gzip.min_bytes, 1024);
    }

    #[test]
    fn test_config_for_testing() {
        let config = HttpClientConfig::for_testing("http://127.0.0.1:1/");
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff.jitter, Duration::ZERO);
    }
}
