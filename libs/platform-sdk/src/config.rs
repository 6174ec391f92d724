//! Client options and their loading from YAML and the environment.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, then
//! `PLATFORM_`-prefixed environment variables (`PLATFORM_MAX_ATTEMPTS=4`
//! sets `maxAttempts`).

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::value::{Uncased, UncasedStr};
use platform_http::{
    BuildError, DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_GZIP_BYTES, ExponentialBackoff, HttpClient,
    HttpClientBuilder, QUEUE_MAX_ATTEMPTS, RetryPolicy, TransportSecurity,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.example.com/v2/";

/// Largest page the list endpoints accept
pub const DEFAULT_MAX_PAGE_LIMIT: u64 = 1000;

pub const ENV_PREFIX: &str = "PLATFORM_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error("Invalid configuration value '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] BuildError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// SDK client options
///
/// `Debug` output redacts the token.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>`
    pub token: Option<String>,
    /// Total attempts per call, the first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
    pub max_page_limit: u64,
    pub min_gzip_bytes: usize,
    pub stringify_functions: bool,
    /// Per-attempt timeout
    pub timeout_secs: u64,
    /// Appended to the SDK user agent
    pub user_agent_suffix: Option<String>,
    /// Permit `http://` base URLs (mock servers)
    pub allow_insecure_http: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            token: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 250,
            max_page_limit: DEFAULT_MAX_PAGE_LIMIT,
            min_gzip_bytes: DEFAULT_MIN_GZIP_BYTES,
            stringify_functions: false,
            timeout_secs: 360,
            user_agent_suffix: None,
            allow_insecure_http: false,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_ms", &self.jitter_ms)
            .field("max_page_limit", &self.max_page_limit)
            .field("min_gzip_bytes", &self.min_gzip_bytes)
            .field("stringify_functions", &self.stringify_functions)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent_suffix", &self.user_agent_suffix)
            .field("allow_insecure_http", &self.allow_insecure_http)
            .finish()
    }
}

impl ClientOptions {
    /// Options pointing at `base_url`, everything else default
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Layered figment: defaults, then the optional YAML file, then the environment
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).map(env_key).lowercase(false))
    }

    /// Load and validate options.
    ///
    /// # Errors
    /// Returns `ConfigError::Load` for unreadable or mistyped sources and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(path))
    }

    /// Extract and validate options from an existing figment.
    ///
    /// # Errors
    /// As [`ClientOptions::load`].
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let options: Self = figment.extract()?;
        options.validate()?;
        tracing::debug!(
            base_url = %options.base_url,
            max_attempts = options.max_attempts,
            max_page_limit = options.max_page_limit,
            "loaded client options"
        );
        Ok(options)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_owned(),
        };

        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::Invalid {
            field: "baseUrl",
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure_http => {}
            _ => return Err(invalid("baseUrl", "must be an https URL")),
        }
        if self.max_page_limit == 0 {
            return Err(invalid("maxPageLimit", "must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("backoffMultiplier", "must be a finite number >= 1"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid("maxDelayMs", "must not be below baseDelayMs"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeoutSecs", "must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            base: Duration::from_millis(self.base_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    /// Policy for ordinary endpoints
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff(),
            ..RetryPolicy::default()
        }
    }

    /// Policy for request-queue endpoints, never below [`QUEUE_MAX_ATTEMPTS`]
    #[must_use]
    pub fn queue_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(QUEUE_MAX_ATTEMPTS),
            ..self.retry_policy()
        }
    }

    #[must_use]
    pub fn user_agent(&self) -> String {
        let base = concat!("platform-sdk/", env!("CARGO_PKG_VERSION"));
        match self.user_agent_suffix.as_deref() {
            Some(suffix) if !suffix.is_empty() => format!("{base} {suffix}"),
            _ => base.to_owned(),
        }
    }

    /// Build the transport configured by these options.
    ///
    /// # Errors
    /// `ConfigError::Client` when the transport cannot be built.
    pub fn http_client(&self) -> Result<HttpClient, ConfigError> {
        let mut builder = HttpClientBuilder::new()
            .base_url(self.base_url.as_str())
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(self.user_agent())
            .retry(self.retry_policy())
            .min_gzip_bytes(self.min_gzip_bytes)
            .stringify_functions(self.stringify_functions);
        if let Some(token) = &self.token {
            builder = builder.default_header("authorization", format!("Bearer {token}"));
        }
        if self.allow_insecure_http {
            builder = builder.transport(TransportSecurity::AllowInsecureHttp);
        }
        Ok(builder.build()?)
    }
}

/// `MAX_ATTEMPTS` -> `maxAttempts`
fn env_key(key: &UncasedStr) -> Uncased<'_> {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.as_str().chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch.to_ascii_lowercase());
        }
    }
    out.into()
}
