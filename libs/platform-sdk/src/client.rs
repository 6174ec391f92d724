use crate::config::{ClientOptions, ConfigError};
use crate::resources::{ActorClient, ActorCollectionClient, RequestQueueClient, UserClient};
use platform_http::HttpClient;
use std::sync::Arc;

/// Entry point of the SDK.
///
/// Cheap to clone; every resource client shares the same transport.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    http: HttpClient,
    options: Arc<ClientOptions>,
}

impl PlatformClient {
    /// Build a client from validated options.
    ///
    /// # Errors
    /// `ConfigError::Invalid` for out-of-range options, `ConfigError::Client`
    /// when the transport cannot be built.
    pub fn new(options: ClientOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let http = options.http_client()?;
        Ok(Self {
            http,
            options: Arc::new(options),
        })
    }

    /// Build a client from `PLATFORM_*` environment variables.
    ///
    /// # Errors
    /// As [`ClientOptions::load`] and [`PlatformClient::new`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ClientOptions::load(None)?)
    }

    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    #[must_use]
    pub fn actors(&self) -> ActorCollectionClient {
        ActorCollectionClient::new(self.http.clone())
    }

    #[must_use]
    pub fn actor(&self, id: impl Into<String>) -> ActorClient {
        ActorClient::new(self.http.clone(), id.into())
    }

    #[must_use]
    pub fn request_queue(&self, id: impl Into<String>) -> RequestQueueClient {
        RequestQueueClient::new(
            self.http.clone(),
            id.into(),
            self.options.queue_retry_policy(),
            self.options.max_page_limit,
        )
    }

    #[must_use]
    pub fn user(&self, id: impl Into<String>) -> UserClient {
        UserClient::new(self.http.clone(), id.into())
    }

    /// The user owning the configured token
    #[must_use]
    pub fn me(&self) -> UserClient {
        self.user("me")
    }
}
