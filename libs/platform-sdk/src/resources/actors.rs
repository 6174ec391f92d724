use super::{check_limit, not_found_as_none, path_id};
use crate::models::{Actor, ActorSummary, ListOptions, PaginatedList, Run};
use platform_http::{ClassifiedError, HttpClient, Payload};

/// Client for the actor collection
#[derive(Debug, Clone)]
pub struct ActorCollectionClient {
    http: HttpClient,
}

impl ActorCollectionClient {
    pub(crate) fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// List actors with offset pagination.
    ///
    /// # Errors
    /// `Validation` for a zero limit, otherwise the transport error.
    pub async fn list(&self, options: ListOptions) -> Result<PaginatedList<ActorSummary>, ClassifiedError> {
        check_limit(options.limit)?;
        self.http
            .call(self.http.get("acts").query(&options))
            .await?
            .deserialize_data()
    }
}

/// Client for one actor, addressed by id or `owner/name`
#[derive(Debug, Clone)]
pub struct ActorClient {
    http: HttpClient,
    id: String,
}

impl ActorClient {
    pub(crate) fn new(http: HttpClient, id: String) -> Self {
        Self { http, id }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn path(&self, suffix: &str) -> Result<String, ClassifiedError> {
        Ok(format!("acts/{}{suffix}", path_id(&self.id)?))
    }

    /// Fetch the actor, `None` if it does not exist.
    ///
    /// # Errors
    /// Any failure other than a 404.
    pub async fn get(&self) -> Result<Option<Actor>, ClassifiedError> {
        let path = self.path("")?;
        let result = self.http.call(self.http.get(path)).await;
        not_found_as_none(result.and_then(|envelope| envelope.deserialize_data()))
    }

    /// Start a run with `input`.
    ///
    /// Function-valued fields of `input` are sent as their source text.
    ///
    /// # Errors
    /// The transport error, or `InvalidResponseBody` if the run cannot be decoded.
    pub async fn start(&self, input: Payload) -> Result<Run, ClassifiedError> {
        let path = self.path("/runs")?;
        let descriptor = self
            .http
            .post(path)
            .payload(input)
            .stringify_functions(true);
        self.http.call(descriptor).await?.deserialize_data()
    }
}
