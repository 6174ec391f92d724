use super::{not_found_as_none, path_id};
use crate::models::User;
use platform_http::{ClassifiedError, HttpClient};

/// Client for one user; `me` addresses the token's owner
#[derive(Debug, Clone)]
pub struct UserClient {
    http: HttpClient,
    id: String,
}

impl UserClient {
    pub(crate) fn new(http: HttpClient, id: String) -> Self {
        Self { http, id }
    }

    /// Fetch the user, `None` if it does not exist.
    ///
    /// # Errors
    /// Any failure other than a 404.
    pub async fn get(&self) -> Result<Option<User>, ClassifiedError> {
        let path = format!("users/{}", path_id(&self.id)?);
        let result = self.http.call(self.http.get(path)).await;
        not_found_as_none(result.and_then(|envelope| envelope.deserialize_data()))
    }
}
