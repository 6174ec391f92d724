use super::{check_limit, not_found_as_none, path_id};
use crate::models::{
    ListRequestsOptions, NewQueueRequest, PaginateOptions, QueueOperationInfo, QueueRequest,
    RequestQueue,
};
use crate::pager::{BoxPageIterator, PageCursor, PageFetch, PageIterator, PageResult};
use platform_http::{ClassifiedError, HttpClient, RequestDescriptor, RetryPolicy};

/// Client for one request queue.
///
/// Every call uses the queue retry policy, which allows more attempts than
/// the client default.
#[derive(Debug, Clone)]
pub struct RequestQueueClient {
    http: HttpClient,
    id: String,
    policy: RetryPolicy,
    max_page_limit: u64,
}

impl RequestQueueClient {
    pub(crate) fn new(http: HttpClient, id: String, policy: RetryPolicy, max_page_limit: u64) -> Self {
        Self {
            http,
            id,
            policy,
            max_page_limit,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn descriptor(
        &self,
        make: fn(&HttpClient, String) -> RequestDescriptor,
        suffix: &str,
    ) -> Result<RequestDescriptor, ClassifiedError> {
        let path = format!("request-queues/{}{suffix}", path_id(&self.id)?);
        Ok(make(&self.http, path).retry_policy(self.policy.clone()))
    }

    /// Fetch the queue, `None` if it does not exist.
    ///
    /// # Errors
    /// Any failure other than a 404.
    pub async fn get(&self) -> Result<Option<RequestQueue>, ClassifiedError> {
        let descriptor = self.descriptor(|http, path| http.get(path), "")?;
        let result = self.http.call(descriptor).await;
        not_found_as_none(result.and_then(|envelope| envelope.deserialize_data()))
    }

    /// One page of requests after `exclusive_start_id`.
    ///
    /// # Errors
    /// `Validation` for a zero limit, otherwise the transport error.
    pub async fn list_requests(
        &self,
        options: ListRequestsOptions,
    ) -> Result<PageResult<QueueRequest>, ClassifiedError> {
        check_limit(options.limit)?;
        let descriptor = self
            .descriptor(|http, path| http.get(path), "/requests")?
            .query(&options);
        self.http.call(descriptor).await?.deserialize_data()
    }

    /// Lazily iterate the queue page by page.
    ///
    /// Pages are at most the configured `maxPageLimit`; `options.limit` caps
    /// the total number of requests yielded.
    #[must_use]
    pub fn paginate_requests(&self, options: PaginateOptions) -> BoxPageIterator<QueueRequest, ClassifiedError> {
        let queue = self.clone();
        let fetch: PageFetch<QueueRequest, ClassifiedError> = Box::new(move |cursor, limit| {
            let queue = queue.clone();
            Box::pin(async move {
                queue
                    .list_requests(ListRequestsOptions::new(limit).after(cursor))
                    .await
            })
        });
        PageIterator::new(
            self.max_page_limit,
            options.limit,
            options.exclusive_start_id.map(PageCursor::from),
            fetch,
        )
    }

    /// Enqueue a request.
    ///
    /// The unique key doubles as the idempotency key, so a retried add
    /// cannot create a second entry.
    ///
    /// # Errors
    /// `Validation` for an empty URL or unique key, otherwise the transport error.
    pub async fn add_request(&self, request: &NewQueueRequest) -> Result<QueueOperationInfo, ClassifiedError> {
        if request.url.trim().is_empty() {
            return Err(ClassifiedError::validation("Request url must not be empty"));
        }
        if request.unique_key.trim().is_empty() {
            return Err(ClassifiedError::validation("Request uniqueKey must not be empty"));
        }
        let descriptor = self
            .descriptor(|http, path| http.post(path), "/requests")?
            .idempotency_key(&request.unique_key)
            .json(request);
        self.http.call(descriptor).await?.deserialize_data()
    }
}
