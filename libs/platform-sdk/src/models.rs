//! Wire models for the resource clients.
//!
//! Timestamps stay ISO-8601 strings; the SDK does not interpret them.

use crate::pager::{CursorItem, PageCursor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Offset-paginated listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedList<T> {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub desc: bool,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Query parameters of offset listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub default_run_options: Option<Value>,
}

/// A started actor run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub act_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub default_dataset_id: Option<String>,
    #[serde(default)]
    pub default_request_queue_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestQueue {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub total_request_count: u64,
    #[serde(default)]
    pub handled_request_count: u64,
    #[serde(default)]
    pub pending_request_count: u64,
}

/// A request stored in a request queue
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    pub id: String,
    pub unique_key: String,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub handled_at: Option<String>,
}

impl CursorItem for QueueRequest {
    fn cursor_id(&self) -> &str {
        &self.id
    }
}

/// Request to enqueue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQueueRequest {
    pub unique_key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Value>,
}

impl NewQueueRequest {
    /// Request whose unique key is its URL
    pub fn for_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            unique_key: url.clone(),
            url,
            method: None,
            user_data: None,
        }
    }
}

/// Outcome of adding a request to a queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOperationInfo {
    pub request_id: String,
    #[serde(default)]
    pub was_already_present: bool,
    #[serde(default)]
    pub was_already_handled: bool,
}

/// Query parameters of a single request-queue listing call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequestsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_start_id: Option<String>,
}

impl ListRequestsOptions {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            exclusive_start_id: None,
        }
    }

    /// Continue after `cursor`
    #[must_use]
    pub fn after(mut self, cursor: Option<PageCursor>) -> Self {
        self.exclusive_start_id = cursor.map(PageCursor::into_string);
        self
    }
}

/// Options for iterating a whole request queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginateOptions {
    /// Total number of requests to yield, `None` for all
    pub limit: Option<u64>,
    /// Request id to continue after
    pub exclusive_start_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub profile: Option<Value>,
    #[serde(default)]
    pub plan: Option<Value>,
}
