#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! # `platform-sdk` - typed client for the platform REST API
//!
//! Built on [`platform_http`], which owns serialization, compression,
//! parsing, retries and error classification. This crate adds:
//!
//! - **Client options** (`config` module) - defaults, YAML file and
//!   `PLATFORM_*` environment loading via figment
//! - **Cursor-based pagination** (`pager` module) - Stream API over list endpoints
//! - **Resource clients** (`resources` module) - actors, request queues, users
//!
//! ## Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use platform_sdk::{ClientOptions, PaginateOptions, PlatformClient};
//!
//! let client = PlatformClient::new(ClientOptions::load(Some("platform.yaml".as_ref()))?)?;
//!
//! if let Some(actor) = client.actor("john/web-scraper").get().await? {
//!     println!("{}", actor.name);
//! }
//!
//! let mut requests = client
//!     .request_queue("my-queue")
//!     .paginate_requests(PaginateOptions::default())
//!     .into_items();
//! while let Some(request) = requests.next().await {
//!     println!("{}", request?.url);
//! }
//! ```

mod client;
pub mod config;
pub mod models;
pub mod pager;
pub mod resources;

pub use client::PlatformClient;
pub use config::{ClientOptions, ConfigError};
pub use models::{
    Actor, ActorSummary, ListOptions, ListRequestsOptions, NewQueueRequest, PaginateOptions,
    PaginatedList, QueueOperationInfo, QueueRequest, RequestQueue, Run, User,
};
pub use pager::{BoxPageIterator, CursorItem, PageCursor, PageIterator, PageResult};

// Re-export the transport types callers handle directly
pub use platform_http::{ClassifiedError, ErrorKind, Payload};
