//! Tower layers composing the client stack
//!
//! - [`UserAgentLayer`] - adds a User-Agent header to wire requests that lack one
//! - [`RetryLayer`] - runs a logical call as retried attempts with exponential backoff

mod retry;
mod user_agent;

pub use retry::{
    RetryEvent, RetryLayer, RetryObserver, RetryService, RetryState, backoff_bounds,
    calculate_backoff, exponential_delay,
};
pub use user_agent::{UserAgentLayer, UserAgentService};
