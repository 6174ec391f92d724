//! Thin resource clients over the shared transport

mod actors;
mod request_queues;
mod users;

pub use actors::{ActorClient, ActorCollectionClient};
pub use request_queues::RequestQueueClient;
pub use users::UserClient;

use platform_http::ClassifiedError;

/// Resource id as a single path segment (`owner/name` becomes `owner~name`)
pub(crate) fn path_id(id: &str) -> Result<String, ClassifiedError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(ClassifiedError::validation("Resource id must not be empty"));
    }
    Ok(trimmed.replace('/', "~"))
}

/// Map a 404 to `Ok(None)`
pub(crate) fn not_found_as_none<T>(result: Result<T, ClassifiedError>) -> Result<Option<T>, ClassifiedError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Reject `limit = 0` before dispatch
pub(crate) fn check_limit(limit: Option<u64>) -> Result<(), ClassifiedError> {
    if limit == Some(0) {
        return Err(ClassifiedError::validation("limit must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use platform_http::ErrorKind;

    #[test]
    fn test_path_id() {
        assert_eq!(path_id("abc123").unwrap(), "abc123");
        assert_eq!(path_id("john/web-scraper").unwrap(), "john~web-scraper");
        assert_eq!(path_id("  ").unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_not_found_as_none() {
        let not_found = ClassifiedError::new(ErrorKind::HttpStatus, "missing")
            .with_status(http::StatusCode::NOT_FOUND);
        assert_eq!(not_found_as_none::<u8>(Err(not_found)).unwrap(), None);
        assert_eq!(not_found_as_none(Ok(5_u8)).unwrap(), Some(5));

        let server = ClassifiedError::new(ErrorKind::HttpStatus, "boom")
            .with_status(http::StatusCode::BAD_GATEWAY);
        assert!(not_found_as_none::<u8>(Err(server)).is_err());
    }

    #[test]
    fn test_check_limit() {
        assert!(check_limit(None).is_ok());
        assert!(check_limit(Some(1)).is_ok());
        assert_eq!(check_limit(Some(0)).unwrap_err().kind(), ErrorKind::Validation);
    }
}
