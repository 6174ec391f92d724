//! Limits applied when turning responses into errors.

/// Maximum body preview size for error messages (8KB).
///
/// Non-2xx bodies without a platform error object are quoted in the error
/// message up to this many bytes.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;
