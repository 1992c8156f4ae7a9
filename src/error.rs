use thiserror::Error;

use crate::util::UrlError;

/// Errors surfaced by the feed pipeline.
///
/// Every variant maps onto a stable client-facing code and HTTP status;
/// the HTTP adapter renders them without inspecting variant payloads.
/// The enum is `Clone` because cache coalescing fans a single producer's
/// failure out to every waiter.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Malformed URL, blocked host, or invalid request options.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The origin fetch exceeded its deadline.
    #[error("origin request timed out")]
    OriginTimeout,
    /// DNS or connection-level failure reaching the origin.
    #[error("origin unreachable: {0}")]
    OriginUnreachable(String),
    /// The circuit breaker is open for this URL; calls fail fast.
    #[error("origin temporarily blocked, retry in {retry_after_secs}s")]
    OriginBlocked { retry_after_secs: u64 },
    /// The origin answered with a non-retryable 4xx.
    #[error("origin returned client error {status}")]
    OriginClient { status: u16 },
    /// The origin kept answering 5xx through all retries.
    #[error("origin returned server error {status}")]
    OriginServer { status: u16 },
    /// A discovered feed could not be decoded as RSS or Atom.
    ///
    /// The orchestrator downgrades this to a path switch (synthesis);
    /// it only reaches clients from endpoints that parse feeds directly.
    #[error("feed could not be parsed: {0}")]
    FeedParse(String),
    /// The fetched page HTML was unusable.
    #[error("page could not be parsed: {0}")]
    PageParse(String),
    /// Extraction produced no articles that pass validation.
    #[error("no articles found at {0}")]
    NoArticles(String),
    /// Client-facing admission control rejected the request.
    #[error("too many requests")]
    RateLimited,
    /// Anything unexpected. The production error body hides the detail.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FeedError {
    /// HTTP status the adapter responds with.
    pub fn http_status(&self) -> u16 {
        match self {
            FeedError::InvalidInput(_) => 400,
            FeedError::NoArticles(_) => 404,
            FeedError::OriginTimeout => 408,
            FeedError::FeedParse(_) | FeedError::PageParse(_) => 422,
            FeedError::RateLimited => 429,
            FeedError::Internal(_) => 500,
            FeedError::OriginUnreachable(_)
            | FeedError::OriginBlocked { .. }
            | FeedError::OriginClient { .. }
            | FeedError::OriginServer { .. } => 502,
        }
    }

    /// Stable machine-readable code for the client error body.
    pub fn code(&self) -> &'static str {
        match self {
            FeedError::InvalidInput(_) => "INVALID_INPUT",
            FeedError::OriginTimeout => "ORIGIN_TIMEOUT",
            FeedError::OriginUnreachable(_) => "ORIGIN_UNREACHABLE",
            FeedError::OriginBlocked { .. } => "ORIGIN_BLOCKED",
            FeedError::OriginClient { .. } => "ORIGIN_CLIENT_ERROR",
            FeedError::OriginServer { .. } => "ORIGIN_SERVER_ERROR",
            FeedError::FeedParse(_) => "FEED_PARSE_FAILURE",
            FeedError::PageParse(_) => "PAGE_PARSE_FAILURE",
            FeedError::NoArticles(_) => "NO_ARTICLES",
            FeedError::RateLimited => "RATE_LIMITED",
            FeedError::Internal(_) => "INTERNAL",
        }
    }

    /// Operational errors carry their real message to clients even in
    /// production mode; non-operational ones are replaced with a fixed
    /// string there.
    pub fn is_operational(&self) -> bool {
        !matches!(self, FeedError::Internal(_))
    }
}

impl From<UrlError> for FeedError {
    fn from(err: UrlError) -> Self {
        FeedError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(FeedError::InvalidInput("x".into()).http_status(), 400);
        assert_eq!(FeedError::NoArticles("u".into()).http_status(), 404);
        assert_eq!(FeedError::OriginTimeout.http_status(), 408);
        assert_eq!(FeedError::PageParse("x".into()).http_status(), 422);
        assert_eq!(FeedError::RateLimited.http_status(), 429);
        assert_eq!(FeedError::Internal("x".into()).http_status(), 500);
        assert_eq!(
            FeedError::OriginClient { status: 406 }.http_status(),
            502
        );
        assert_eq!(
            FeedError::OriginBlocked {
                retry_after_secs: 60
            }
            .http_status(),
            502
        );
    }

    #[test]
    fn test_url_error_converts_to_invalid_input() {
        let err: FeedError = crate::util::PageUrl::parse("not a url").unwrap_err().into();
        assert!(matches!(err, FeedError::InvalidInput(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_operational_classification() {
        assert!(FeedError::OriginTimeout.is_operational());
        assert!(!FeedError::Internal("boom".into()).is_operational());
    }
}
