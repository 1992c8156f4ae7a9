use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::FeedError;

/// Consecutive failures before a URL is blocked.
const FAILURE_THRESHOLD: u32 = 3;
/// How long a tripped URL stays blocked.
const BLOCK_WINDOW: Duration = Duration::from_secs(300);
/// How long permanent-failure entries are remembered.
const FAILED_URL_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
struct UrlState {
    failures: u32,
    blocked_until: Option<Instant>,
}

/// Per-URL circuit breaker.
///
/// Any completed fetch that did not end 2xx/3xx counts as a failure; at
/// [`FAILURE_THRESHOLD`] the URL is blocked for [`BLOCK_WINDOW`] and every
/// call during the window fails fast without network I/O. A success or an
/// expired window resets the counter.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, UrlState>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails fast when the URL is currently blocked.
    ///
    /// # Errors
    ///
    /// [`FeedError::OriginBlocked`] with the remaining block time.
    pub async fn check(&self, url: &str) -> Result<(), FeedError> {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(url) {
            if let Some(until) = state.blocked_until {
                let now = Instant::now();
                if until > now {
                    return Err(FeedError::OriginBlocked {
                        retry_after_secs: (until - now).as_secs().max(1),
                    });
                }
                // Window elapsed: reset and allow a fresh attempt
                states.remove(url);
            }
        }
        Ok(())
    }

    /// Resets the failure counter after a 2xx completion.
    pub async fn record_success(&self, url: &str) {
        self.states.lock().await.remove(url);
    }

    /// Counts a failed completion; trips the breaker at the threshold.
    pub async fn record_failure(&self, url: &str) {
        let mut states = self.states.lock().await;
        let state = states.entry(url.to_owned()).or_default();
        state.failures += 1;
        if state.failures >= FAILURE_THRESHOLD && state.blocked_until.is_none() {
            state.blocked_until = Some(Instant::now() + BLOCK_WINDOW);
            tracing::info!(
                url = url,
                failures = state.failures,
                window_secs = BLOCK_WINDOW.as_secs(),
                "Circuit breaker tripped"
            );
        }
    }
}

/// Why a URL landed in the failed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The origin answered with a non-retryable 4xx.
    PermanentStatus(u16),
    /// The body did not validate as a feed during discovery.
    InvalidFeed,
}

/// Recently failed URLs, remembered for [`FAILED_URL_TTL`].
///
/// Permanent-status entries short-circuit repeat fetches; invalid-feed
/// entries keep discovery from re-probing candidates that already failed
/// validation. Expired entries are dropped lazily on lookup.
#[derive(Debug, Default)]
pub struct FailedUrlSet {
    entries: Mutex<HashMap<String, (FailureKind, Instant)>>,
}

impl FailedUrlSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_status(&self, url: &str, status: u16) {
        self.entries.lock().await.insert(
            url.to_owned(),
            (FailureKind::PermanentStatus(status), Instant::now()),
        );
    }

    pub async fn record_invalid_feed(&self, url: &str) {
        self.entries
            .lock()
            .await
            .insert(url.to_owned(), (FailureKind::InvalidFeed, Instant::now()));
    }

    /// The remembered permanent status, if the URL failed with one recently.
    pub async fn permanent_status(&self, url: &str) -> Option<u16> {
        match self.lookup(url).await {
            Some(FailureKind::PermanentStatus(status)) => Some(status),
            _ => None,
        }
    }

    /// True when the URL failed recently for any reason.
    pub async fn contains(&self, url: &str) -> bool {
        self.lookup(url).await.is_some()
    }

    async fn lookup(&self, url: &str) -> Option<FailureKind> {
        let mut entries = self.entries.lock().await;
        match entries.get(url) {
            Some((kind, at)) if at.elapsed() < FAILED_URL_TTL => Some(*kind),
            Some(_) => {
                entries.remove(url);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/feed";

    #[tokio::test]
    async fn test_breaker_trips_at_three_failures() {
        let breaker = CircuitBreaker::new();

        breaker.record_failure(URL).await;
        breaker.record_failure(URL).await;
        assert!(breaker.check(URL).await.is_ok());

        breaker.record_failure(URL).await;
        let err = breaker.check(URL).await.unwrap_err();
        assert!(matches!(err, FeedError::OriginBlocked { .. }));
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new();

        breaker.record_failure(URL).await;
        breaker.record_failure(URL).await;
        breaker.record_success(URL).await;
        breaker.record_failure(URL).await;
        breaker.record_failure(URL).await;
        assert!(breaker.check(URL).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_expires_after_window() {
        let breaker = CircuitBreaker::new();

        for _ in 0..3 {
            breaker.record_failure(URL).await;
        }
        assert!(breaker.check(URL).await.is_err());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(breaker.check(URL).await.is_ok());

        // Counter was reset along with the block: one failure does not trip
        breaker.record_failure(URL).await;
        assert!(breaker.check(URL).await.is_ok());
    }

    #[tokio::test]
    async fn test_breaker_is_per_url() {
        let breaker = CircuitBreaker::new();

        for _ in 0..3 {
            breaker.record_failure(URL).await;
        }
        assert!(breaker.check(URL).await.is_err());
        assert!(breaker.check("https://other.example.com/").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_set_records_status() {
        let failed = FailedUrlSet::new();
        failed.record_status(URL, 406).await;

        assert_eq!(failed.permanent_status(URL).await, Some(406));
        assert!(failed.contains(URL).await);
        assert!(!failed.contains("https://other.example.com/").await);
    }

    #[tokio::test]
    async fn test_invalid_feed_is_not_a_permanent_status() {
        let failed = FailedUrlSet::new();
        failed.record_invalid_feed(URL).await;

        assert!(failed.contains(URL).await);
        assert_eq!(failed.permanent_status(URL).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_entries_expire() {
        let failed = FailedUrlSet::new();
        failed.record_status(URL, 404).await;

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(failed.permanent_status(URL).await, None);
        assert!(!failed.contains(URL).await);
    }
}
