//! Environment-driven configuration.
//!
//! Every knob has a default; an unset variable means the default and a
//! malformed value falls back to the default with a warning rather than
//! aborting startup.

use std::time::Duration;

/// Runtime configuration for the service.
///
/// All durations are stored resolved; parsing happens once in
/// [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the HTTP adapter binds (`FEEDFORGE_PORT`).
    pub port: u16,

    /// Externally visible base URL, used for feed self-links
    /// (`FEEDFORGE_BASE_URL`).
    pub base_url: String,

    /// How long assembled feeds stay cached (`FEEDFORGE_CACHE_DURATION_SECS`).
    pub cache_duration: Duration,

    /// Hard ceiling on articles per feed (`FEEDFORGE_MAX_ARTICLES`).
    /// A request `limit` can lower but never raise this.
    pub max_articles: usize,

    /// Per-request origin fetch timeout (`FEEDFORGE_REQUEST_TIMEOUT_MS`).
    pub request_timeout: Duration,

    /// Minimum spacing between any two outbound request starts
    /// (`FEEDFORGE_MIN_FETCH_GAP_MS`). Discovery probes use double this.
    pub min_fetch_gap: Duration,

    /// User-Agent sent to origins (`FEEDFORGE_USER_AGENT`).
    pub user_agent: String,

    /// Fixed window for the client-facing rate limiter
    /// (`FEEDFORGE_RATE_WINDOW_SECS`).
    pub rate_window: Duration,

    /// Requests allowed per client per window (`FEEDFORGE_RATE_MAX`).
    pub rate_max: u32,

    /// Production mode hides internal error details from clients
    /// (`FEEDFORGE_ENV=production`).
    pub production: bool,

    /// Allow fetching from private/loopback hosts. Never set in
    /// production; exists so integration tests can point the pipeline at
    /// a local mock server without weakening the SSRF filter elsewhere.
    pub allow_private_hosts: bool,
}

/// Default desktop-Chrome identity. Origins routinely deny obvious bots;
/// a realistic UA keeps the fetcher on the same footing as a browser.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            base_url: "http://localhost:3000".to_owned(),
            cache_duration: Duration::from_secs(3600),
            max_articles: 20,
            request_timeout: Duration::from_millis(10_000),
            min_fetch_gap: Duration::from_millis(100),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            rate_window: Duration::from_secs(60),
            rate_max: 100,
            production: false,
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// Reads configuration from the environment, falling back to defaults
    /// per field.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: env_parsed("FEEDFORGE_PORT", defaults.port),
            base_url: std::env::var("FEEDFORGE_BASE_URL").unwrap_or(defaults.base_url),
            cache_duration: Duration::from_secs(env_parsed(
                "FEEDFORGE_CACHE_DURATION_SECS",
                defaults.cache_duration.as_secs(),
            )),
            max_articles: env_parsed("FEEDFORGE_MAX_ARTICLES", defaults.max_articles).max(1),
            request_timeout: Duration::from_millis(env_parsed(
                "FEEDFORGE_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )),
            min_fetch_gap: Duration::from_millis(env_parsed(
                "FEEDFORGE_MIN_FETCH_GAP_MS",
                defaults.min_fetch_gap.as_millis() as u64,
            )),
            user_agent: std::env::var("FEEDFORGE_USER_AGENT").unwrap_or(defaults.user_agent),
            rate_window: Duration::from_secs(env_parsed(
                "FEEDFORGE_RATE_WINDOW_SECS",
                defaults.rate_window.as_secs(),
            )),
            rate_max: env_parsed("FEEDFORGE_RATE_MAX", defaults.rate_max),
            production: std::env::var("FEEDFORGE_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(defaults.production),
            allow_private_hosts: false,
        }
    }

    /// Channel `<ttl>` in minutes derived from the cache duration.
    pub fn ttl_minutes(&self) -> u32 {
        (self.cache_duration.as_secs() / 60) as u32
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = var, value = %raw, "Unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_duration, Duration::from_secs(3600));
        assert_eq!(config.max_articles, 20);
        assert_eq!(config.min_fetch_gap, Duration::from_millis(100));
        assert!(!config.production);
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_ttl_minutes() {
        let config = Config {
            cache_duration: Duration::from_secs(3600),
            ..Default::default()
        };
        assert_eq!(config.ttl_minutes(), 60);

        let short = Config {
            cache_duration: Duration::from_secs(90),
            ..Default::default()
        };
        assert_eq!(short.ttl_minutes(), 1);
    }

    #[test]
    fn test_env_parsed_fallback() {
        // Unset variable yields the default
        std::env::remove_var("FEEDFORGE_TEST_UNSET");
        assert_eq!(env_parsed("FEEDFORGE_TEST_UNSET", 7u16), 7);

        // Garbage yields the default too
        std::env::set_var("FEEDFORGE_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parsed("FEEDFORGE_TEST_GARBAGE", 7u16), 7);
        std::env::remove_var("FEEDFORGE_TEST_GARBAGE");
    }
}
