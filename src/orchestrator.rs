//! Request orchestration.
//!
//! [`FeedService`] owns every component — fetcher, discovery engine,
//! extractor, caches — wired in strict dependency order, and implements
//! the per-request decision: cached bytes, pass-through of a discovered
//! native feed, or synthesis from extracted articles. It is the only
//! component that sees all the others; tests construct one against a
//! mock origin by flipping `allow_private_hosts` in the config.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::assemble::{self, FeedKind, PassthroughOverrides};
use crate::cache::{self, CachedFeed, CacheStats, ContentCache};
use crate::config::Config;
use crate::discover::{DiscoveryCapabilities, DiscoveryEngine};
use crate::error::FeedError;
use crate::extract::ContentExtractor;
use crate::fetch::{FailedUrlSet, FetchProfile, OriginFetcher};
use crate::model::{Article, DiscoveryOutcome, FeedEnvelope, FeedOptions, Strategy};
use crate::parse;
use crate::util::{validate_public, PageUrl};

/// Per-outcome counters, shared across workers.
#[derive(Debug, Default)]
pub struct ServiceStats {
    strategy_hits: [AtomicU64; Strategy::ALL.len()],
    passthrough_count: AtomicU64,
    synthesized_count: AtomicU64,
    passthrough_ms: AtomicU64,
    synthesized_ms: AtomicU64,
}

impl ServiceStats {
    fn record_strategy(&self, strategy: Strategy) {
        let index = Strategy::ALL
            .iter()
            .position(|s| *s == strategy)
            .unwrap_or(0);
        self.strategy_hits[index].fetch_add(1, Ordering::Relaxed);
    }

    fn record_passthrough(&self, elapsed_ms: u64) {
        self.passthrough_count.fetch_add(1, Ordering::Relaxed);
        self.passthrough_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    fn record_synthesized(&self, elapsed_ms: u64) {
        self.synthesized_count.fetch_add(1, Ordering::Relaxed);
        self.synthesized_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }
}

/// Snapshot of service statistics for `/cache/stats`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub cache: CacheStats,
    /// Hit counts for every strategy, including the capability-gated
    /// ones, so the shape never changes with configuration.
    pub discovery_hits: BTreeMap<&'static str, u64>,
    pub passthrough_feeds: u64,
    pub synthesized_feeds: u64,
    pub avg_passthrough_ms: u64,
    pub avg_synthesized_ms: u64,
}

/// `/metadata` response payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMetadata {
    pub url: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_strategy: Option<&'static str>,
    pub article_count: usize,
    pub sample: Vec<Article>,
}

/// `/validate` response payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub accessible: bool,
    pub can_scrape: bool,
    pub has_rss_feed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The dependency-injected context behind every endpoint.
pub struct FeedService {
    config: Config,
    fetcher: Arc<OriginFetcher>,
    discovery: Arc<DiscoveryEngine>,
    extractor: Arc<ContentExtractor>,
    cache: ContentCache,
    stats: Arc<ServiceStats>,
}

impl FeedService {
    /// Wires the components in dependency order:
    /// fetcher → parser → extractor → discovery → assembler → here.
    ///
    /// # Errors
    ///
    /// [`FeedError::Internal`] when the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, FeedError> {
        Self::with_capabilities(config, DiscoveryCapabilities::default())
    }

    pub fn with_capabilities(
        config: Config,
        capabilities: DiscoveryCapabilities,
    ) -> Result<Self, FeedError> {
        let failed = Arc::new(FailedUrlSet::new());
        let fetcher = Arc::new(OriginFetcher::new(&config, failed)?);
        let discovery = Arc::new(DiscoveryEngine::new(fetcher.clone(), capabilities));
        let extractor = Arc::new(ContentExtractor::new());
        let cache = ContentCache::new(config.cache_duration);

        Ok(Self {
            config,
            fetcher,
            discovery,
            extractor,
            cache,
            stats: Arc::new(ServiceStats::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// The generator string stamped into every produced feed.
    pub fn generator() -> String {
        format!("feedforge {}", env!("CARGO_PKG_VERSION"))
    }

    /// Resolves a feed request: cache, then coalesced production via
    /// pass-through or synthesis.
    ///
    /// # Errors
    ///
    /// [`FeedError::InvalidInput`] for bad URLs/options before anything
    /// else runs; otherwise whatever the producing pipeline surfaced.
    pub async fn feed(&self, raw_url: &str, opts: FeedOptions) -> Result<CachedFeed, FeedError> {
        let page = self.admit(raw_url)?;
        opts.validate()?;

        let key = cache::cache_key(&page, &opts);
        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!(url = %page, "Content cache hit");
            return Ok(cached);
        }

        let fetcher = self.fetcher.clone();
        let discovery = self.discovery.clone();
        let extractor = self.extractor.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let producer_page = page.clone();
        let producer_opts = opts.clone();

        self.cache
            .produce(&key, async move {
                produce_feed(
                    fetcher,
                    discovery,
                    extractor,
                    config,
                    stats,
                    producer_page,
                    producer_opts,
                )
                .await
            })
            .await
    }

    /// First `limit` articles as records, no feed assembly.
    ///
    /// # Errors
    ///
    /// Same admission errors as [`feed`](Self::feed), plus
    /// [`FeedError::NoArticles`] when the page yields nothing.
    pub async fn preview(
        &self,
        raw_url: &str,
        limit: Option<usize>,
        page_index: usize,
    ) -> Result<Vec<Article>, FeedError> {
        let page = self.admit(raw_url)?;
        FeedOptions {
            limit,
            ..Default::default()
        }
        .validate()?;

        let limit = effective_limit(limit, self.config.max_articles);
        let articles = self.collect_articles(&page).await?;

        Ok(articles
            .into_iter()
            .skip(page_index.saturating_mul(limit))
            .take(limit)
            .collect())
    }

    /// Discovery result plus a sample of extracted/parsed articles.
    ///
    /// # Errors
    ///
    /// Admission errors; article collection failures degrade to an empty
    /// sample rather than failing the endpoint.
    pub async fn metadata(&self, raw_url: &str) -> Result<SiteMetadata, FeedError> {
        let page = self.admit(raw_url)?;

        let (feed_url, strategy) = match self.discovery.discover(&page).await {
            DiscoveryOutcome::Found { feed_url, strategy } => {
                (Some(feed_url.to_string()), Some(strategy.as_str()))
            }
            _ => (None, None),
        };

        let articles = self.collect_articles(&page).await.unwrap_or_default();

        Ok(SiteMetadata {
            url: page.as_str().to_owned(),
            domain: page.registrable_domain(),
            feed_url,
            discovery_strategy: strategy,
            article_count: articles.len(),
            sample: articles.into_iter().take(3).collect(),
        })
    }

    /// Answers "can this URL become a feed?" without producing one.
    /// Never fails: problems land in `reason`.
    pub async fn validate(&self, raw_url: &str) -> ValidationReport {
        let page = match self.admit(raw_url) {
            Ok(page) => page,
            Err(e) => {
                return ValidationReport {
                    accessible: false,
                    can_scrape: false,
                    has_rss_feed: false,
                    rss_url: None,
                    reason: Some(e.to_string()),
                }
            }
        };

        let (has_rss_feed, rss_url) = match self.discovery.discover(&page).await {
            DiscoveryOutcome::Found { feed_url, .. } => (true, Some(feed_url.to_string())),
            _ => (false, None),
        };

        let (accessible, can_scrape, reason) = match self
            .fetcher
            .get_body(page.as_url(), FetchProfile::Standard)
            .await
        {
            Ok(body) => {
                let scrape = self
                    .extractor
                    .extract(&body.text(), &page, self.config.max_articles)
                    .is_ok();
                (true, scrape, None)
            }
            Err(e) => (false, false, Some(e.to_string())),
        };

        ValidationReport {
            accessible,
            can_scrape,
            has_rss_feed,
            rss_url,
            reason,
        }
    }

    /// Statistics snapshot for the cache endpoint.
    pub async fn stats(&self) -> StatsSnapshot {
        let mut discovery_hits = BTreeMap::new();
        for (index, strategy) in Strategy::ALL.iter().enumerate() {
            discovery_hits.insert(
                strategy.as_str(),
                self.stats.strategy_hits[index].load(Ordering::Relaxed),
            );
        }

        let passthrough = self.stats.passthrough_count.load(Ordering::Relaxed);
        let synthesized = self.stats.synthesized_count.load(Ordering::Relaxed);

        StatsSnapshot {
            cache: self.cache.stats().await,
            discovery_hits,
            passthrough_feeds: passthrough,
            synthesized_feeds: synthesized,
            avg_passthrough_ms: average(
                self.stats.passthrough_ms.load(Ordering::Relaxed),
                passthrough,
            ),
            avg_synthesized_ms: average(
                self.stats.synthesized_ms.load(Ordering::Relaxed),
                synthesized,
            ),
        }
    }

    /// Clears the content cache — everything, or one page's entries.
    /// The discovery cache is independent and stays intact unless the
    /// whole cache is being dropped.
    ///
    /// # Errors
    ///
    /// [`FeedError::InvalidInput`] for an unparseable page URL.
    pub async fn clear_cache(&self, url: Option<&str>) -> Result<usize, FeedError> {
        match url {
            Some(raw) => {
                let page = PageUrl::parse(raw)?;
                Ok(self.cache.clear_by_page(&page).await)
            }
            None => {
                self.cache.clear().await;
                self.discovery.clear().await;
                Ok(0)
            }
        }
    }

    /// Parses and admission-checks a raw URL.
    fn admit(&self, raw_url: &str) -> Result<PageUrl, FeedError> {
        let page = PageUrl::parse(raw_url)?;
        if !self.config.allow_private_hosts {
            validate_public(page.as_url())?;
        }
        Ok(page)
    }

    /// Articles for preview/metadata: native feed when one is
    /// discovered and parses, extraction otherwise.
    async fn collect_articles(&self, page: &PageUrl) -> Result<Vec<Article>, FeedError> {
        if let DiscoveryOutcome::Found { feed_url, .. } = self.discovery.discover(page).await {
            if let Ok(body) = self.fetcher.get_body(&feed_url, FetchProfile::Standard).await {
                if let Ok(parsed) = parse::parse_feed(&body.bytes) {
                    return Ok(parsed.articles);
                }
            }
        }

        let body = self
            .fetcher
            .get_body(page.as_url(), FetchProfile::Standard)
            .await?;
        self.extractor
            .extract(&body.text(), page, self.config.max_articles)
    }
}

/// The production pipeline behind a cache miss. Runs on a detached task
/// (see the cache's coalescing), so everything is owned.
async fn produce_feed(
    fetcher: Arc<OriginFetcher>,
    discovery: Arc<DiscoveryEngine>,
    extractor: Arc<ContentExtractor>,
    config: Config,
    stats: Arc<ServiceStats>,
    page: PageUrl,
    opts: FeedOptions,
) -> Result<CachedFeed, FeedError> {
    let started = std::time::Instant::now();
    let limit = effective_limit(opts.limit, config.max_articles);
    let self_link = self_link(&config, &page);
    let generator = FeedService::generator();

    if let DiscoveryOutcome::Found { feed_url, strategy } = discovery.discover(&page).await {
        stats.record_strategy(strategy);

        let body = fetcher.get_body(&feed_url, FetchProfile::Standard).await?;
        match parse::parse_feed(&body.bytes) {
            Ok(_) => {
                let overrides = PassthroughOverrides {
                    title: opts.title.as_deref(),
                    description: opts.description.as_deref(),
                    limit: Some(limit),
                    generator: &generator,
                    self_link: &self_link,
                    build_time: Utc::now(),
                };
                let bytes = assemble::rewrite_feed(&body.bytes, &overrides)?;
                let kind = assemble::detect_kind(&body.bytes);

                stats.record_passthrough(started.elapsed().as_millis() as u64);
                tracing::info!(
                    url = %page,
                    feed = %feed_url,
                    strategy = strategy.as_str(),
                    "Served pass-through feed"
                );
                return Ok(CachedFeed {
                    bytes: Arc::new(bytes),
                    kind,
                    inserted_at: Utc::now(),
                });
            }
            Err(e) => {
                // A discovered feed that fails to parse switches paths,
                // it does not fail the request
                tracing::warn!(
                    url = %page,
                    feed = %feed_url,
                    error = %e,
                    "Discovered feed unparseable, falling back to synthesis"
                );
            }
        }
    }

    let body = fetcher
        .get_body(page.as_url(), FetchProfile::Standard)
        .await?;
    let articles = extractor.extract(&body.text(), &page, limit)?;

    let envelope = build_envelope(&config, &page, &opts, self_link, generator, articles);
    let bytes = assemble::synthesize(&envelope)?;

    stats.record_synthesized(started.elapsed().as_millis() as u64);
    tracing::info!(url = %page, items = envelope.items.len(), "Served synthesized feed");

    Ok(CachedFeed {
        bytes: Arc::new(bytes),
        kind: FeedKind::Rss,
        inserted_at: Utc::now(),
    })
}

fn build_envelope(
    config: &Config,
    page: &PageUrl,
    opts: &FeedOptions,
    self_link: String,
    generator: String,
    items: Vec<Article>,
) -> FeedEnvelope {
    let host = page.as_url().host_str().unwrap_or("unknown").to_owned();

    FeedEnvelope {
        title: opts.title.clone().unwrap_or_else(|| format!("{host} Feed")),
        description: opts
            .description
            .clone()
            .unwrap_or_else(|| format!("Latest articles from {host}")),
        site_link: page.as_str().to_owned(),
        self_link,
        language: None,
        categories: Vec::new(),
        ttl_minutes: config.ttl_minutes(),
        generator,
        build_time: Utc::now(),
        items,
    }
}

fn self_link(config: &Config, page: &PageUrl) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(page.as_str().as_bytes()).collect();
    format!("{}/feed?url={}", config.base_url.trim_end_matches('/'), encoded)
}

/// `limit` is a soft bound under the configured hard ceiling.
fn effective_limit(limit: Option<usize>, ceiling: usize) -> usize {
    limit.unwrap_or(ceiling).min(ceiling)
}

fn average(total_ms: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        total_ms / count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit_is_soft_under_ceiling() {
        assert_eq!(effective_limit(None, 20), 20);
        assert_eq!(effective_limit(Some(5), 20), 5);
        assert_eq!(effective_limit(Some(50), 20), 20);
    }

    #[test]
    fn test_self_link_encodes_url() {
        let config = Config::default();
        let page = PageUrl::parse("https://example.com/a?b=c").unwrap();
        let link = self_link(&config, &page);
        assert_eq!(
            link,
            "http://localhost:3000/feed?url=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc"
        );
    }

    #[test]
    fn test_envelope_defaults_from_host() {
        let config = Config::default();
        let page = PageUrl::parse("https://example.com/news").unwrap();
        let envelope = build_envelope(
            &config,
            &page,
            &FeedOptions::default(),
            "self".into(),
            "gen".into(),
            Vec::new(),
        );
        assert_eq!(envelope.title, "example.com Feed");
        assert_eq!(envelope.ttl_minutes, 60);
    }

    #[test]
    fn test_envelope_honors_overrides() {
        let config = Config::default();
        let page = PageUrl::parse("https://example.com/").unwrap();
        let opts = FeedOptions {
            title: Some("Custom".into()),
            description: Some("Custom description".into()),
            limit: None,
        };
        let envelope =
            build_envelope(&config, &page, &opts, "self".into(), "gen".into(), Vec::new());
        assert_eq!(envelope.title, "Custom");
        assert_eq!(envelope.description, "Custom description");
    }

    #[tokio::test]
    async fn test_feed_rejects_bad_input_before_io() {
        let service = FeedService::new(Config::default()).unwrap();

        let bad_url = service.feed("not a url", FeedOptions::default()).await;
        assert!(matches!(bad_url, Err(FeedError::InvalidInput(_))));

        let private = service
            .feed("http://192.168.0.1/page", FeedOptions::default())
            .await;
        assert!(matches!(private, Err(FeedError::InvalidInput(_))));

        let bad_opts = service
            .feed(
                "https://example.com/",
                FeedOptions {
                    limit: Some(0),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(bad_opts, Err(FeedError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_validate_reports_invalid_url() {
        let service = FeedService::new(Config::default()).unwrap();
        let report = service.validate("nope").await;
        assert!(!report.accessible);
        assert!(!report.has_rss_feed);
        assert!(report.reason.is_some());
    }
}
