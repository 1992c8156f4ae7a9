//! Feed discovery.
//!
//! Given a page URL, find an authoritative feed URL for it — or conclude
//! with confidence that there is none. Strategies are a closed set tried
//! in a fixed order; the first candidate that fetches and validates as a
//! feed wins.

mod rules;
mod strategies;

pub use rules::{candidates as domain_rule_candidates, rules_for, RulePattern};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::FeedError;
use crate::fetch::{FetchProfile, OriginFetcher};
use crate::model::{DiscoveryOutcome, NegativeReason, Strategy};
use crate::util::PageUrl;

/// Cached Found/Negative outcomes live this long.
const DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(3600);
/// Bodies shorter than this can't be a real feed.
const MIN_FEED_BODY: usize = 50;

/// Byte markers that qualify a body as RSS or Atom (checked lowercase).
const FEED_MARKERS: &[&str] = &[
    "<rss",
    "<feed",
    "<channel>",
    r#"xmlns="http://www.w3.org/2005/atom""#,
    "xmlns:atom=",
];

/// Optional strategies that multiply per-request fetches; off by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryCapabilities {
    pub sitemap: bool,
    pub robots: bool,
    pub content_mining: bool,
}

impl DiscoveryCapabilities {
    fn allows(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::Sitemap => self.sitemap,
            Strategy::Robots => self.robots,
            Strategy::ContentMining => self.content_mining,
            _ => true,
        }
    }
}

/// The discovery engine.
///
/// `discover` never returns an error: fetch problems during probing
/// surface as [`DiscoveryOutcome::Transient`], everything else as
/// `Found`/`Negative`. Outcomes other than `Transient` are cached for an
/// hour per normalized page URL.
pub struct DiscoveryEngine {
    fetcher: Arc<OriginFetcher>,
    capabilities: DiscoveryCapabilities,
    cache: Mutex<HashMap<String, (DiscoveryOutcome, Instant)>>,
}

impl DiscoveryEngine {
    pub fn new(fetcher: Arc<OriginFetcher>, capabilities: DiscoveryCapabilities) -> Self {
        Self {
            fetcher,
            capabilities,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Locates a feed URL for `page`.
    ///
    /// Deterministic for a given cache state: strategy order and, within
    /// a strategy, candidate order are the tie-breakers. A page URL with
    /// a recent permanent failure short-circuits to
    /// `Negative(RecentlyFailed)` without probing.
    pub async fn discover(&self, page: &PageUrl) -> DiscoveryOutcome {
        if let Some(cached) = self.cached(page).await {
            tracing::debug!(url = %page, "Discovery cache hit");
            return cached;
        }

        if self.fetcher.failed_urls().contains(page.as_str()).await {
            return DiscoveryOutcome::Negative(NegativeReason::RecentlyFailed);
        }

        let mut page_html: Option<Option<String>> = None;
        let mut probed: HashSet<String> = HashSet::new();
        let mut transient: Option<String> = None;

        for strategy in Strategy::ALL {
            if !self.capabilities.allows(strategy) {
                continue;
            }

            let candidates = self
                .candidates_for(strategy, page, &mut page_html, &mut transient)
                .await;

            for candidate in candidates {
                if !probed.insert(candidate.as_str().to_owned()) {
                    continue;
                }
                if self
                    .fetcher
                    .failed_urls()
                    .contains(candidate.as_str())
                    .await
                {
                    continue;
                }

                match self.probe(&candidate).await {
                    Ok(true) => {
                        tracing::info!(
                            url = %page,
                            feed = %candidate,
                            strategy = strategy.as_str(),
                            "Feed discovered"
                        );
                        let outcome = DiscoveryOutcome::Found {
                            feed_url: candidate,
                            strategy,
                        };
                        self.store(page, outcome.clone()).await;
                        return outcome;
                    }
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::warn!(
                            url = %page,
                            candidate = %candidate,
                            strategy = strategy.as_str(),
                            error = %e,
                            "Candidate probe failed, continuing"
                        );
                        transient.get_or_insert_with(|| e.to_string());
                    }
                }
            }
        }

        // A transient failure anywhere means "no feed" is not yet a safe
        // conclusion; report it uncached so the next call retries.
        if let Some(reason) = transient {
            return DiscoveryOutcome::Transient(reason);
        }

        let outcome = DiscoveryOutcome::Negative(NegativeReason::NoFeedFound);
        self.store(page, outcome.clone()).await;
        outcome
    }

    /// Drops every cached outcome. Used by cache administration.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    async fn candidates_for(
        &self,
        strategy: Strategy,
        page: &PageUrl,
        page_html: &mut Option<Option<String>>,
        transient: &mut Option<String>,
    ) -> Vec<Url> {
        match strategy {
            Strategy::HtmlHead => match self.page_html(page, page_html, transient).await {
                Some(html) => strategies::head_candidates(&html, page.as_url()),
                None => Vec::new(),
            },
            Strategy::DomainRules => rules::candidates(page),
            Strategy::UrlPattern => strategies::url_pattern_candidates(page),
            Strategy::CommonPaths => strategies::common_path_candidates(page),
            Strategy::WordPress => strategies::wordpress_candidates(page),
            Strategy::Sitemap => self.sitemap_candidates(page, transient).await,
            Strategy::Robots => self.robots_candidates(page, transient).await,
            Strategy::ContentMining => match self.page_html(page, page_html, transient).await {
                Some(html) => strategies::content_mining_candidates(&html, page.as_url()),
                None => Vec::new(),
            },
        }
    }

    /// Fetches the page HTML once and memoizes the result (including
    /// failure) across the strategies that want it.
    async fn page_html(
        &self,
        page: &PageUrl,
        memo: &mut Option<Option<String>>,
        transient: &mut Option<String>,
    ) -> Option<String> {
        if memo.is_none() {
            let fetched = match self
                .fetcher
                .get_body(page.as_url(), FetchProfile::Discovery)
                .await
            {
                Ok(body) => Some(body.text()),
                Err(e) => {
                    tracing::warn!(url = %page, error = %e, "Page fetch for discovery failed");
                    if is_transient(&e) {
                        transient.get_or_insert_with(|| e.to_string());
                    }
                    None
                }
            };
            *memo = Some(fetched);
        }
        memo.clone().flatten()
    }

    async fn sitemap_candidates(&self, page: &PageUrl, transient: &mut Option<String>) -> Vec<Url> {
        let Ok(sitemap_url) = Url::parse(&format!("{}/sitemap.xml", page.origin())) else {
            return Vec::new();
        };
        match self
            .fetcher
            .get_body(&sitemap_url, FetchProfile::Discovery)
            .await
        {
            Ok(body) => strategies::sitemap_candidates(&body.text(), page.as_url()),
            Err(e) => {
                if is_transient(&e) {
                    transient.get_or_insert_with(|| e.to_string());
                }
                Vec::new()
            }
        }
    }

    async fn robots_candidates(&self, page: &PageUrl, transient: &mut Option<String>) -> Vec<Url> {
        let Ok(robots_url) = Url::parse(&format!("{}/robots.txt", page.origin())) else {
            return Vec::new();
        };
        let robots = match self
            .fetcher
            .get_body(&robots_url, FetchProfile::Discovery)
            .await
        {
            Ok(body) => body.text(),
            Err(e) => {
                if is_transient(&e) {
                    transient.get_or_insert_with(|| e.to_string());
                }
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for sitemap_url in strategies::robots_sitemaps(&robots, page.as_url()) {
            if let Ok(body) = self
                .fetcher
                .get_body(&sitemap_url, FetchProfile::Discovery)
                .await
            {
                out.extend(strategies::sitemap_candidates(&body.text(), page.as_url()));
            }
        }
        out
    }

    /// Fetches a candidate and applies the validation predicate.
    ///
    /// Invalid bodies are remembered in the failed-URL set so later
    /// strategies (and later requests) skip them. Permanent HTTP failures
    /// were already recorded by the fetcher.
    ///
    /// # Errors
    ///
    /// Transient fetch errors only; they mean "unknown", not "invalid".
    async fn probe(&self, candidate: &Url) -> Result<bool, FeedError> {
        match self
            .fetcher
            .get_body(candidate, FetchProfile::Discovery)
            .await
        {
            Ok(body) => {
                let valid = is_feed_body(&body.bytes);
                if !valid {
                    self.fetcher
                        .failed_urls()
                        .record_invalid_feed(candidate.as_str())
                        .await;
                }
                Ok(valid)
            }
            Err(FeedError::OriginClient { .. }) => Ok(false),
            Err(e) if is_transient(&e) => Err(e),
            Err(_) => Ok(false),
        }
    }

    async fn cached(&self, page: &PageUrl) -> Option<DiscoveryOutcome> {
        let mut cache = self.cache.lock().await;
        match cache.get(page.as_str()) {
            Some((outcome, at)) if at.elapsed() < DISCOVERY_CACHE_TTL => Some(outcome.clone()),
            Some(_) => {
                cache.remove(page.as_str());
                None
            }
            None => None,
        }
    }

    async fn store(&self, page: &PageUrl, outcome: DiscoveryOutcome) {
        self.cache
            .lock()
            .await
            .insert(page.as_str().to_owned(), (outcome, Instant::now()));
    }
}

fn is_transient(err: &FeedError) -> bool {
    matches!(
        err,
        FeedError::OriginTimeout
            | FeedError::OriginUnreachable(_)
            | FeedError::OriginBlocked { .. }
            | FeedError::OriginServer { .. }
    )
}

/// The validation predicate: at least [`MIN_FEED_BODY`] bytes containing
/// one of the RSS/Atom markers, case-insensitively.
pub fn is_feed_body(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_FEED_BODY {
        return false;
    }
    let lower = String::from_utf8_lossy(bytes).to_lowercase();
    FEED_MARKERS.iter().any(|marker| lower.contains(marker))
}
