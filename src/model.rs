use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::error::FeedError;

/// Maximum characters kept in an article description.
pub const MAX_DESCRIPTION_CHARS: usize = 300;
/// Minimum title length (after whitespace collapse) for a valid article.
pub const MIN_TITLE_CHARS: usize = 10;

/// One article, regardless of whether it came from a native feed or was
/// extracted from page HTML.
///
/// Invariants enforced by the producing components: `title` is non-empty
/// and at least [`MIN_TITLE_CHARS`] after whitespace collapse, `link` is
/// absolute, `guid` defaults to `link`, and `description` is truncated at
/// [`MAX_DESCRIPTION_CHARS`] characters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub published_at: DateTime<Utc>,
    pub guid: String,
}

/// Everything the assembler needs to emit a synthesized RSS 2.0 channel.
///
/// `build_time` is supplied by the orchestrator rather than read from the
/// clock inside the assembler, which is what makes output bytes a pure
/// function of the envelope.
#[derive(Debug, Clone)]
pub struct FeedEnvelope {
    pub title: String,
    pub description: String,
    pub site_link: String,
    pub self_link: String,
    pub language: Option<String>,
    pub categories: Vec<String>,
    pub ttl_minutes: u32,
    pub generator: String,
    pub build_time: DateTime<Utc>,
    pub items: Vec<Article>,
}

/// Caller-supplied feed overrides from the request query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOptions {
    /// Replacement channel title (≤100 chars).
    pub title: Option<String>,
    /// Replacement channel description (≤500 chars).
    pub description: Option<String>,
    /// Soft upper bound on item count (1..=50); the configured
    /// per-feed ceiling still applies.
    pub limit: Option<usize>,
}

impl FeedOptions {
    pub const MAX_TITLE: usize = 100;
    pub const MAX_DESCRIPTION: usize = 500;
    pub const MAX_LIMIT: usize = 50;

    /// Validates field bounds.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidInput`] naming the offending field.
    pub fn validate(&self) -> Result<(), FeedError> {
        if let Some(title) = &self.title {
            if title.chars().count() > Self::MAX_TITLE {
                return Err(FeedError::InvalidInput(format!(
                    "title exceeds {} characters",
                    Self::MAX_TITLE
                )));
            }
        }
        if let Some(description) = &self.description {
            if description.chars().count() > Self::MAX_DESCRIPTION {
                return Err(FeedError::InvalidInput(format!(
                    "description exceeds {} characters",
                    Self::MAX_DESCRIPTION
                )));
            }
        }
        if let Some(limit) = self.limit {
            if limit == 0 || limit > Self::MAX_LIMIT {
                return Err(FeedError::InvalidInput(format!(
                    "limit must be between 1 and {}",
                    Self::MAX_LIMIT
                )));
            }
        }
        Ok(())
    }

    /// Canonical serialization for cache-key derivation: the three fields
    /// in fixed order, absent values encoded as empty. Options outside
    /// this set never perturb cache keys.
    pub fn canonical(&self) -> String {
        format!(
            "title={}|description={}|limit={}",
            self.title.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or(""),
            self.limit.map(|l| l.to_string()).unwrap_or_default()
        )
    }
}

/// The closed set of discovery strategies, traversed in declaration order.
///
/// `Sitemap`, `Robots` and `ContentMining` are implemented but disabled by
/// default: they multiply per-request fetches beyond the rate budget.
/// They stay in the enum so statistics keep a stable shape when a
/// deployment switches them on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    HtmlHead,
    DomainRules,
    UrlPattern,
    CommonPaths,
    WordPress,
    Sitemap,
    Robots,
    ContentMining,
}

impl Strategy {
    /// All strategies, in traversal order.
    pub const ALL: [Strategy; 8] = [
        Strategy::HtmlHead,
        Strategy::DomainRules,
        Strategy::UrlPattern,
        Strategy::CommonPaths,
        Strategy::WordPress,
        Strategy::Sitemap,
        Strategy::Robots,
        Strategy::ContentMining,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::HtmlHead => "html_head",
            Strategy::DomainRules => "domain_rules",
            Strategy::UrlPattern => "url_pattern",
            Strategy::CommonPaths => "common_paths",
            Strategy::WordPress => "wordpress",
            Strategy::Sitemap => "sitemap",
            Strategy::Robots => "robots",
            Strategy::ContentMining => "content_mining",
        }
    }
}

/// Why discovery concluded there is no feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeReason {
    /// Every strategy ran and none produced a valid feed.
    NoFeedFound,
    /// The page URL itself failed recently; discovery short-circuits
    /// until the failure entry expires.
    RecentlyFailed,
}

/// Result of a discovery run.
///
/// `Found` and `Negative` are cacheable; `Transient` is returned uncached
/// so the next call retries.
#[derive(Debug, Clone)]
pub enum DiscoveryOutcome {
    Found { feed_url: Url, strategy: Strategy },
    Negative(NegativeReason),
    Transient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validate_bounds() {
        assert!(FeedOptions::default().validate().is_ok());

        let ok = FeedOptions {
            title: Some("My Feed".into()),
            description: Some("About things".into()),
            limit: Some(10),
        };
        assert!(ok.validate().is_ok());

        let long_title = FeedOptions {
            title: Some("x".repeat(101)),
            ..Default::default()
        };
        assert!(long_title.validate().is_err());

        let zero_limit = FeedOptions {
            limit: Some(0),
            ..Default::default()
        };
        assert!(zero_limit.validate().is_err());

        let big_limit = FeedOptions {
            limit: Some(51),
            ..Default::default()
        };
        assert!(big_limit.validate().is_err());
    }

    #[test]
    fn test_canonical_is_order_stable() {
        let opts = FeedOptions {
            title: Some("T".into()),
            description: None,
            limit: Some(3),
        };
        assert_eq!(opts.canonical(), "title=T|description=|limit=3");
        assert_eq!(FeedOptions::default().canonical(), "title=|description=|limit=");
    }

    #[test]
    fn test_strategy_order_starts_with_html_head() {
        assert_eq!(Strategy::ALL[0], Strategy::HtmlHead);
        assert_eq!(Strategy::ALL[1], Strategy::DomainRules);
        assert_eq!(Strategy::ALL.len(), 8);
    }
}
