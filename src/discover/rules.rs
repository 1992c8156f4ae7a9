//! Domain rule table.
//!
//! Some publishers keep their feeds at well-known, section-aware paths
//! that no amount of HTML scanning will find (the feed link is simply not
//! in the markup). This table maps registrable domains to ordered
//! candidate patterns.

use url::Url;

use crate::util::PageUrl;

/// One candidate pattern for a domain.
#[derive(Debug, Clone, Copy)]
pub enum RulePattern {
    /// Append a literal path to the origin.
    Fixed(&'static str),
    /// Substitute the first path segment of the request into a template,
    /// e.g. `/rss/{s}.rss`. Skipped for root requests, which fall
    /// through to the domain's `Fixed` homepage feed.
    PathToRss(&'static str),
}

/// Ordered patterns for a registrable domain, or `None` when the domain
/// has no entry.
pub fn rules_for(domain: &str) -> Option<&'static [RulePattern]> {
    use RulePattern::{Fixed, PathToRss};

    match domain {
        "vnexpress.net" => Some(&[
            PathToRss("/rss/{s}.rss"),
            Fixed("/rss/trang-chu.rss"),
        ]),
        "thanhnien.vn" => Some(&[PathToRss("/rss/{s}.rss"), Fixed("/rss/home.rss")]),
        "dantri.com.vn" => Some(&[PathToRss("/rss/{s}.rss"), Fixed("/rss/home.rss")]),
        "tuoitre.vn" => Some(&[PathToRss("/rss/{s}.rss"), Fixed("/rss/tt.rss")]),
        "theguardian.com" => Some(&[PathToRss("/{s}/rss"), Fixed("/rss")]),
        "nytimes.com" => Some(&[Fixed("/services/xml/rss/nyt/HomePage.xml")]),
        _ => None,
    }
}

/// Expands the domain's patterns against a page URL, in table order.
pub fn candidates(page: &PageUrl) -> Vec<Url> {
    let Some(patterns) = rules_for(&page.registrable_domain()) else {
        return Vec::new();
    };

    let origin = page.origin();
    let mut out = Vec::new();

    for pattern in patterns {
        let path = match pattern {
            RulePattern::Fixed(path) => (*path).to_owned(),
            RulePattern::PathToRss(template) => match page.first_segment() {
                Some(segment) => template.replace("{s}", segment),
                None => continue,
            },
        };
        if let Ok(url) = Url::parse(&format!("{origin}{path}")) {
            out.push(url);
        }
    }

    out
}
