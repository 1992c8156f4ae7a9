//! Candidate generation for each discovery strategy.
//!
//! Every function here is pure: it turns a page URL (plus, for the
//! HTML-driven strategies, already-fetched markup) into an ordered list
//! of candidate feed URLs. Probing and validation happen in the engine.

use scraper::{Html, Selector};
use url::Url;

use crate::util::PageUrl;

/// `<head>` probes, in tie-breaking order.
const HEAD_SELECTORS: &[&str] = &[
    r#"link[type="application/rss+xml"]"#,
    r#"link[type="application/atom+xml"]"#,
    r#"link[rel="alternate"][type="application/rss+xml"]"#,
    r#"link[rel="alternate"][type="application/atom+xml"]"#,
    r#"link[rel="feed"]"#,
];

/// Scans parsed HTML for feed `<link>` elements, resolving each `href`
/// against the page URL. Order follows the selector list; duplicates are
/// dropped keeping the earliest occurrence.
pub(super) fn head_candidates(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut out: Vec<Url> = Vec::new();

    for raw in HEAD_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if let Some(url) = resolve(href, base) {
                if !out.contains(&url) {
                    out.push(url);
                }
            }
        }
    }

    out
}

/// Path-shape inference: `/x` suggests `/rss/x.rss` and `/x/feed`; a root
/// page suggests `/rss/trang-chu.rss` and `/rss`.
pub(super) fn url_pattern_candidates(page: &PageUrl) -> Vec<Url> {
    let origin = page.origin();
    let paths: Vec<String> = match page.first_segment() {
        Some(segment) => vec![format!("/rss/{segment}.rss"), format!("/{segment}/feed")],
        None => vec!["/rss/trang-chu.rss".to_owned(), "/rss".to_owned()],
    };

    paths
        .into_iter()
        .filter_map(|path| Url::parse(&format!("{origin}{path}")).ok())
        .collect()
}

/// The two paths nearly every feed-bearing site answers on.
pub(super) fn common_path_candidates(page: &PageUrl) -> Vec<Url> {
    let origin = page.origin();
    ["/rss", "/feed"]
        .iter()
        .filter_map(|path| Url::parse(&format!("{origin}{path}")).ok())
        .collect()
}

/// WordPress convention: `{page}/feed`, then `{origin}/feed`.
pub(super) fn wordpress_candidates(page: &PageUrl) -> Vec<Url> {
    let mut out = Vec::new();

    let page_feed = format!("{}/feed", page.as_str().trim_end_matches('/'));
    if let Ok(url) = Url::parse(&page_feed) {
        out.push(url);
    }
    if let Ok(url) = Url::parse(&format!("{}/feed", page.origin())) {
        if !out.contains(&url) {
            out.push(url);
        }
    }

    out
}

/// Anchors in the page body whose target looks feed-shaped. Capability-
/// gated: on link-dense pages this inflates the probe budget quickly.
pub(super) fn content_mining_candidates(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let lower = href.to_lowercase();
        if !(lower.contains("rss") || lower.contains("feed") || lower.ends_with(".xml")) {
            continue;
        }
        if let Some(url) = resolve(href, base) {
            if url.host_str() == base.host_str() && !out.contains(&url) {
                out.push(url);
            }
        }
    }

    out.truncate(5);
    out
}

/// `<loc>` entries from a sitemap whose path looks feed-shaped.
/// Capability-gated like content mining.
pub(super) fn sitemap_candidates(xml: &str, base: &Url) -> Vec<Url> {
    let mut out = Vec::new();

    for chunk in xml.split("<loc>").skip(1) {
        let Some(end) = chunk.find("</loc>") else {
            continue;
        };
        let loc = chunk[..end].trim();
        let lower = loc.to_lowercase();
        if !(lower.contains("rss") || lower.contains("feed")) {
            continue;
        }
        if let Some(url) = resolve(loc, base) {
            if !out.contains(&url) {
                out.push(url);
            }
        }
    }

    out.truncate(5);
    out
}

/// `Sitemap:` lines from robots.txt, to be fetched and scanned like a
/// directly-probed sitemap.
pub(super) fn robots_sitemaps(robots: &str, base: &Url) -> Vec<Url> {
    robots
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Sitemap:")?;
            resolve(rest.trim(), base)
        })
        .collect()
}

fn resolve(href: &str, base: &Url) -> Option<Url> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/blog").unwrap()
    }

    #[test]
    fn test_head_candidates_in_selector_order() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/atom+xml" href="/atom.xml">
            <link type="application/rss+xml" href="/rss.xml">
            <link rel="feed" href="/other-feed">
        </head><body></body></html>"#;

        let found = head_candidates(html, &base());
        // rss+xml typed link wins despite appearing later in the document
        assert_eq!(found[0].as_str(), "https://example.com/rss.xml");
        assert_eq!(found[1].as_str(), "https://example.com/atom.xml");
        assert_eq!(found[2].as_str(), "https://example.com/other-feed");
    }

    #[test]
    fn test_head_candidates_resolve_relative_and_absolute() {
        let html = r#"<html><head>
            <link type="application/rss+xml" href="feed.xml">
            <link type="application/rss+xml" href="https://feeds.example.org/main">
        </head></html>"#;

        let found = head_candidates(html, &Url::parse("https://example.com/blog/").unwrap());
        assert_eq!(found[0].as_str(), "https://example.com/blog/feed.xml");
        assert_eq!(found[1].as_str(), "https://feeds.example.org/main");
    }

    #[test]
    fn test_head_candidates_dedupe() {
        let html = r#"<html><head>
            <link type="application/rss+xml" href="/feed">
            <link rel="alternate" type="application/rss+xml" href="/feed">
        </head></html>"#;
        assert_eq!(head_candidates(html, &base()).len(), 1);
    }

    #[test]
    fn test_url_pattern_single_segment() {
        let page = PageUrl::parse("https://example.com/world").unwrap();
        let found = url_pattern_candidates(&page);
        assert_eq!(found[0].as_str(), "https://example.com/rss/world.rss");
        assert_eq!(found[1].as_str(), "https://example.com/world/feed");
    }

    #[test]
    fn test_url_pattern_root() {
        let page = PageUrl::parse("https://example.com/").unwrap();
        let found = url_pattern_candidates(&page);
        assert_eq!(found[0].as_str(), "https://example.com/rss/trang-chu.rss");
        assert_eq!(found[1].as_str(), "https://example.com/rss");
    }

    #[test]
    fn test_wordpress_candidates() {
        let page = PageUrl::parse("https://example.com/category/tech").unwrap();
        let found = wordpress_candidates(&page);
        assert_eq!(
            found[0].as_str(),
            "https://example.com/category/tech/feed"
        );
        assert_eq!(found[1].as_str(), "https://example.com/feed");
    }

    #[test]
    fn test_common_paths() {
        let page = PageUrl::parse("https://example.com/anything/here").unwrap();
        let found = common_path_candidates(&page);
        assert_eq!(found[0].as_str(), "https://example.com/rss");
        assert_eq!(found[1].as_str(), "https://example.com/feed");
    }

    #[test]
    fn test_content_mining_same_host_only() {
        let html = r#"<body>
            <a href="/news/rss">RSS</a>
            <a href="https://other.example.org/feed">external feed</a>
            <a href="/about">About</a>
        </body>"#;
        let found = content_mining_candidates(html, &base());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_str(), "https://example.com/news/rss");
    }

    #[test]
    fn test_sitemap_candidates_filter_feedlike() {
        let xml = r#"<urlset>
            <url><loc>https://example.com/rss/world.rss</loc></url>
            <url><loc>https://example.com/about</loc></url>
            <url><loc>https://example.com/feed</loc></url>
        </urlset>"#;
        let found = sitemap_candidates(xml, &base());
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_robots_sitemaps() {
        let robots = "User-agent: *\nDisallow: /private\nSitemap: https://example.com/sitemap.xml\n";
        let found = robots_sitemaps(robots, &base());
        assert_eq!(found, vec![Url::parse("https://example.com/sitemap.xml").unwrap()]);
    }
}
