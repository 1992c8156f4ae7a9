//! Article extraction from page HTML.
//!
//! The synthesis path: when a site has no discoverable feed, the
//! extractor mines its HTML for an ordered list of [`Article`]s using
//! per-site selector profiles with generic fallbacks.

mod profiles;

pub use profiles::{profile_for, SiteProfile, BASE_REMOVALS};

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::error::FeedError;
use crate::model::{Article, MAX_DESCRIPTION_CHARS, MIN_TITLE_CHARS};
use crate::util::{collapse_whitespace, strip_control_chars, truncate_chars, PageUrl};

/// Minimum visible text for an article candidate to be considered.
const MIN_CANDIDATE_TEXT: usize = 50;
/// Minimum description length from a dedicated selector; shorter ones
/// fall back to the candidate's own text.
const MIN_SELECTOR_DESCRIPTION: usize = 30;
/// Fallback description: this many characters of the candidate's text.
const FALLBACK_DESCRIPTION_CHARS: usize = 200;
/// Minimum description length to pass post-validation.
const MIN_FINAL_DESCRIPTION: usize = 20;

/// HTML → ordered article list.
///
/// Stateless apart from precompiled generic selectors; per-domain profile
/// selectors are compiled per call.
pub struct ContentExtractor {
    base_removals: Vec<Selector>,
    author_selectors: Vec<Selector>,
    category_selectors: Vec<Selector>,
}

impl ContentExtractor {
    pub fn new() -> Self {
        Self {
            base_removals: compile_all(BASE_REMOVALS),
            author_selectors: compile_all(&[".author", ".byline", "[rel=\"author\"]"]),
            category_selectors: compile_all(&[".category", ".tag", ".section"]),
        }
    }

    /// Extracts up to `max_articles` articles from `html`, resolved
    /// against `page`.
    ///
    /// Candidates with under 50 characters of visible text or duplicate
    /// text are discarded; enumeration stops early once `2 × max_articles`
    /// candidates are collected. Survivors are validated (title ≥10
    /// chars, unique absolute link, description ≥20 chars), stably sorted
    /// by publication date descending and truncated.
    ///
    /// # Errors
    ///
    /// [`FeedError::NoArticles`] when nothing passes post-validation.
    pub fn extract(
        &self,
        html: &str,
        page: &PageUrl,
        max_articles: usize,
    ) -> Result<Vec<Article>, FeedError> {
        let document = Html::parse_document(html);
        let profile = profile_for(&page.registrable_domain());

        let mut removals = self.base_removals.clone();
        removals.extend(compile_all(&profile.remove));

        let candidates = self.collect_candidates(&document, &profile, &removals, max_articles);
        tracing::debug!(
            url = %page,
            candidates = candidates.len(),
            "Collected article candidates"
        );

        let now = Utc::now();
        let mut articles = Vec::new();
        let mut seen_links: HashSet<String> = HashSet::new();

        for candidate in &candidates {
            // A failing candidate is logged and skipped, never fatal
            let Some(article) =
                self.extract_candidate(*candidate, page, &profile, &removals, now)
            else {
                tracing::warn!(url = %page, "Candidate rejected: no usable title or link");
                continue;
            };

            // Post-validation: length invariants plus page-wide link uniqueness
            if article.title.chars().count() < MIN_TITLE_CHARS {
                continue;
            }
            if article.description.chars().count() < MIN_FINAL_DESCRIPTION {
                continue;
            }
            if !seen_links.insert(article.link.clone()) {
                continue;
            }

            articles.push(article);
        }

        if articles.is_empty() {
            return Err(FeedError::NoArticles(page.as_str().to_owned()));
        }

        // Stable sort keeps document order for equal timestamps
        articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        articles.truncate(max_articles);

        Ok(articles)
    }

    fn collect_candidates<'a>(
        &self,
        document: &'a Html,
        profile: &SiteProfile,
        removals: &[Selector],
        max_articles: usize,
    ) -> Vec<ElementRef<'a>> {
        let budget = max_articles.saturating_mul(2).max(1);
        let mut candidates = Vec::new();
        let mut seen_text: HashSet<String> = HashSet::new();

        'selectors: for raw in &profile.article {
            let Ok(selector) = Selector::parse(raw) else {
                tracing::warn!(selector = raw, "Unparseable article selector, skipping");
                continue;
            };

            for element in document.select(&selector) {
                let text = visible_text(element, removals);
                if text.chars().count() < MIN_CANDIDATE_TEXT {
                    continue;
                }
                if !seen_text.insert(text) {
                    continue;
                }

                candidates.push(element);
                if candidates.len() >= budget {
                    break 'selectors;
                }
            }
        }

        candidates
    }

    fn extract_candidate(
        &self,
        candidate: ElementRef<'_>,
        page: &PageUrl,
        profile: &SiteProfile,
        removals: &[Selector],
        now: DateTime<Utc>,
    ) -> Option<Article> {
        let title = extract_title(candidate, &profile.title)?;
        let link = extract_link(candidate, &profile.link, page)?;

        let description = extract_description(candidate, &profile.description, removals);
        let published_at = extract_date(candidate, &profile.date).unwrap_or(now);
        let image = extract_image(candidate, &profile.image, page);

        let author = first_text(candidate, &self.author_selectors);
        let category = first_text(candidate, &self.category_selectors);

        Some(Article {
            title,
            guid: link.clone(),
            link,
            description,
            content: None,
            author,
            category,
            image,
            published_at,
        })
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_all(raw: &[&str]) -> Vec<Selector> {
    raw.iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(selector) => Some(selector),
            Err(_) => {
                tracing::warn!(selector = s, "Unparseable selector, skipping");
                None
            }
        })
        .collect()
}

/// Text of an element with removal subtrees skipped.
///
/// This stands in for mutating pre-clean: instead of deleting
/// `script`/`style`/nav chrome from the tree, their text is ignored
/// wherever it would be collected.
fn visible_text(element: ElementRef<'_>, removals: &[Selector]) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| removals.iter().any(|sel| sel.matches(&ancestor)));
        if !hidden {
            parts.push(&**text);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

fn extract_title(candidate: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in candidate.select(&selector) {
            let text = clean(&element.text().collect::<String>());
            if text.chars().count() >= MIN_TITLE_CHARS {
                return Some(text);
            }
            if let Some(attr) = element.value().attr("title") {
                let attr = clean(attr);
                if attr.chars().count() >= MIN_TITLE_CHARS {
                    return Some(attr);
                }
            }
        }
    }
    None
}

fn extract_link(candidate: ElementRef<'_>, selectors: &[&str], page: &PageUrl) -> Option<String> {
    // The candidate itself may be the anchor (card-style markup)
    if candidate.value().name() == "a" {
        if let Some(href) = candidate.value().attr("href") {
            if let Some(resolved) = resolve(href, page) {
                return Some(resolved);
            }
        }
    }

    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in candidate.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                if let Some(resolved) = resolve(href, page) {
                    return Some(resolved);
                }
            }
        }
    }
    None
}

fn extract_description(
    candidate: ElementRef<'_>,
    selectors: &[&str],
    removals: &[Selector],
) -> String {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in candidate.select(&selector) {
            let text = clean(&element.text().collect::<String>());
            if text.chars().count() >= MIN_SELECTOR_DESCRIPTION {
                return truncate_chars(&text, MAX_DESCRIPTION_CHARS).into_owned();
            }
        }
    }

    // Fallback: the candidate's own visible text, clipped
    let own = visible_text(candidate, removals);
    truncate_chars(&own, FALLBACK_DESCRIPTION_CHARS).into_owned()
}

fn extract_date(candidate: ElementRef<'_>, selectors: &[&str]) -> Option<DateTime<Utc>> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in candidate.select(&selector) {
            let raw_value = element
                .value()
                .attr("datetime")
                .or_else(|| element.value().attr("data-time"))
                .map(str::to_owned)
                .unwrap_or_else(|| element.text().collect::<String>());

            if let Some(parsed) = parse_date(&raw_value) {
                return Some(parsed);
            }
        }
    }
    None
}

fn extract_image(candidate: ElementRef<'_>, selectors: &[&str], page: &PageUrl) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in candidate.select(&selector) {
            let src = element
                .value()
                .attr("src")
                .or_else(|| element.value().attr("data-src"))
                .or_else(|| element.value().attr("data-lazy-src"));
            if let Some(src) = src {
                if let Some(resolved) = resolve(src, page) {
                    return Some(resolved);
                }
            }
        }
    }
    None
}

fn first_text(candidate: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    for selector in selectors {
        if let Some(element) = candidate.select(selector).next() {
            let text = clean(&element.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// RFC-3339 first, then RFC-2822, then a handful of locale-free formats.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }

    None
}

fn resolve(href: &str, page: &PageUrl) -> Option<String> {
    let resolved = page.as_url().join(href.trim()).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

fn clean(s: &str) -> String {
    collapse_whitespace(&strip_control_chars(s))
}
