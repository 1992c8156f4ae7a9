//! Native feed decoding.
//!
//! Turns existing RSS 2.0 / Atom bytes into the same [`Article`] records
//! the HTML extractor produces, so both acquisition paths feed the
//! assembler identically. Format detection is delegated to `feed-rs`;
//! entries that violate article invariants are skipped with a count
//! rather than failing the whole feed.

use chrono::{DateTime, Utc};

use crate::error::FeedError;
use crate::model::{Article, MAX_DESCRIPTION_CHARS, MIN_TITLE_CHARS};
use crate::util::{
    collapse_whitespace, strip_control_chars, strip_html_tags, truncate_chars, PageUrl,
};

/// A decoded feed: channel metadata plus the entries that survived
/// validation.
#[derive(Debug)]
pub struct ParsedFeed {
    /// Channel/feed title, if present.
    pub title: Option<String>,
    /// Channel description / Atom subtitle, if present.
    pub description: Option<String>,
    /// Declared feed language.
    pub language: Option<String>,
    /// Entries in document order.
    pub articles: Vec<Article>,
    /// Entries dropped for missing/invalid links or too-short titles.
    pub skipped: usize,
}

/// Parses RSS or Atom bytes into articles.
///
/// Maps RSS `item/{title,description,link,pubDate,guid,enclosure,
/// media:*,category}` and Atom `entry/{title,summary|content,link@href,
/// published|updated,id,category}`; unknown elements are ignored.
/// `published_at` falls back to `now` when the entry carries no date,
/// and `guid` falls back to the entry link.
///
/// # Errors
///
/// [`FeedError::FeedParse`] when the bytes are not a recognizable feed.
/// The orchestrator treats that as a path switch to synthesis, not a
/// client-visible failure.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, FeedError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FeedError::FeedParse(e.to_string()))?;

    let now = Utc::now();
    let total = feed.entries.len();
    let mut articles = Vec::with_capacity(total);

    for entry in feed.entries {
        match entry_to_article(entry, now) {
            Some(article) => articles.push(article),
            None => continue,
        }
    }

    let skipped = total - articles.len();
    if skipped > 0 {
        tracing::debug!(skipped = skipped, total = total, "Feed entries skipped");
    }

    Ok(ParsedFeed {
        title: feed.title.map(|t| sanitize(&t.content)),
        description: feed.description.map(|d| sanitize(&d.content)),
        language: feed.language,
        articles,
        skipped,
    })
}

fn entry_to_article(entry: feed_rs::model::Entry, now: DateTime<Utc>) -> Option<Article> {
    let link = entry
        .links
        .iter()
        .map(|l| l.href.clone())
        .find(|href| PageUrl::parse(href).is_ok())?;

    let title = sanitize(&entry.title.as_ref().map(|t| t.content.clone())?);
    if title.chars().count() < MIN_TITLE_CHARS {
        return None;
    }

    let content = entry.content.as_ref().and_then(|c| c.body.clone());
    let raw_description = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| content.clone())
        .unwrap_or_default();
    let description =
        truncate_chars(&sanitize(&strip_html_tags(&raw_description)), MAX_DESCRIPTION_CHARS)
            .into_owned();

    let published_at = entry.published.or(entry.updated).unwrap_or(now);

    let author = entry
        .authors
        .first()
        .map(|p| sanitize(&p.name))
        .filter(|name| !name.is_empty());
    let category = entry
        .categories
        .first()
        .map(|c| sanitize(&c.term))
        .filter(|term| !term.is_empty());

    let image = first_image(&entry.media);

    let guid = {
        let id = entry.id.trim();
        if id.is_empty() {
            link.clone()
        } else {
            id.to_owned()
        }
    };

    Some(Article {
        title,
        link,
        description,
        content,
        author,
        category,
        image,
        published_at,
        guid,
    })
}

/// First usable image URL from the entry's media objects. `feed-rs`
/// folds RSS `enclosure`, `media:content` and `media:thumbnail` into the
/// same structure.
fn first_image(media: &[feed_rs::model::MediaObject]) -> Option<String> {
    for object in media {
        if let Some(thumbnail) = object.thumbnails.first() {
            return Some(thumbnail.image.uri.clone());
        }
        for content in &object.content {
            let is_image = content
                .content_type
                .as_ref()
                .map(|m| m.to_string().starts_with("image/"))
                .unwrap_or(false);
            if let Some(url) = &content.url {
                if is_image || looks_like_image(url.as_str()) {
                    return Some(url.to_string());
                }
            }
        }
    }
    None
}

fn looks_like_image(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    [".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

fn sanitize(s: &str) -> String {
    collapse_whitespace(&strip_control_chars(s))
}
