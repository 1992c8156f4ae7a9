//! Pass-through rewriting of native feeds.
//!
//! When the origin already serves a feed, its bytes are returned with a
//! handful of envelope-level mutations: channel/feed title and
//! description overrides, a fresh `lastBuildDate`/`updated` and
//! generator, a rewritten self-reference link, and item truncation. All
//! other content — foreign namespaces included — streams through
//! verbatim, one XML event at a time.

use std::error::Error;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::FeedError;

/// What kind of feed a byte buffer holds, judged by its first root-level
/// element marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

impl FeedKind {
    /// The MIME type a response carrying this feed advertises.
    pub fn content_type(&self) -> &'static str {
        match self {
            FeedKind::Rss => "application/rss+xml",
            FeedKind::Atom => "application/atom+xml",
        }
    }
}

/// Sniffs RSS vs Atom from raw bytes. Pass-through output keeps the
/// input's format, so the content-type tag follows this.
pub fn detect_kind(bytes: &[u8]) -> FeedKind {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_lowercase();
    match (head.find("<feed"), head.find("<rss")) {
        (Some(feed_at), Some(rss_at)) if feed_at < rss_at => FeedKind::Atom,
        (Some(_), None) => FeedKind::Atom,
        _ => FeedKind::Rss,
    }
}

/// The mutations applied during pass-through.
#[derive(Debug, Clone)]
pub struct PassthroughOverrides<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub limit: Option<usize>,
    pub generator: &'a str,
    /// New href for an existing `rel="self"` link. No self link is
    /// injected when the original has none (that could require namespace
    /// declarations the document lacks).
    pub self_link: &'a str,
    pub build_time: DateTime<Utc>,
}

/// Rewrites a native feed, preserving everything the overrides don't
/// touch.
///
/// Elements are matched by *path* (`rss > channel > title`,
/// `feed > title`), so identically-named elements elsewhere in the tree
/// pass through untouched. A non-namespaced foreign element sitting at
/// exactly a rewritten path is indistinguishable from the standard
/// element and gets rewritten with it; that restriction is accepted.
///
/// # Errors
///
/// [`FeedError::FeedParse`] when the input is not well-formed XML.
pub fn rewrite_feed(
    input: &[u8],
    overrides: &PassthroughOverrides<'_>,
) -> Result<Vec<u8>, FeedError> {
    rewrite_inner(input, overrides)
        .map_err(|e| FeedError::FeedParse(format!("pass-through rewrite failed: {e}")))
}

fn rewrite_inner(
    input: &[u8],
    overrides: &PassthroughOverrides<'_>,
) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut reader = Reader::from_reader(input);
    let mut writer = Writer::new(Vec::new());

    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut items_kept = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let local = local_name(&e);
                let at_channel = is_channel_path(&path);

                if at_channel && is_rewritten_element(&path, &local) {
                    // Freshly injected after the channel/feed start; the
                    // original is dropped
                    skip_subtree(&mut reader, &e, &mut skip_buf)?;
                } else if at_channel && local == "title" && overrides.title.is_some() {
                    replace_text(&mut reader, &mut writer, &e, overrides.title.unwrap(), &mut skip_buf)?;
                } else if at_channel
                    && (local == "description" || local == "subtitle")
                    && overrides.description.is_some()
                {
                    replace_text(
                        &mut reader,
                        &mut writer,
                        &e,
                        overrides.description.unwrap(),
                        &mut skip_buf,
                    )?;
                } else if at_channel && (local == "item" || local == "entry") {
                    let limit = overrides.limit.unwrap_or(usize::MAX);
                    if items_kept >= limit {
                        skip_subtree(&mut reader, &e, &mut skip_buf)?;
                    } else {
                        items_kept += 1;
                        writer.write_event(Event::Start(e.clone()))?;
                        path.push(local);
                    }
                } else if at_channel && local == "link" && has_rel_self(&e) {
                    writer.write_event(Event::Start(rewrite_href(&e, overrides.self_link)))?;
                    path.push(local);
                } else {
                    let entering_channel = is_channel_start(&path, &local);
                    writer.write_event(Event::Start(e.clone()))?;
                    path.push(local.clone());

                    if entering_channel {
                        inject_build_metadata(&mut writer, &path, overrides)?;
                    }
                }
            }
            Event::Empty(e) => {
                let local = local_name(&e);
                if is_channel_path(&path) && local == "link" && has_rel_self(&e) {
                    writer.write_event(Event::Empty(rewrite_href(&e, overrides.self_link)))?;
                } else {
                    writer.write_event(Event::Empty(e.clone()))?;
                }
            }
            Event::End(e) => {
                path.pop();
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            event => {
                writer.write_event(event)?;
            }
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

/// `rss > channel` children or `feed` children are the rewrite scope.
fn is_channel_path(path: &[String]) -> bool {
    matches!(
        path,
        [rss, channel] if rss == "rss" && channel == "channel"
    ) || matches!(path, [feed] if feed == "feed")
}

/// Is this Start event (not yet pushed onto `path`) the `<channel>` or
/// `<feed>` element itself?
fn is_channel_start(path: &[String], local: &str) -> bool {
    (matches!(path, [rss] if rss == "rss") && local == "channel")
        || (path.is_empty() && local == "feed")
}

/// Elements that are dropped wherever the original put them because a
/// fresh copy was injected at the top of the channel.
fn is_rewritten_element(path: &[String], local: &str) -> bool {
    let atom = matches!(path, [feed] if feed == "feed");
    match local {
        "generator" => true,
        "lastbuilddate" => !atom,
        "updated" => atom,
        _ => false,
    }
}

fn inject_build_metadata(
    writer: &mut Writer<Vec<u8>>,
    path: &[String],
    overrides: &PassthroughOverrides<'_>,
) -> Result<(), Box<dyn Error>> {
    let atom = matches!(path, [feed] if feed == "feed");

    write_text_element(writer, "generator", overrides.generator)?;
    if atom {
        write_text_element(writer, "updated", &overrides.build_time.to_rfc3339())?;
    } else {
        write_text_element(writer, "lastBuildDate", &overrides.build_time.to_rfc2822())?;
    }
    Ok(())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<(), Box<dyn Error>> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Writes the element with `new_text` as its only child, discarding the
/// original children.
fn replace_text(
    reader: &mut Reader<&[u8]>,
    writer: &mut Writer<Vec<u8>>,
    start: &BytesStart<'_>,
    new_text: &str,
    skip_buf: &mut Vec<u8>,
) -> Result<(), Box<dyn Error>> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    writer.write_event(Event::Start(start.clone()))?;
    writer.write_event(Event::Text(BytesText::new(new_text)))?;

    let end = start.to_end().into_owned();
    skip_buf.clear();
    reader.read_to_end_into(end.name(), skip_buf)?;

    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn skip_subtree(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    skip_buf: &mut Vec<u8>,
) -> Result<(), Box<dyn Error>> {
    let end = start.to_end().into_owned();
    skip_buf.clear();
    reader.read_to_end_into(end.name(), skip_buf)?;
    Ok(())
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase()
}

fn has_rel_self(e: &BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|attr| {
        attr.key.as_ref() == b"rel" && attr.value.as_ref() == b"self"
    })
}

fn rewrite_href(e: &BytesStart<'_>, href: &str) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"href" {
            out.push_attribute(("href", href));
        } else {
            out.push_attribute(attr);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS_INPUT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:custom="urn:example:custom">
  <channel>
    <title>Origin Title</title>
    <description>Origin description</description>
    <link>https://example.com</link>
    <atom:link href="https://example.com/feed" rel="self" type="application/rss+xml"/>
    <generator>OriginCMS 9.1</generator>
    <lastBuildDate>Mon, 01 Jan 2024 00:00:00 GMT</lastBuildDate>
    <custom:extension attr="kept">opaque payload</custom:extension>
    <item>
      <title>First item</title>
      <link>https://example.com/1</link>
      <custom:itemdata>one</custom:itemdata>
    </item>
    <item>
      <title>Second item</title>
      <link>https://example.com/2</link>
    </item>
    <item>
      <title>Third item</title>
      <link>https://example.com/3</link>
    </item>
  </channel>
</rss>"#;

    fn overrides() -> PassthroughOverrides<'static> {
        PassthroughOverrides {
            title: None,
            description: None,
            limit: None,
            generator: "feedforge 0.1.0",
            self_link: "http://localhost:3000/feed?url=https%3A%2F%2Fexample.com",
            build_time: Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_generator_and_build_date_replaced() {
        let out = rewrite_feed(RSS_INPUT.as_bytes(), &overrides()).unwrap();
        let xml = String::from_utf8(out).unwrap();

        assert!(xml.contains("<generator>feedforge 0.1.0</generator>"));
        assert!(!xml.contains("OriginCMS"));
        assert!(!xml.contains("Mon, 01 Jan 2024"));
        assert!(xml.contains("<lastBuildDate>"));
    }

    #[test]
    fn test_title_preserved_without_override() {
        let out = rewrite_feed(RSS_INPUT.as_bytes(), &overrides()).unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("<title>Origin Title</title>"));
    }

    #[test]
    fn test_title_and_description_overrides() {
        let mut ov = overrides();
        ov.title = Some("Custom Title");
        ov.description = Some("Custom description");

        let out = rewrite_feed(RSS_INPUT.as_bytes(), &ov).unwrap();
        let xml = String::from_utf8(out).unwrap();

        assert!(xml.contains("<title>Custom Title</title>"));
        assert!(xml.contains("<description>Custom description</description>"));
        assert!(!xml.contains("Origin Title"));
        // Item titles are not channel titles: untouched
        assert!(xml.contains("<title>First item</title>"));
    }

    #[test]
    fn test_self_link_rewritten() {
        let out = rewrite_feed(RSS_INPUT.as_bytes(), &overrides()).unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("http://localhost:3000/feed?url="));
        assert!(!xml.contains("href=\"https://example.com/feed\""));
    }

    #[test]
    fn test_foreign_elements_preserved_verbatim() {
        let out = rewrite_feed(RSS_INPUT.as_bytes(), &overrides()).unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains(r#"<custom:extension attr="kept">opaque payload</custom:extension>"#));
        assert!(xml.contains("<custom:itemdata>one</custom:itemdata>"));
    }

    #[test]
    fn test_limit_drops_items_from_the_end() {
        let mut ov = overrides();
        ov.limit = Some(2);

        let out = rewrite_feed(RSS_INPUT.as_bytes(), &ov).unwrap();
        let xml = String::from_utf8(out).unwrap();

        assert!(xml.contains("First item"));
        assert!(xml.contains("Second item"));
        assert!(!xml.contains("Third item"));
    }

    #[test]
    fn test_item_order_and_count_preserved_without_limit() {
        let out = rewrite_feed(RSS_INPUT.as_bytes(), &overrides()).unwrap();
        let parsed = crate::parse::parse_feed(&out).unwrap();
        // parse_feed drops short titles; inspect raw order instead
        let xml = String::from_utf8(out).unwrap();
        let first = xml.find("First item").unwrap();
        let second = xml.find("Second item").unwrap();
        let third = xml.find("Third item").unwrap();
        assert!(first < second && second < third);
        assert_eq!(xml.matches("<item>").count(), 3);
        drop(parsed);
    }

    #[test]
    fn test_atom_feed_rewrite() {
        let atom = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Origin</title>
  <subtitle>Atom subtitle</subtitle>
  <updated>2024-01-01T00:00:00Z</updated>
  <generator>OldGen</generator>
  <link href="https://example.com/atom.xml" rel="self"/>
  <entry><title>Entry one headline</title><id>1</id></entry>
  <entry><title>Entry two headline</title><id>2</id></entry>
</feed>"#;

        let mut ov = overrides();
        ov.title = Some("Rebranded Atom");
        ov.limit = Some(1);

        let out = rewrite_feed(atom.as_bytes(), &ov).unwrap();
        let xml = String::from_utf8(out).unwrap();

        assert!(xml.contains("<title>Rebranded Atom</title>"));
        assert!(xml.contains("<generator>feedforge 0.1.0</generator>"));
        assert!(!xml.contains("OldGen"));
        assert!(!xml.contains("2024-01-01T00:00:00Z"));
        assert!(xml.contains("Entry one headline"));
        assert!(!xml.contains("Entry two headline"));
        assert!(xml.contains("http://localhost:3000/feed?url="));
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(RSS_INPUT.as_bytes()), FeedKind::Rss);
        assert_eq!(
            detect_kind(b"<?xml version=\"1.0\"?><feed xmlns=\"http://www.w3.org/2005/Atom\"/>"),
            FeedKind::Atom
        );
        // Ambiguous input defaults to RSS
        assert_eq!(detect_kind(b"<whatever/>"), FeedKind::Rss);
    }

    #[test]
    fn test_malformed_xml_is_a_parse_error() {
        let result = rewrite_feed(b"<rss><channel><title>x</titl", &overrides());
        assert!(matches!(result, Err(FeedError::FeedParse(_))));
    }
}
