//! Feed assembly.
//!
//! Two output modes share this module: synthesizing RSS 2.0 from an
//! envelope of extracted articles, and passing an origin's own feed
//! through with caller overrides applied. Both produce bytes that are a
//! pure function of their inputs — timestamps come from the envelope or
//! the override set, never from the clock in here.

mod passthrough;

pub use passthrough::{detect_kind, rewrite_feed, FeedKind, PassthroughOverrides};

use std::error::Error;
use std::io::Write;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::FeedError;
use crate::model::{Article, FeedEnvelope};
use crate::util::strip_control_chars;

const NS_CONTENT: &str = "http://purl.org/rss/1.0/modules/content/";
const NS_DC: &str = "http://purl.org/dc/elements/1.1/";
const NS_ATOM: &str = "http://www.w3.org/2005/Atom";
const NS_MEDIA: &str = "http://search.yahoo.com/mrss/";

/// Emits a synthesized RSS 2.0 document for the envelope.
///
/// Output is byte-for-byte identical for identical envelopes: element
/// order is fixed and `lastBuildDate` comes from `envelope.build_time`.
///
/// # Errors
///
/// [`FeedError::Internal`] on serialization failure (practically
/// unreachable for an in-memory writer).
pub fn synthesize(envelope: &FeedEnvelope) -> Result<Vec<u8>, FeedError> {
    synthesize_inner(envelope)
        .map_err(|e| FeedError::Internal(format!("feed serialization failed: {e}")))
}

fn synthesize_inner(envelope: &FeedEnvelope) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:content", NS_CONTENT));
    rss.push_attribute(("xmlns:dc", NS_DC));
    rss.push_attribute(("xmlns:atom", NS_ATOM));
    rss.push_attribute(("xmlns:media", NS_MEDIA));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &clean(&envelope.title))?;
    text_element(&mut writer, "description", &clean(&envelope.description))?;
    text_element(&mut writer, "link", &envelope.site_link)?;

    let mut self_link = BytesStart::new("atom:link");
    self_link.push_attribute(("href", envelope.self_link.as_str()));
    self_link.push_attribute(("rel", "self"));
    self_link.push_attribute(("type", "application/rss+xml"));
    writer.write_event(Event::Empty(self_link))?;

    if let Some(language) = &envelope.language {
        text_element(&mut writer, "language", language)?;
    }
    for category in &envelope.categories {
        text_element(&mut writer, "category", &clean(category))?;
    }
    text_element(&mut writer, "ttl", &envelope.ttl_minutes.to_string())?;
    text_element(&mut writer, "generator", &envelope.generator)?;
    text_element(
        &mut writer,
        "lastBuildDate",
        &envelope.build_time.to_rfc2822(),
    )?;

    for (index, article) in envelope.items.iter().enumerate() {
        write_item(&mut writer, envelope, article, index)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(writer.into_inner())
}

fn write_item<W: Write>(
    writer: &mut Writer<W>,
    envelope: &FeedEnvelope,
    article: &Article,
    index: usize,
) -> Result<(), Box<dyn Error>> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;

    text_element(writer, "title", &clean(&article.title))?;
    text_element(writer, "description", &clean(&article.description))?;
    text_element(writer, "link", &article.link)?;

    let guid = if article.guid.is_empty() {
        format!("{}#{}", article.link, index)
    } else {
        article.guid.clone()
    };
    let mut guid_start = BytesStart::new("guid");
    guid_start.push_attribute((
        "isPermaLink",
        if guid == article.link { "true" } else { "false" },
    ));
    writer.write_event(Event::Start(guid_start))?;
    writer.write_event(Event::Text(BytesText::new(&guid)))?;
    writer.write_event(Event::End(BytesEnd::new("guid")))?;

    text_element(writer, "pubDate", &article.published_at.to_rfc2822())?;

    if let Some(author) = &article.author {
        text_element(writer, "author", &clean(author))?;
        text_element(writer, "dc:creator", &clean(author))?;
    }
    if let Some(category) = &article.category {
        text_element(writer, "category", &clean(category))?;
    }

    if let Some(image) = &article.image {
        let mime = image_mime(image);

        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", image.as_str()));
        enclosure.push_attribute(("type", mime));
        enclosure.push_attribute(("length", "0"));
        writer.write_event(Event::Empty(enclosure))?;

        let mut media_content = BytesStart::new("media:content");
        media_content.push_attribute(("url", image.as_str()));
        media_content.push_attribute(("medium", "image"));
        media_content.push_attribute(("type", mime));
        writer.write_event(Event::Empty(media_content))?;

        let mut media_thumbnail = BytesStart::new("media:thumbnail");
        media_thumbnail.push_attribute(("url", image.as_str()));
        writer.write_event(Event::Empty(media_thumbnail))?;
    }

    if let Some(content) = &article.content {
        writer.write_event(Event::Start(BytesStart::new("content:encoded")))?;
        writer.write_event(Event::CData(BytesCData::new(
            strip_control_chars(content).as_ref(),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("content:encoded")))?;
    }

    text_element(writer, "dc:source", &envelope.site_link)?;
    text_element(writer, "dc:identifier", &guid)?;

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), Box<dyn Error>> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

fn clean(s: &str) -> String {
    strip_control_chars(s).into_owned()
}
