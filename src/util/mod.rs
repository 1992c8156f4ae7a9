//! Shared utilities.
//!
//! - **URL handling**: page-URL normalization and the SSRF policy applied
//!   before any outbound request
//! - **Text processing**: whitespace collapse, character-budget truncation
//!   and sanitization of feed-borne text

mod text;
mod url;

pub use text::{collapse_whitespace, strip_control_chars, strip_html_tags, truncate_chars};
pub use url::{validate_public, PageUrl, UrlError};
