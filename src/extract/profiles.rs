//! Per-domain extraction profiles.
//!
//! A profile is a bundle of CSS selector lists tried in order. Domains
//! without an override use the `default` profile; overrides replace only
//! the lists they specify and inherit the rest.

/// Selector lists used by the extractor for one site.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Candidate article containers.
    pub article: Vec<&'static str>,
    /// Title sources inside a candidate.
    pub title: Vec<&'static str>,
    /// Link sources inside a candidate.
    pub link: Vec<&'static str>,
    /// Description sources inside a candidate.
    pub description: Vec<&'static str>,
    /// Image sources inside a candidate.
    pub image: Vec<&'static str>,
    /// Publication-date sources inside a candidate.
    pub date: Vec<&'static str>,
    /// Extra subtrees to ignore for this site, on top of the base
    /// removal list.
    pub remove: Vec<&'static str>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            article: vec![
                "article",
                ".post",
                ".entry",
                ".news-item",
                ".article-item",
                "[class*=\"post\"]",
                "[class*=\"article\"]",
            ],
            title: vec![
                "h1",
                "h2",
                "h3",
                ".title",
                ".headline",
                "[class*=\"title\"] a",
                "[class*=\"title\"]",
                "a",
            ],
            link: vec!["a[href]"],
            description: vec![
                "p",
                ".summary",
                ".description",
                ".excerpt",
                "[class*=\"desc\"]",
            ],
            image: vec!["img"],
            date: vec!["time", "[datetime]", ".date", ".time", "[class*=\"date\"]"],
            remove: vec![],
        }
    }
}

/// Subtrees always skipped during text collection, before any profile
/// removals apply.
pub const BASE_REMOVALS: &[&str] = &[
    "script",
    "style",
    "nav",
    "footer",
    "aside",
    ".ad",
    ".advertisement",
];

/// Resolves the profile for a registrable domain.
///
/// Overrides are sparse: a field left `None` inherits the default list.
pub fn profile_for(domain: &str) -> SiteProfile {
    let mut profile = SiteProfile::default();

    let Some(overrides) = overrides_for(domain) else {
        return profile;
    };

    if let Some(article) = overrides.article {
        profile.article = article.to_vec();
    }
    if let Some(title) = overrides.title {
        profile.title = title.to_vec();
    }
    if let Some(link) = overrides.link {
        profile.link = link.to_vec();
    }
    if let Some(description) = overrides.description {
        profile.description = description.to_vec();
    }
    if let Some(image) = overrides.image {
        profile.image = image.to_vec();
    }
    if let Some(date) = overrides.date {
        profile.date = date.to_vec();
    }
    if let Some(remove) = overrides.remove {
        profile.remove = remove.to_vec();
    }

    profile
}

struct ProfileOverride {
    article: Option<&'static [&'static str]>,
    title: Option<&'static [&'static str]>,
    link: Option<&'static [&'static str]>,
    description: Option<&'static [&'static str]>,
    image: Option<&'static [&'static str]>,
    date: Option<&'static [&'static str]>,
    remove: Option<&'static [&'static str]>,
}

const EMPTY: ProfileOverride = ProfileOverride {
    article: None,
    title: None,
    link: None,
    description: None,
    image: None,
    date: None,
    remove: None,
};

fn overrides_for(domain: &str) -> Option<ProfileOverride> {
    match domain {
        "vnexpress.net" => Some(ProfileOverride {
            article: Some(&["article.item-news", ".item-news"]),
            title: Some(&[".title-news a", "h3.title-news", "h2.title-news"]),
            description: Some(&[".description a", ".description"]),
            image: Some(&[".thumb-art img", "img"]),
            remove: Some(&[".banner", ".box-category"]),
            ..EMPTY
        }),
        "dantri.com.vn" => Some(ProfileOverride {
            article: Some(&["article.article-item", ".article-item"]),
            title: Some(&["h3.article-title a", ".article-title"]),
            description: Some(&[".article-excerpt"]),
            image: Some(&[".article-thumb img", "img"]),
            ..EMPTY
        }),
        "tuoitre.vn" => Some(ProfileOverride {
            article: Some(&[".box-category-item", "[class*=\"news-item\"]"]),
            title: Some(&["h3 a", ".box-category-link-title"]),
            description: Some(&[".box-category-sapo"]),
            ..EMPTY
        }),
        "medium.com" => Some(ProfileOverride {
            article: Some(&["article", "[data-post-id]"]),
            title: Some(&["h2", "h3"]),
            ..EMPTY
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_domain_gets_default() {
        let profile = profile_for("example.com");
        assert_eq!(profile.article[0], "article");
        assert_eq!(profile.link, vec!["a[href]"]);
    }

    #[test]
    fn test_override_replaces_named_lists_only() {
        let profile = profile_for("vnexpress.net");
        assert_eq!(profile.article[0], "article.item-news");
        assert_eq!(profile.title[0], ".title-news a");
        // Unspecified lists inherit the default
        assert_eq!(profile.link, vec!["a[href]"]);
        assert_eq!(profile.date[0], "time");
        // Removals add site-specific noise selectors
        assert!(profile.remove.contains(&".banner"));
    }

    #[test]
    fn test_default_article_selectors_keep_their_order() {
        let profile = SiteProfile::default();
        assert_eq!(
            profile.article,
            vec![
                "article",
                ".post",
                ".entry",
                ".news-item",
                ".article-item",
                "[class*=\"post\"]",
                "[class*=\"article\"]",
            ]
        );
    }
}
