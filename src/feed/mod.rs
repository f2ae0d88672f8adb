pub mod coordinator;
pub mod date;
pub mod fetcher;
pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FeedSource;

pub const DEFAULT_CATEGORY: &str = "General";

/// The canonical, deduplicated representation of one article.
///
/// `id` is always the article's canonical link, so the same story fetched on
/// two runs, or from two overlapping feeds, collapses into one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    pub source: String,
    pub region: String,
    #[serde(default)]
    pub language: String,
    pub cached_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_body: Option<String>,
}

/// One item as handed over by the fetch collaborator: already unescaped,
/// CDATA-stripped and reduced to plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawArticle {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_raw: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

/// Fields the summary and translation collaborators may attach to a cached
/// record after the fact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticlePatch {
    pub summary: Option<String>,
    pub translated_title: Option<String>,
    pub translated_body: Option<String>,
}

impl ArticlePatch {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Default::default()
        }
    }

    pub fn translation(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            translated_title: Some(title.into()),
            translated_body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.translated_title.is_none() && self.translated_body.is_none()
    }

    /// Applies the patch and reports whether anything changed.
    pub fn apply(&self, record: &mut ArticleRecord) -> bool {
        let mut changed = false;

        if let Some(summary) = &self.summary {
            if record.summary != *summary {
                record.summary = summary.clone();
                changed = true;
            }
        }

        if let Some(title) = &self.translated_title {
            if record.translated_title.as_ref() != Some(title) {
                record.translated_title = Some(title.clone());
                changed = true;
            }
        }

        if let Some(body) = &self.translated_body {
            if record.translated_body.as_ref() != Some(body) {
                record.translated_body = Some(body.clone());
                changed = true;
            }
        }

        changed
    }
}

impl ArticleRecord {
    /// Normalizes a raw item from `source` into a cache record.
    ///
    /// Returns `None` when the item has no usable link: without one it has no
    /// identity and cannot be deduplicated. An unparseable date is not a
    /// reason to drop the item; it is kept with `published_at = None`.
    pub fn from_raw(raw: RawArticle, source: &FeedSource, cached_at: DateTime<Utc>) -> Option<Self> {
        let id = canonical_link(&raw.link)?;

        let published_at = raw.published_raw.as_deref().and_then(date::parse_published);
        if published_at.is_none() {
            if let Some(raw_date) = &raw.published_raw {
                tracing::debug!("Unparseable publish date {:?} for {}", raw_date, id);
            }
        }

        let category = raw
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .or_else(|| source.category.clone())
            .unwrap_or_else(default_category);

        let title = raw.title.trim();

        Some(Self {
            title: if title.is_empty() { "Untitled".to_string() } else { title.to_string() },
            body: raw.description.trim().to_string(),
            summary: String::new(),
            published_at,
            image_url: raw.image_url.filter(|u| !u.trim().is_empty()),
            category,
            source: source.display_name(),
            region: source.region.clone(),
            language: source.language.clone(),
            cached_at,
            translated_title: None,
            translated_body: None,
            id,
        })
    }

    /// Title to show, preferring an attached translation.
    pub fn display_title(&self) -> &str {
        self.translated_title.as_deref().unwrap_or(&self.title)
    }

    pub fn is_published_on(&self, day: chrono::NaiveDate) -> bool {
        self.published_at
            .map(|p| p.with_timezone(&chrono::Local).date_naive() == day)
            .unwrap_or(false)
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Canonical form of an article link: trimmed, fragment removed.
///
/// Links that don't parse as absolute URLs are kept verbatim (trimmed) so
/// that odd feeds still deduplicate against themselves.
pub fn canonical_link(link: &str) -> Option<String> {
    let trimmed = link.trim();
    if trimmed.is_empty() {
        return None;
    }

    match url::Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            Some(url.to_string())
        }
        Err(_) => Some(trimmed.to_string()),
    }
}

/// Publisher name derived from a feed URL.
pub fn source_name(feed_url: &str) -> String {
    const KNOWN_PUBLISHERS: &[(&str, &str)] = &[
        ("err.ee", "ERR"),
        ("postimees.ee", "Postimees"),
        ("delfi.ee", "Delfi"),
        ("delfi.lv", "Delfi"),
        ("delfi.lt", "Delfi"),
        ("lsm.lv", "LSM"),
        ("lrt.lt", "LRT"),
        ("yle.fi", "Yle"),
        ("hs.fi", "Helsingin Sanomat"),
    ];

    let Some(host) = url::Url::parse(feed_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    else {
        return feed_url.to_string();
    };

    for (domain, name) in KNOWN_PUBLISHERS {
        if host == *domain || host.ends_with(&format!(".{}", domain)) {
            return name.to_string();
        }
    }

    host.trim_start_matches("www.")
        .trim_start_matches("feeds.")
        .trim_start_matches("rss.")
        .to_string()
}

/// Newest `published_at` first; records without a date sort last.
///
/// The sort is stable, so records with equal dates keep their relative order.
pub fn sort_newest_first(articles: &mut [ArticleRecord]) {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}
