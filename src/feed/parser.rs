use crate::error::{Error, Result};
use crate::feed::RawArticle;
use feed_rs::model::Entry;
use feed_rs::parser as feed_parser;
use std::io::BufRead;

/// Wraps `feed-rs` and flattens its entries into [`RawArticle`]s.
pub struct FeedParser;

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_feed<R: BufRead>(&self, reader: R) -> Result<Vec<RawArticle>> {
        let feed = feed_parser::parse(reader)
            .map_err(|e| Error::FeedParse(format!("Failed to parse feed: {}", e)))?;

        Ok(feed.entries.into_iter().map(to_raw_article).collect())
    }

    pub fn validate_feed_url(&self, url: &str) -> Result<()> {
        let parsed_url = url::Url::parse(url)
            .map_err(|e| Error::InvalidUrl(format!("Invalid URL: {}", e)))?;

        match parsed_url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(Error::InvalidUrl(format!("Unsupported scheme: {}", scheme))),
        }
    }
}

fn to_raw_article(entry: Entry) -> RawArticle {
    let image_url = image_url(&entry);
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))
        .unwrap_or_default();

    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|d| plain_text(&d))
        .unwrap_or_default();

    RawArticle {
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        link,
        description,
        published_raw: entry.published.or(entry.updated).map(|d| d.to_rfc3339()),
        category: entry.categories.first().map(|c| c.term.clone()),
        image_url,
    }
}

fn image_url(entry: &Entry) -> Option<String> {
    for media in &entry.media {
        if let Some(thumbnail) = media.thumbnails.first() {
            return Some(thumbnail.image.uri.clone());
        }

        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .map_or(false, |mime| mime.to_string().starts_with("image/"));
            if let (true, Some(url)) = (is_image, &content.url) {
                return Some(url.to_string());
            }
        }
    }

    entry
        .links
        .iter()
        .find(|l| {
            l.rel.as_deref() == Some("enclosure")
                && l.media_type.as_deref().map_or(false, |t| t.starts_with("image/"))
        })
        .map(|l| l.href.clone())
}

/// Feeds frequently embed HTML in descriptions; the cache stores plain text.
fn plain_text(content: &str) -> String {
    if !content.contains('<') {
        return content.trim().to_string();
    }

    html2text::from_read(content.as_bytes(), 10_000)
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
