use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{FeedSource, Settings};
use crate::error::{Error, Result};
use crate::feed::coordinator::SourceFetcher;
use crate::feed::parser::FeedParser;
use crate::feed::RawArticle;

/// HTTP fetch collaborator: downloads a feed and hands its items over as
/// [`RawArticle`]s.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: Client,
    timeout_duration: Duration,
    user_agent: String,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        Self::from_settings(&Settings::default())
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout_duration = Duration::from_secs(settings.timeout);
        let client = Client::builder()
            .timeout(timeout_duration)
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .build()
            .map_err(|e| Error::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout_duration,
            user_agent: settings.user_agent.clone(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_duration = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<RawArticle>> {
        debug!("Fetching feed from: {}", url);

        let parser = FeedParser::new();
        parser.validate_feed_url(url)?;

        let response = timeout(self.timeout_duration, self.fetch_response(url))
            .await
            .map_err(|_| Error::Timeout(format!("Request to {} timed out", url)))??;

        if !response.status().is_success() {
            return Err(Error::HttpError(format!(
                "HTTP {} for {}: {}",
                response.status().as_u16(),
                url,
                response.status().canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let content = timeout(self.timeout_duration, response.bytes())
            .await
            .map_err(|_| Error::Timeout(format!("Reading body of {} timed out", url)))?
            .map_err(|e| Error::HttpError(format!("Failed to read response body: {}", e)))?;

        debug!("Downloaded {} bytes from {}", content.len(), url);

        parser.parse_feed(std::io::Cursor::new(content))
    }

    async fn fetch_response(&self, url: &str) -> Result<Response> {
        self.client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/rss+xml, application/atom+xml, application/xml, text/xml, */*")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Request to {} timed out", url))
                } else {
                    Error::HttpError(format!("Request failed: {}", e))
                }
            })
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<RawArticle>> {
        self.fetch_feed(&source.url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>LSM</title>
        <link>https://eng.lsm.lv</link>
        <item>
            <title>Riga airport traffic grows</title>
            <link>https://eng.lsm.lv/article/economy/riga-airport.a1</link>
            <description>Passenger numbers rose again.</description>
            <pubDate>Fri, 15 Mar 2024 10:00:00 GMT</pubDate>
        </item>
    </channel>
</rss>"#;

    #[tokio::test]
    async fn test_fetch_valid_feed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS_RESPONSE)
                    .insert_header("content-type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let articles = fetcher.fetch_feed(&format!("{}/rss", mock_server.uri())).await.unwrap();

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Riga airport traffic grows");
        assert_eq!(articles[0].link, "https://eng.lsm.lv/article/economy/riga-airport.a1");
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let result = fetcher.fetch_feed(&format!("{}/missing", mock_server.uri())).await;

        match result {
            Err(Error::HttpError(msg)) => assert!(msg.contains("404")),
            other => panic!("Expected HttpError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_string(VALID_RSS_RESPONSE),
            )
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap().with_timeout(Duration::from_millis(100));
        let result = fetcher.fetch_feed(&format!("{}/slow", mock_server.uri())).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let result = fetcher.fetch_feed(&format!("{}/broken", mock_server.uri())).await;

        assert!(matches!(result, Err(Error::FeedParse(_))));
    }

    #[tokio::test]
    async fn test_user_agent_header_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rss"))
            .and(header("user-agent", "RegionalBot/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new()
            .unwrap()
            .with_user_agent("RegionalBot/1.0".to_string());
        let result = fetcher.fetch_feed(&format!("{}/rss", mock_server.uri())).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_url_schemes() {
        let fetcher = FeedFetcher::new().unwrap();

        for url in ["ftp://example.com/feed.xml", "file:///local/feed.xml", "javascript:alert('xss')"] {
            let result = fetcher.fetch_feed(url).await;
            assert!(matches!(result, Err(Error::InvalidUrl(_))), "expected InvalidUrl for {}", url);
        }
    }

    #[tokio::test]
    async fn test_source_fetcher_uses_source_url() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS_RESPONSE))
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/rss", mock_server.uri()), "Latvia", "en");
        let fetcher = FeedFetcher::new().unwrap();
        let articles = SourceFetcher::fetch(&fetcher, &source).await.unwrap();

        assert_eq!(articles.len(), 1);
    }
}
