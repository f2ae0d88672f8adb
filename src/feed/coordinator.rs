use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::{Config, FeedSource};
use crate::error::{Error, Result};
use crate::feed::fetcher::FeedFetcher;
use crate::feed::{ArticleRecord, RawArticle};
use crate::storage::{CacheStore, MergeMode, MergeOutcome};

/// Produces the raw items of one configured source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<RawArticle>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Fetched { articles: usize },
    Unavailable { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub url: String,
    pub region: String,
    pub source: String,
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegionStatus {
    Merged(MergeOutcome),
    /// Some sources failed; the region was merged without dropping anything.
    Partial {
        outcome: MergeOutcome,
        failed_sources: usize,
    },
    /// Every source failed. The cached set is untouched.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionUpdate {
    pub region: String,
    pub status: RegionStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub sources: Vec<SourceReport>,
    pub regions: Vec<RegionUpdate>,
}

impl FetchReport {
    pub fn succeeded(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Fetched { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Unavailable { .. }))
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn region(&self, region: &str) -> Option<&RegionUpdate> {
        self.regions.iter().find(|r| r.region == region)
    }
}

#[derive(Default)]
struct RegionBatch {
    records: Vec<ArticleRecord>,
    succeeded: usize,
    failed: usize,
}

/// Fans out over configured sources and merges the results region by region.
///
/// A failing source never blocks the others. Its region keeps whatever was
/// cached, and successful sources of the same region are merged without
/// evicting anything.
pub struct FetchCoordinator {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn SourceFetcher>,
    sources: Vec<FeedSource>,
    concurrency: usize,
}

impl FetchCoordinator {
    pub fn new(store: Arc<CacheStore>, fetcher: Arc<dyn SourceFetcher>, sources: Vec<FeedSource>) -> Self {
        Self {
            store,
            fetcher,
            sources,
            concurrency: 5,
        }
    }

    pub fn from_config(config: &Config, store: Arc<CacheStore>) -> Result<Self> {
        let fetcher = FeedFetcher::from_settings(&config.settings)?;
        Ok(Self::new(store, Arc::new(fetcher), config.sources.clone())
            .with_concurrency(config.settings.concurrent_fetches))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub async fn refresh_all(&self) -> FetchReport {
        let sources: Vec<&FeedSource> = self.sources.iter().collect();
        self.refresh_sources(sources).await
    }

    pub async fn refresh_region(&self, region: &str) -> Result<FetchReport> {
        let sources: Vec<&FeedSource> = self.sources.iter().filter(|s| s.region == region).collect();
        if sources.is_empty() {
            return Err(Error::NotFound(format!("No sources configured for region '{}'", region)));
        }
        Ok(self.refresh_sources(sources).await)
    }

    /// Refreshes only regions that are empty or past their expiry.
    pub async fn refresh_stale(&self) -> FetchReport {
        let sources: Vec<&FeedSource> = self
            .sources
            .iter()
            .filter(|s| self.store.freshness(&s.region).needs_refresh())
            .collect();

        if sources.is_empty() {
            debug!("All regions are fresh, nothing to refresh");
            return FetchReport::default();
        }
        self.refresh_sources(sources).await
    }

    async fn refresh_sources(&self, sources: Vec<&FeedSource>) -> FetchReport {
        info!("Refreshing {} sources", sources.len());

        let fetched: Vec<(&FeedSource, Result<Vec<RawArticle>>)> = stream::iter(sources)
            .map(|source| async move { (source, self.fetcher.fetch(source).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let cached_at = Utc::now();
        let mut report = FetchReport::default();
        let mut batches: BTreeMap<String, RegionBatch> = BTreeMap::new();

        for (source, result) in fetched {
            let batch = batches.entry(source.region.clone()).or_default();
            let outcome = match result {
                Ok(items) => {
                    let fetched = items.len();
                    let records: Vec<ArticleRecord> = items
                        .into_iter()
                        .filter_map(|raw| ArticleRecord::from_raw(raw, source, cached_at))
                        .collect();
                    if records.len() < fetched {
                        debug!("Skipped {} items without a link from {}", fetched - records.len(), source.url);
                    }
                    debug!("Fetched {} articles from {}", records.len(), source.url);

                    batch.succeeded += 1;
                    let articles = records.len();
                    batch.records.extend(records);
                    SourceOutcome::Fetched { articles }
                }
                Err(e) => {
                    warn!(region = %source.region, code = e.error_code(), "Source {} unavailable: {}", source.url, e);
                    batch.failed += 1;
                    SourceOutcome::Unavailable { error: e.to_string() }
                }
            };

            report.sources.push(SourceReport {
                url: source.url.clone(),
                region: source.region.clone(),
                source: source.display_name(),
                outcome,
            });
        }

        // Merging persists through the store's blob backend, which does
        // synchronous file I/O.
        let regions: Vec<String> = batches.keys().cloned().collect();
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || merge_batches(&store, batches)).await {
            Ok(updates) => report.regions = updates,
            Err(e) => {
                error!("Merge task failed: {}", e);
                report.regions = regions
                    .into_iter()
                    .map(|region| RegionUpdate {
                        region,
                        status: RegionStatus::Unavailable,
                    })
                    .collect();
            }
        }

        info!(
            "Refresh complete: {}/{} sources succeeded",
            report.succeeded(),
            report.sources.len()
        );
        report
    }
}

fn merge_batches(store: &CacheStore, batches: BTreeMap<String, RegionBatch>) -> Vec<RegionUpdate> {
    batches
        .into_iter()
        .map(|(region, batch)| {
            let status = if batch.succeeded == 0 {
                warn!(region = %region, "All sources failed, keeping cached articles");
                RegionStatus::Unavailable
            } else if batch.failed > 0 {
                let outcome = store.update_cache_with(&region, batch.records, MergeMode::IncrementalOnly);
                RegionStatus::Partial {
                    outcome,
                    failed_sources: batch.failed,
                }
            } else {
                RegionStatus::Merged(store.update_cache(&region, batch.records))
            };
            RegionUpdate { region, status }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ArticlePatch;
    use crate::storage::{BlobStore, CacheConfig, MemoryBlobStore, MergeKind, PersistentCache};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves canned items per URL; unknown URLs fail.
    #[derive(Default)]
    struct MockFetcher {
        feeds: parking_lot::Mutex<HashMap<String, Vec<RawArticle>>>,
        calls: AtomicUsize,
    }

    impl MockFetcher {
        fn serve(&self, url: &str, links: &[&str]) {
            let items = links
                .iter()
                .map(|link| RawArticle {
                    title: format!("Story at {}", link),
                    link: link.to_string(),
                    published_raw: Some("2024-03-15T10:00:00Z".to_string()),
                    ..Default::default()
                })
                .collect();
            self.feeds.lock().insert(url.to_string(), items);
        }

        fn take_down(&self, url: &str) {
            self.feeds.lock().remove(url);
        }
    }

    #[async_trait]
    impl SourceFetcher for MockFetcher {
        async fn fetch(&self, source: &FeedSource) -> Result<Vec<RawArticle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.feeds
                .lock()
                .get(&source.url)
                .cloned()
                .ok_or_else(|| Error::HttpError(format!("HTTP 503 for {}", source.url)))
        }
    }

    fn sources() -> Vec<FeedSource> {
        vec![
            FeedSource::new("https://news.err.ee/rss", "Estonia", "en"),
            FeedSource::new("https://news.postimees.ee/rss", "Estonia", "en"),
            FeedSource::new("https://eng.lsm.lv/rss/", "Latvia", "en"),
        ]
    }

    fn links(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|n| format!("{}/{}", prefix, n)).collect()
    }

    fn as_refs(links: &[String]) -> Vec<&str> {
        links.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn test_refresh_all_merges_each_region() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("https://news.err.ee/rss", &["https://news.err.ee/1", "https://news.err.ee/2"]);
        fetcher.serve("https://news.postimees.ee/rss", &["https://news.postimees.ee/1"]);
        fetcher.serve("https://eng.lsm.lv/rss/", &["https://eng.lsm.lv/1"]);

        let store = Arc::new(CacheStore::default());
        let coordinator = FetchCoordinator::new(Arc::clone(&store), fetcher, sources());
        let report = coordinator.refresh_all().await;

        assert!(report.is_complete());
        assert_eq!(report.succeeded(), 3);
        assert_eq!(store.get("Estonia").len(), 3);
        assert_eq!(store.get("Latvia").len(), 1);
        assert!(matches!(
            report.region("Estonia").unwrap().status,
            RegionStatus::Merged(MergeOutcome { kind: MergeKind::Reset, .. })
        ));

        let article = store.find("https://eng.lsm.lv/1").unwrap();
        assert_eq!(article.region, "Latvia");
        assert_eq!(article.source, "LSM");
    }

    #[tokio::test]
    async fn test_failed_region_keeps_cached_articles() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("https://news.err.ee/rss", &["https://news.err.ee/1"]);
        fetcher.serve("https://news.postimees.ee/rss", &["https://news.postimees.ee/1"]);
        fetcher.serve("https://eng.lsm.lv/rss/", &["https://eng.lsm.lv/1", "https://eng.lsm.lv/2"]);

        let store = Arc::new(CacheStore::default());
        let coordinator = FetchCoordinator::new(Arc::clone(&store), fetcher.clone(), sources());
        coordinator.refresh_all().await;
        let stamp = store.last_updated("Latvia");

        fetcher.take_down("https://eng.lsm.lv/rss/");
        let report = coordinator.refresh_all().await;

        assert!(!report.is_complete());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.region("Latvia").unwrap().status, RegionStatus::Unavailable);
        assert_eq!(store.get("Latvia").len(), 2);
        assert_eq!(store.last_updated("Latvia"), stamp);
        assert_eq!(store.get("Estonia").len(), 2);
    }

    #[tokio::test]
    async fn test_partial_region_never_evicts() {
        let fetcher = Arc::new(MockFetcher::default());
        let err_links = links("https://news.err.ee", 20);
        let postimees_links = links("https://news.postimees.ee", 20);
        fetcher.serve("https://news.err.ee/rss", &as_refs(&err_links));
        fetcher.serve("https://news.postimees.ee/rss", &as_refs(&postimees_links));

        let store = Arc::new(CacheStore::default());
        let coordinator = FetchCoordinator::new(Arc::clone(&store), fetcher.clone(), sources());
        coordinator.refresh_region("Estonia").await.unwrap();
        assert_eq!(store.get("Estonia").len(), 40);

        // Half the region disappears: a plain merge would treat this as a feed reset.
        fetcher.take_down("https://news.postimees.ee/rss");
        let report = coordinator.refresh_region("Estonia").await.unwrap();

        match &report.region("Estonia").unwrap().status {
            RegionStatus::Partial { outcome, failed_sources } => {
                assert_eq!(*failed_sources, 1);
                assert_eq!(outcome.kind, MergeKind::Incremental);
                assert_eq!(outcome.removed, 0);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(store.get("Estonia").len(), 40);
    }

    #[tokio::test]
    async fn test_refresh_region_unknown() {
        let coordinator = FetchCoordinator::new(
            Arc::new(CacheStore::default()),
            Arc::new(MockFetcher::default()),
            sources(),
        );
        assert!(matches!(coordinator.refresh_region("Narnia").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_refresh_stale_skips_fresh_regions() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("https://news.err.ee/rss", &["https://news.err.ee/1"]);
        fetcher.serve("https://news.postimees.ee/rss", &["https://news.postimees.ee/1"]);
        fetcher.serve("https://eng.lsm.lv/rss/", &["https://eng.lsm.lv/1"]);

        let store = Arc::new(CacheStore::default());
        let coordinator = FetchCoordinator::new(Arc::clone(&store), fetcher.clone(), sources());

        coordinator.refresh_region("Latvia").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let report = coordinator.refresh_stale().await;
        assert_eq!(report.sources.len(), 2);
        assert!(report.sources.iter().all(|s| s.region == "Estonia"));

        let report = coordinator.refresh_stale().await;
        assert!(report.sources.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);

        // Expired regions are picked up again.
        let expired = Arc::new(CacheStore::new(CacheConfig {
            expiry_interval: Duration::ZERO,
            ..Default::default()
        }));
        let coordinator = FetchCoordinator::new(expired, fetcher, sources());
        coordinator.refresh_all().await;
        assert_eq!(coordinator.refresh_stale().await.sources.len(), 3);
    }

    /// Tracks how many fetches are in flight at once.
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for SlowFetcher {
        async fn fetch(&self, source: &FeedSource) -> Result<Vec<RawArticle>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(vec![RawArticle {
                title: "Item".to_string(),
                link: format!("{}/item", source.url),
                ..Default::default()
            }])
        }
    }

    #[tokio::test]
    async fn test_fan_out_respects_concurrency_limit() {
        let fetcher = Arc::new(SlowFetcher {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let sources: Vec<FeedSource> = (0..8)
            .map(|n| FeedSource::new(format!("https://feeds.example/{}", n), format!("Region {}", n % 4), "en"))
            .collect();

        let store = Arc::new(CacheStore::default());
        let coordinator = FetchCoordinator::new(Arc::clone(&store), fetcher.clone(), sources).with_concurrency(3);
        let report = coordinator.refresh_all().await;

        assert_eq!(report.succeeded(), 8);
        assert_eq!(report.regions.len(), 4);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
        assert!(fetcher.peak.load(Ordering::SeqCst) > 1);
        assert_eq!(store.stats().total_articles, 8);
    }

    #[tokio::test]
    async fn test_overlapping_sources_keep_annotations() {
        let fetcher = Arc::new(MockFetcher::default());
        let shared = links("https://news.err.ee", 50);
        fetcher.serve("https://news.err.ee/rss", &as_refs(&shared));
        fetcher.serve("https://news.postimees.ee/rss", &as_refs(&shared));

        let store = Arc::new(CacheStore::default());
        let coordinator = FetchCoordinator::new(Arc::clone(&store), fetcher, sources());
        coordinator.refresh_region("Estonia").await.unwrap();
        assert_eq!(store.get("Estonia").len(), 50);
        store
            .annotate("Estonia", "https://news.err.ee/7", &ArticlePatch::summary("Kept"))
            .unwrap();

        let report = coordinator.refresh_region("Estonia").await.unwrap();

        match &report.region("Estonia").unwrap().status {
            RegionStatus::Merged(outcome) => assert_eq!(outcome.kind, MergeKind::Incremental),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(store.find("https://news.err.ee/7").unwrap().summary, "Kept");
    }

    /// Records which threads performed writes.
    #[derive(Default)]
    struct ThreadRecordingBlobStore {
        inner: MemoryBlobStore,
        writers: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl BlobStore for ThreadRecordingBlobStore {
        fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
            self.inner.read(name)
        }

        fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
            self.writers.lock().push(std::thread::current().id());
            self.inner.write(name, bytes)
        }

        fn remove(&self, name: &str) -> Result<()> {
            self.inner.remove(name)
        }

        fn location(&self) -> String {
            self.inner.location()
        }
    }

    #[tokio::test]
    async fn test_merge_and_save_run_off_the_runtime_thread() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.serve("https://eng.lsm.lv/rss/", &["https://eng.lsm.lv/1"]);

        let blobs = Arc::new(ThreadRecordingBlobStore::default());
        let persistence = Arc::new(PersistentCache::new(blobs.clone()));
        let store = Arc::new(CacheStore::default().with_persistence(persistence));
        let coordinator = FetchCoordinator::new(Arc::clone(&store), fetcher, sources());

        coordinator.refresh_region("Latvia").await.unwrap();

        let writers = blobs.writers.lock();
        assert!(!writers.is_empty());
        assert!(writers.iter().all(|id| *id != std::thread::current().id()));
        assert_eq!(store.get("Latvia").len(), 1);
    }
}
