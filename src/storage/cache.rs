use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::feed::{sort_newest_first, ArticlePatch, ArticleRecord};
use crate::storage::persistent_cache::{CacheSnapshot, PersistentCache};
use crate::storage::region::{MergeMode, MergeOutcome, MergePolicy, RegionCache};

/// Configuration for cache behavior
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// A region is valid while its last merge is younger than this.
    pub expiry_interval: Duration,
    pub merge_policy: MergePolicy,
    /// `stats().is_healthy` requires every region to be refreshed within this window.
    pub health_window: Duration,
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(6 * 60 * 60),
            merge_policy: MergePolicy::default(),
            health_window: Duration::from_secs(24 * 60 * 60),
            event_capacity: 64,
        }
    }
}

/// Cache statistics for status output and health checks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub total_articles: usize,
    pub total_regions: usize,
    pub oldest_cache_timestamp: Option<DateTime<Utc>>,
    pub newest_cache_timestamp: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    pub articles_by_region: BTreeMap<String, usize>,
}

/// Where a region sits in its `Empty -> Fresh -> Stale -> Fresh` lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Empty,
    Fresh { age: Duration },
    /// `age` is `None` for regions restored without a merge timestamp.
    Stale { age: Option<Duration> },
}

impl Freshness {
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, Freshness::Fresh { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated { region: String, outcome: MergeOutcome },
    Annotated { region: String, id: String },
    Cleared { region: Option<String> },
}

/// Region-keyed article cache.
///
/// Every region is held behind an `Arc` and replaced wholesale on write, so
/// readers always see either the pre- or post-merge set. Writers to the same
/// region are serialized through a per-region lock; different regions merge
/// independently.
pub struct CacheStore {
    regions: RwLock<HashMap<String, Arc<RegionCache>>>,
    writers: DashMap<String, Arc<Mutex<()>>>,
    config: CacheConfig,
    persistence: Option<Arc<PersistentCache>>,
    save_lock: Mutex<()>,
    dirty: AtomicBool,
    events: broadcast::Sender<CacheEvent>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            regions: RwLock::new(HashMap::new()),
            writers: DashMap::new(),
            config,
            persistence: None,
            save_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            events,
        }
    }

    /// Restores the persisted cache and keeps saving to the same place after
    /// every mutation. Never fails: unreadable state boots an empty cache.
    pub fn open(config: CacheConfig, persistence: Arc<PersistentCache>) -> Self {
        persistence.load(config).with_persistence(persistence)
    }

    pub fn with_persistence(mut self, persistence: Arc<PersistentCache>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn from_snapshot(config: CacheConfig, snapshot: CacheSnapshot) -> Self {
        let store = Self::new(config);
        let CacheSnapshot {
            articles,
            mut last_updated,
            ..
        } = snapshot;

        {
            let mut regions = store.regions.write();
            for (region, records) in articles {
                let stamp = last_updated.remove(&region);
                regions.insert(region.clone(), Arc::new(RegionCache::restore(region, records, stamp)));
            }
            // A region can be fetched before it ever returned an article.
            for (region, stamp) in last_updated {
                regions.insert(
                    region.clone(),
                    Arc::new(RegionCache::restore(region, Vec::new(), Some(stamp))),
                );
            }
        }

        store
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::empty();
        for region in self.region_caches() {
            if let Some(stamp) = region.last_updated() {
                snapshot.last_updated.insert(region.region().to_string(), stamp);
            }
            snapshot
                .articles
                .insert(region.region().to_string(), region.articles().to_vec());
        }
        snapshot
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: CacheEvent) {
        // No subscribers is the common case.
        let _ = self.events.send(event);
    }

    fn writer(&self, region: &str) -> Arc<Mutex<()>> {
        self.writers.entry(region.to_string()).or_default().clone()
    }

    /// Cheap snapshot of one region.
    pub fn region(&self, region: &str) -> Option<Arc<RegionCache>> {
        self.regions.read().get(region).cloned()
    }

    fn region_caches(&self) -> Vec<Arc<RegionCache>> {
        let mut regions: Vec<_> = self.regions.read().values().cloned().collect();
        regions.sort_by(|a, b| a.region().cmp(b.region()));
        regions
    }

    pub fn update_cache(&self, region: &str, incoming: Vec<ArticleRecord>) -> MergeOutcome {
        self.update_cache_with(region, incoming, MergeMode::Auto)
    }

    /// Merges a fetched batch into `region`, then persists once for the batch.
    pub fn update_cache_with(
        &self,
        region: &str,
        incoming: Vec<ArticleRecord>,
        mode: MergeMode,
    ) -> MergeOutcome {
        let writer = self.writer(region);
        let outcome = {
            let _guard = writer.lock();

            let mut next = self
                .region(region)
                .map(|current| (*current).clone())
                .unwrap_or_else(|| RegionCache::new(region));
            let incoming_count = incoming.len();
            let outcome = next.merge(incoming, &self.config.merge_policy, mode, Utc::now());

            self.regions.write().insert(region.to_string(), Arc::new(next));

            info!(
                region,
                incoming = incoming_count,
                kind = ?outcome.kind,
                change_ratio = outcome.change_ratio,
                added = outcome.added,
                removed = outcome.removed,
                total = outcome.total,
                "Merged region cache"
            );
            outcome
        };

        self.persist();
        self.notify(CacheEvent::Updated {
            region: region.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Attaches collaborator output (summary, translation) to a cached record.
    ///
    /// Not a merge: `last_updated` and the change ratio are unaffected.
    /// Returns whether the record changed.
    pub fn annotate(&self, region: &str, id: &str, patch: &ArticlePatch) -> Result<bool> {
        if patch.is_empty() {
            return Err(Error::Invalid(format!("Empty annotation for '{}'", id)));
        }

        let writer = self.writer(region);
        let changed = {
            let _guard = writer.lock();

            let current = self
                .region(region)
                .ok_or_else(|| Error::NotFound(format!("Region '{}' is not cached", region)))?;
            let mut next = (*current).clone();
            let changed = next
                .annotate(id, patch)
                .ok_or_else(|| Error::NotFound(format!("Article '{}' is not cached in {}", id, region)))?;

            if changed {
                self.regions.write().insert(region.to_string(), Arc::new(next));
            }
            changed
        };

        if changed {
            debug!(region, id, "Annotated cached article");
            self.persist();
            self.notify(CacheEvent::Annotated {
                region: region.to_string(),
                id: id.to_string(),
            });
        }
        Ok(changed)
    }

    /// Drops a region's articles and merge timestamp. Returns whether the
    /// region was cached.
    pub fn clear(&self, region: &str) -> bool {
        let writer = self.writer(region);
        let removed = {
            let _guard = writer.lock();
            self.regions.write().remove(region).is_some()
        };

        if removed {
            info!(region, "Cleared region cache");
            self.persist();
            self.notify(CacheEvent::Cleared {
                region: Some(region.to_string()),
            });
        }
        removed
    }

    pub fn clear_all(&self) {
        let mut names: Vec<String> = self.writers.iter().map(|w| w.key().clone()).collect();
        names.sort();
        let writers: Vec<_> = names.iter().map(|name| self.writer(name)).collect();

        {
            // Writers only ever hold a single region lock, so taking them all
            // in a fixed order cannot deadlock.
            let _guards: Vec<_> = writers.iter().map(|w| w.lock()).collect();
            self.regions.write().clear();
        }

        info!("Cleared all region caches");
        self.persist();
        self.notify(CacheEvent::Cleared { region: None });
    }

    /// The region's articles, newest first, whether or not they're stale.
    pub fn get(&self, region: &str) -> Vec<ArticleRecord> {
        self.region(region)
            .map(|r| r.articles().to_vec())
            .unwrap_or_default()
    }

    /// Every cached article across regions, newest first.
    pub fn get_all(&self) -> Vec<ArticleRecord> {
        let mut all: Vec<ArticleRecord> = self
            .region_caches()
            .iter()
            .flat_map(|r| r.articles().iter().cloned())
            .collect();
        sort_newest_first(&mut all);
        all
    }

    /// Case-insensitive substring match on the category, across all regions.
    pub fn get_by_category(&self, category: &str) -> Vec<ArticleRecord> {
        let needle = category.to_lowercase();
        let mut matches: Vec<ArticleRecord> = self
            .region_caches()
            .iter()
            .flat_map(|r| r.articles().iter())
            .filter(|a| a.category.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        sort_newest_first(&mut matches);
        matches
    }

    /// The `limit` newest articles across all regions.
    pub fn top(&self, limit: usize) -> Vec<ArticleRecord> {
        let mut all = self.get_all();
        all.truncate(limit);
        all
    }

    /// Today's articles only (local calendar day), newest first. Never
    /// backfilled from earlier days.
    pub fn get_daily_digest(&self, limit: usize) -> Vec<ArticleRecord> {
        self.get_daily_digest_for(Local::now().date_naive(), limit)
    }

    pub fn get_daily_digest_for(&self, day: NaiveDate, limit: usize) -> Vec<ArticleRecord> {
        let mut digest: Vec<ArticleRecord> = self
            .region_caches()
            .iter()
            .flat_map(|r| r.articles().iter())
            .filter(|a| a.is_published_on(day))
            .cloned()
            .collect();
        sort_newest_first(&mut digest);
        digest.truncate(limit);
        digest
    }

    pub fn find(&self, id: &str) -> Option<ArticleRecord> {
        self.region_caches()
            .iter()
            .find_map(|r| r.get(id).cloned())
    }

    pub fn regions(&self) -> Vec<String> {
        self.region_caches()
            .iter()
            .map(|r| r.region().to_string())
            .collect()
    }

    pub fn last_updated(&self, region: &str) -> Option<DateTime<Utc>> {
        self.region(region).and_then(|r| r.last_updated())
    }

    pub fn is_valid(&self, region: &str) -> bool {
        self.is_valid_at(region, Utc::now())
    }

    pub fn is_valid_at(&self, region: &str, now: DateTime<Utc>) -> bool {
        matches!(self.freshness_at(region, now), Freshness::Fresh { .. })
    }

    pub fn freshness(&self, region: &str) -> Freshness {
        self.freshness_at(region, Utc::now())
    }

    pub fn freshness_at(&self, region: &str, now: DateTime<Utc>) -> Freshness {
        let Some(cache) = self.region(region) else {
            return Freshness::Empty;
        };

        match cache.last_updated() {
            Some(stamp) => {
                let age = age_of(stamp, now);
                if age < self.config.expiry_interval {
                    Freshness::Fresh { age }
                } else {
                    Freshness::Stale { age: Some(age) }
                }
            }
            None => Freshness::Stale { age: None },
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> CacheStats {
        let regions = self.region_caches();
        let stamps: Vec<DateTime<Utc>> = regions.iter().filter_map(|r| r.last_updated()).collect();

        let articles_by_region: BTreeMap<String, usize> = regions
            .iter()
            .map(|r| (r.region().to_string(), r.len()))
            .collect();
        let total_articles = articles_by_region.values().sum();

        let oldest_cache_timestamp = stamps.iter().min().copied();
        let newest_cache_timestamp = stamps.iter().max().copied();

        let is_healthy = total_articles > 0
            && oldest_cache_timestamp
                .map(|oldest| age_of(oldest, now) < self.config.health_window)
                .unwrap_or(false);

        CacheStats {
            total_articles,
            total_regions: regions.len(),
            oldest_cache_timestamp,
            newest_cache_timestamp,
            is_healthy,
            articles_by_region,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.read().values().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the last save attempt failed and nothing has succeeded since.
    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Saves immediately, surfacing any error to the caller.
    pub fn flush(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let _guard = self.save_lock.lock();
        persistence.save(self)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        // The snapshot is taken under the lock, so the last save to finish
        // always carries every merge committed before it started.
        let _guard = self.save_lock.lock();
        match persistence.save(self) {
            Ok(()) => self.dirty.store(false, Ordering::SeqCst),
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                warn!("Failed to persist cache, will retry on next change: {}", e);
            }
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Clock skew can put `stamp` in the future; treat that as brand new.
fn age_of(stamp: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - stamp).to_std().unwrap_or(Duration::ZERO)
}
