//! Per-region article set and the merge policy that reconciles it with a
//! freshly fetched batch.
//!
//! A merge is either a *feed reset* (the incoming batch replaces the cached
//! set wholesale) or *incremental* (cached records are kept untouched and only
//! unseen ids are appended). Which one applies is decided by how much the
//! article count moved between the two sets.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::feed::{sort_newest_first, ArticleRecord};

/// Tunable feed-reset heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergePolicy {
    /// A change ratio strictly above this replaces the cached set.
    pub reset_threshold: f64,
}

impl MergePolicy {
    pub const DEFAULT_RESET_THRESHOLD: f64 = 0.10;
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            reset_threshold: Self::DEFAULT_RESET_THRESHOLD,
        }
    }
}

/// Whether a merge may take the feed-reset branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    #[default]
    Auto,
    /// Never replace; used when only part of a region's sources answered.
    IncrementalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Reset,
    Incremental,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub kind: MergeKind,
    pub change_ratio: f64,
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

/// `|incoming - existing| / max(existing, incoming, 1)`
pub fn change_ratio(existing: usize, incoming: usize) -> f64 {
    let diff = existing.abs_diff(incoming) as f64;
    diff / existing.max(incoming).max(1) as f64
}

/// Collapses duplicate ids, keeping the first occurrence.
pub fn dedup_by_id(articles: Vec<ArticleRecord>) -> Vec<ArticleRecord> {
    let mut seen = HashSet::with_capacity(articles.len());
    articles
        .into_iter()
        .filter(|a| seen.insert(a.id.clone()))
        .collect()
}

/// Reconciles `existing` with `incoming` and returns the new, sorted set.
///
/// The change ratio is measured on the deduplicated batch, so sources that
/// overlap within a region don't look like a count swing. An empty `incoming`
/// batch never shrinks the cached set, whatever the ratio. Records new to the
/// region are stamped `cached_at = now`; known ids keep their cached stamp.
pub fn merge_articles(
    existing: &[ArticleRecord],
    incoming: Vec<ArticleRecord>,
    policy: &MergePolicy,
    mode: MergeMode,
    now: DateTime<Utc>,
) -> (Vec<ArticleRecord>, MergeOutcome) {
    let mut incoming = dedup_by_id(incoming);
    let ratio = change_ratio(existing.len(), incoming.len());

    let reset = mode == MergeMode::Auto
        && !incoming.is_empty()
        && ratio > policy.reset_threshold;

    let cached: HashMap<&str, DateTime<Utc>> = existing
        .iter()
        .map(|a| (a.id.as_str(), a.cached_at))
        .collect();
    for record in &mut incoming {
        record.cached_at = cached.get(record.id.as_str()).copied().unwrap_or(now);
    }

    let (mut merged, kind, added, removed) = if reset {
        let incoming_ids: HashSet<&str> = incoming.iter().map(|a| a.id.as_str()).collect();
        let added = incoming
            .iter()
            .filter(|a| !cached.contains_key(a.id.as_str()))
            .count();
        let removed = existing
            .iter()
            .filter(|a| !incoming_ids.contains(a.id.as_str()))
            .count();
        (incoming, MergeKind::Reset, added, removed)
    } else {
        let fresh: Vec<ArticleRecord> = incoming
            .into_iter()
            .filter(|a| !cached.contains_key(a.id.as_str()))
            .collect();
        let added = fresh.len();
        let mut merged = Vec::with_capacity(existing.len() + added);
        merged.extend_from_slice(existing);
        merged.extend(fresh);
        (merged, MergeKind::Incremental, added, 0)
    };

    sort_newest_first(&mut merged);

    let outcome = MergeOutcome {
        kind,
        change_ratio: ratio,
        added,
        removed,
        total: merged.len(),
    };

    (merged, outcome)
}

/// Articles cached for one region plus the time of the last merge.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionCache {
    region: String,
    articles: Vec<ArticleRecord>,
    last_updated: Option<DateTime<Utc>>,
}

impl RegionCache {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            articles: Vec::new(),
            last_updated: None,
        }
    }

    /// Rebuilds a region from persisted parts, re-establishing uniqueness
    /// and ordering in case the stored document was edited by hand.
    pub fn restore(
        region: impl Into<String>,
        articles: Vec<ArticleRecord>,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        let mut articles = dedup_by_id(articles);
        sort_newest_first(&mut articles);
        Self {
            region: region.into(),
            articles,
            last_updated,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn articles(&self) -> &[ArticleRecord] {
        &self.articles
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.articles.iter().any(|a| a.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&ArticleRecord> {
        self.articles.iter().find(|a| a.id == id)
    }

    /// Merges a fetched batch and stamps `last_updated = now`, on either
    /// branch and for empty batches too.
    pub fn merge(
        &mut self,
        incoming: Vec<ArticleRecord>,
        policy: &MergePolicy,
        mode: MergeMode,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        let (merged, outcome) = merge_articles(&self.articles, incoming, policy, mode, now);
        self.articles = merged;
        self.last_updated = Some(now);
        outcome
    }

    /// Update-in-place for collaborator annotations. Leaves `last_updated`
    /// alone. Returns `None` if the id isn't cached here, otherwise whether
    /// anything changed.
    pub fn annotate(&mut self, id: &str, patch: &crate::feed::ArticlePatch) -> Option<bool> {
        self.articles
            .iter_mut()
            .find(|a| a.id == id)
            .map(|record| patch.apply(record))
    }

    pub fn into_parts(self) -> (String, Vec<ArticleRecord>, Option<DateTime<Utc>>) {
        (self.region, self.articles, self.last_updated)
    }
}
