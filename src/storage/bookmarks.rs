use std::collections::HashSet;

/// Article ids the user saved. Independent of the region cache, so
/// bookmarks outlive the articles they point at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkSet {
    ids: HashSet<String>,
}

impl BookmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already bookmarked.
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    /// Returns false if the id wasn't bookmarked.
    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in sorted order, so listings and saved documents are stable.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let mut ids: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.into_iter()
    }
}

impl FromIterator<String> for BookmarkSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bookmark_set_operations() {
        let mut bookmarks = BookmarkSet::new();
        assert!(bookmarks.is_empty());

        assert!(bookmarks.add("https://news.err.ee/2"));
        assert!(bookmarks.add("https://news.err.ee/1"));
        assert!(!bookmarks.add("https://news.err.ee/1"));
        assert_eq!(bookmarks.count(), 2);
        assert!(bookmarks.contains("https://news.err.ee/1"));

        let ids: Vec<_> = bookmarks.iter().collect();
        assert_eq!(ids, vec!["https://news.err.ee/1", "https://news.err.ee/2"]);

        assert!(bookmarks.remove("https://news.err.ee/1"));
        assert!(!bookmarks.remove("https://news.err.ee/1"));
        assert_eq!(bookmarks.count(), 1);

        bookmarks.clear();
        assert_eq!(bookmarks.count(), 0);
    }

    #[test]
    fn test_iter_is_sorted_whatever_the_insert_order() {
        let mut bookmarks = BookmarkSet::new();
        for n in [7, 3, 9, 1, 5] {
            bookmarks.add(format!("https://yle.fi/a/{}", n));
        }

        let ids: Vec<_> = bookmarks.iter().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_collect_dedups() {
        let bookmarks: BookmarkSet = vec!["a".to_string(), "b".to_string(), "a".to_string()]
            .into_iter()
            .collect();
        assert_eq!(bookmarks.count(), 2);
    }
}
