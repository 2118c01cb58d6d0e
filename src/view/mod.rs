//! Filtered, ordered projection of the store for presentation
//!
//! The cache is rebuilt wholesale from the order list whenever the store or
//! the filter changes. It is not synchronized; share it behind a mutex.

pub mod reorder;

use tracing::{debug, warn};

use crate::profile::Profile;
use crate::store::{ProfileStore, StoreError};

pub use reorder::swap_in_full_order;

/// One visible row: a GUID and a snapshot of its profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    pub guid: String,
    pub profile: Profile,
}

#[derive(Debug, Default)]
pub struct ViewCache {
    /// Subscription group to show; empty shows every group
    scope: String,
    /// Case-insensitive remarks filter; empty disables it
    keyword: String,
    entries: Vec<ViewEntry>,
}

impl ViewCache {
    pub fn new(scope: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            keyword: keyword.into(),
            entries: Vec::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Replace the filter; returns whether anything changed. Call [`rebuild`](Self::rebuild) after.
    pub fn set_filter(&mut self, scope: &str, keyword: &str) -> bool {
        if self.scope == scope && self.keyword == keyword {
            return false;
        }
        self.scope = scope.to_string();
        self.keyword = keyword.to_string();
        true
    }

    /// True when the cache shows the full order list unchanged
    pub fn is_unfiltered(&self) -> bool {
        self.scope.is_empty() && self.keyword.is_empty()
    }

    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matches(&self, profile: &Profile) -> bool {
        if !self.scope.is_empty() && profile.subscription_id != self.scope {
            return false;
        }
        self.keyword.is_empty()
            || profile
                .remarks
                .to_lowercase()
                .contains(&self.keyword.to_lowercase())
    }

    /// Re-read the order list and rebuild the visible entries
    ///
    /// GUIDs without a readable profile (left over from a partial delete)
    /// are skipped.
    pub fn rebuild(&mut self, store: &ProfileStore) {
        let mut entries = Vec::new();
        for guid in store.guids() {
            let Some(profile) = store.profile(&guid) else {
                debug!(guid = %guid, "Skipping GUID without profile body");
                continue;
            };
            if self.matches(&profile) {
                entries.push(ViewEntry { guid, profile });
            }
        }
        debug!(scope = %self.scope, keyword = %self.keyword, visible = entries.len(), "Rebuilt view cache");
        self.entries = entries;
    }

    pub fn position_of(&self, guid: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.guid == guid)
    }

    /// Swap two visible rows and persist the matching change to the order list
    pub fn swap(&mut self, store: &ProfileStore, from: usize, to: usize) -> Result<(), StoreError> {
        if from >= self.entries.len() || to >= self.entries.len() {
            warn!(from, to, len = self.entries.len(), "Swap index out of range");
            return Ok(());
        }

        let full = store.guids();
        let visible: Vec<String> = self.entries.iter().map(|e| e.guid.clone()).collect();
        // Tombstones make even an unfiltered view shorter than the order list
        let direct = self.is_unfiltered() && visible == full;
        match swap_in_full_order(&full, &visible, from, to, direct) {
            Some(order) => store.save_guid_order(&order)?,
            None => warn!(from, to, "Visible entries out of sync with order list, swapping view only"),
        }

        self.entries.swap(from, to);
        Ok(())
    }

    /// Drop a row; the caller has already removed the GUID from the store
    pub fn remove_at(&mut self, index: usize) -> Option<ViewEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// Re-read one entry's profile in place; returns its position if visible
    pub fn refresh_entry(&mut self, store: &ProfileStore, guid: &str) -> Option<usize> {
        let index = self.position_of(guid)?;
        match store.profile(guid) {
            Some(profile) => self.entries[index].profile = profile,
            None => warn!(guid = %guid, "Visible entry has no profile body anymore"),
        }
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ConfigType;

    fn open() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn profile(remarks: &str, sub: &str) -> Profile {
        let mut p = Profile::new(ConfigType::Hysteria2);
        p.remarks = remarks.to_string();
        p.server = "example.com".to_string();
        p.password = "secret".to_string();
        p.subscription_id = sub.to_string();
        p
    }

    /// Insert in reverse so the order list reads as given
    fn seed(store: &ProfileStore, items: &[(&str, &str)]) -> Vec<String> {
        let mut guids: Vec<String> = items
            .iter()
            .rev()
            .map(|(remarks, sub)| store.put_profile(None, &profile(remarks, sub)).unwrap())
            .collect();
        guids.reverse();
        guids
    }

    fn remarks(cache: &ViewCache) -> Vec<&str> {
        cache.entries().iter().map(|e| e.profile.remarks.as_str()).collect()
    }

    #[test]
    fn test_keyword_filter_case_insensitive() {
        let (_dir, store) = open();
        seed(&store, &[("Tokyo-1", ""), ("tokyo-2", ""), ("Osaka", "")]);

        let mut cache = ViewCache::new("", "tokyo");
        cache.rebuild(&store);
        assert_eq!(remarks(&cache), vec!["Tokyo-1", "tokyo-2"]);

        cache.set_filter("", "TOKYO");
        cache.rebuild(&store);
        assert_eq!(remarks(&cache), vec!["Tokyo-1", "tokyo-2"]);
    }

    #[test]
    fn test_scope_filter_preserves_order() {
        let (_dir, store) = open();
        seed(&store, &[("a", "s1"), ("b", "s2"), ("c", "s1"), ("d", "")]);

        let mut cache = ViewCache::new("s1", "");
        cache.rebuild(&store);
        assert_eq!(remarks(&cache), vec!["a", "c"]);

        cache.set_filter("", "");
        cache.rebuild(&store);
        assert_eq!(remarks(&cache), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_rebuild_skips_tombstones() {
        let (_dir, store) = open();
        let guids = seed(&store, &[("a", ""), ("b", "")]);
        let mut order = store.guids();
        order.insert(1, "ghost".to_string());
        store.save_guid_order(&order).unwrap();

        let mut cache = ViewCache::default();
        cache.rebuild(&store);
        let seen: Vec<&str> = cache.entries().iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(seen, vec![guids[0].as_str(), guids[1].as_str()]);
    }

    #[test]
    fn test_swap_under_scope_translates_indices() {
        let (_dir, store) = open();
        let g = seed(&store, &[("A", "other"), ("B", "s"), ("C", "other"), ("D", "s")]);

        let mut cache = ViewCache::new("s", "");
        cache.rebuild(&store);
        assert_eq!(remarks(&cache), vec!["B", "D"]);

        cache.swap(&store, 0, 1).unwrap();

        assert_eq!(store.guids(), vec![g[0].clone(), g[3].clone(), g[2].clone(), g[1].clone()]);
        assert_eq!(remarks(&cache), vec!["D", "B"]);
    }

    #[test]
    fn test_swap_unfiltered() {
        let (_dir, store) = open();
        let g = seed(&store, &[("A", ""), ("B", ""), ("C", "")]);

        let mut cache = ViewCache::default();
        cache.rebuild(&store);
        cache.swap(&store, 0, 2).unwrap();

        assert_eq!(store.guids(), vec![g[2].clone(), g[1].clone(), g[0].clone()]);
        assert_eq!(remarks(&cache), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_swap_under_keyword_only() {
        let (_dir, store) = open();
        let g = seed(&store, &[("x-1", ""), ("other", ""), ("x-2", "")]);

        let mut cache = ViewCache::new("", "x-");
        cache.rebuild(&store);
        cache.swap(&store, 0, 1).unwrap();

        assert_eq!(store.guids(), vec![g[2].clone(), g[1].clone(), g[0].clone()]);
    }

    #[test]
    fn test_unfiltered_swap_skips_tombstones() {
        let (_dir, store) = open();
        let g = seed(&store, &[("A", ""), ("B", "")]);
        store
            .save_guid_order(&[g[0].clone(), "ghost".to_string(), g[1].clone()])
            .unwrap();

        let mut cache = ViewCache::default();
        cache.rebuild(&store);
        cache.swap(&store, 0, 1).unwrap();

        assert_eq!(store.guids(), vec![g[1].clone(), "ghost".to_string(), g[0].clone()]);
        assert_eq!(remarks(&cache), vec!["B", "A"]);
    }

    #[test]
    fn test_swap_out_of_range_is_ignored() {
        let (_dir, store) = open();
        let g = seed(&store, &[("A", ""), ("B", "")]);
        let mut cache = ViewCache::default();
        cache.rebuild(&store);

        cache.swap(&store, 0, 9).unwrap();
        assert_eq!(store.guids(), g);
    }

    #[test]
    fn test_position_and_remove_at() {
        let (_dir, store) = open();
        let g = seed(&store, &[("A", ""), ("B", "")]);
        let mut cache = ViewCache::default();
        cache.rebuild(&store);

        assert_eq!(cache.position_of(&g[1]), Some(1));
        assert_eq!(cache.position_of("nope"), None);

        store.remove_profile(&g[0]).unwrap();
        let removed = cache.remove_at(0).unwrap();
        assert_eq!(removed.guid, g[0]);
        assert_eq!(cache.position_of(&g[1]), Some(0));
        assert_eq!(cache.remove_at(5), None);
    }

    #[test]
    fn test_refresh_entry_reads_latest_body() {
        let (_dir, store) = open();
        let g = seed(&store, &[("A", ""), ("B", "")]);
        let mut cache = ViewCache::default();
        cache.rebuild(&store);

        store.put_profile(Some(&g[1]), &profile("B renamed", "")).unwrap();
        assert_eq!(cache.refresh_entry(&store, &g[1]), Some(1));
        assert_eq!(remarks(&cache), vec!["A", "B renamed"]);
        assert_eq!(cache.refresh_entry(&store, "missing"), None);
    }

    #[test]
    fn test_set_filter_reports_change() {
        let mut cache = ViewCache::new("s", "k");
        assert!(!cache.set_filter("s", "k"));
        assert!(cache.set_filter("s", ""));
        assert_eq!(cache.keyword(), "");
        assert!(!cache.is_unfiltered());
    }
}
