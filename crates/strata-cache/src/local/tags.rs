//! Bidirectional key↔tag index.
//!
//! This is a local mirror of the shared tier's tag sets. It is used to tear
//! down a key's associations in O(tags) and as a fallback for tag resolution
//! when the shared tier cannot be reached. It only knows about keys this
//! instance has observed, so it can be incomplete relative to the shared index.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tags recorded for `key`.
    pub fn track(&mut self, key: &str, tags: &[String]) {
        self.untrack(key);
        if tags.is_empty() {
            return;
        }

        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.by_key
            .insert(key.to_string(), tags.iter().cloned().collect());
    }

    /// Remove `key` from every tag set, dropping sets that become empty.
    pub fn untrack(&mut self, key: &str) {
        let Some(tags) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }

    /// Keys currently recorded under `tag`, sorted.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .by_tag
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Tags currently recorded for `key`, sorted.
    pub fn tags_for_key(&self, key: &str) -> Vec<String> {
        let mut tags: Vec<String> = self
            .by_key
            .get(key)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default();
        tags.sort();
        tags
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn track_records_both_directions() {
        let mut index = TagIndex::new();
        index.track("e:1", &tags(&["list", "entities"]));
        index.track("e:2", &tags(&["list"]));

        assert_eq!(index.keys_for_tag("list"), vec!["e:1", "e:2"]);
        assert_eq!(index.keys_for_tag("entities"), vec!["e:1"]);
        assert_eq!(index.tags_for_key("e:1"), vec!["entities", "list"]);
    }

    #[test]
    fn retrack_replaces_stale_tags() {
        let mut index = TagIndex::new();
        index.track("e:1", &tags(&["old"]));
        index.track("e:1", &tags(&["new"]));

        assert!(index.keys_for_tag("old").is_empty());
        assert_eq!(index.keys_for_tag("new"), vec!["e:1"]);
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn untrack_drops_empty_sets() {
        let mut index = TagIndex::new();
        index.track("e:1", &tags(&["a", "b"]));
        index.track("e:2", &tags(&["b"]));

        index.untrack("e:1");

        assert!(index.keys_for_tag("a").is_empty());
        assert_eq!(index.keys_for_tag("b"), vec!["e:2"]);
        assert_eq!(index.tag_count(), 1);
        assert!(index.tags_for_key("e:1").is_empty());
    }

    #[test]
    fn tracking_no_tags_clears() {
        let mut index = TagIndex::new();
        index.track("e:1", &tags(&["a"]));
        index.track("e:1", &[]);

        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn untrack_unknown_key_is_noop() {
        let mut index = TagIndex::new();
        index.untrack("nope");
        assert_eq!(index.tag_count(), 0);
    }
}
