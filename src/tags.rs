//! Ranked tag lists and the merge that reconciles the API's scored tags with the page's ranked tags.
//!
//! API scores are frequently missing or flattened to identical values across many tags, while the
//! page lists tags in a good relevance order but without scores. The merge keeps the API's score
//! groups and uses the page order to break ties inside each group.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// An insertion-ordered mapping of tag to score. Order is rank: the first tag is the most relevant.
/// Keys are unique; inserting an existing key updates its score but keeps its position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagList {
    entries: Vec<(String, i64)>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from unscored, rank-ordered names, scoring them -1, -2, -3, ...
    pub fn from_ranked<S: AsRef<str>>(names: &[S]) -> Self {
        let mut tags = Self::new();
        let mut next_score = -1;
        for name in names {
            if !tags.contains(name.as_ref()) {
                tags.insert(name.as_ref(), next_score);
                next_score -= 1;
            }
        }
        tags
    }

    pub fn insert(&mut self, tag: impl Into<String>, score: i64) {
        let tag = tag.into();
        match self.entries.iter_mut().find(|(t, _)| *t == tag) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((tag, score)),
        }
    }

    pub fn get(&self, tag: &str) -> Option<i64> {
        self.entries.iter().find(|(t, _)| t == tag).map(|(_, s)| *s)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.iter().any(|(t, _)| t == tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(t, s)| (t.as_str(), *s))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    /// Splits the list into maximal runs of adjacent tags that share a score.
    fn partitions(&self) -> Vec<&[(String, i64)]> {
        let mut partitions = Vec::new();
        let mut start = 0;
        for i in 1..=self.entries.len() {
            if i == self.entries.len() || self.entries[i].1 != self.entries[start].1 {
                partitions.push(&self.entries[start..i]);
                start = i;
            }
        }
        partitions
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for TagList {
    fn from_iter<I: IntoIterator<Item = (S, i64)>>(iter: I) -> Self {
        let mut tags = Self::new();
        for (tag, score) in iter {
            tags.insert(tag, score);
        }
        tags
    }
}

/// Merge the scored `primary` tags with the rank-ordered `secondary` tags.
///
/// Tags only present in `secondary` are appended with scores -1, -2, -3, ... in their secondary
/// order. The combined list is then cut into runs of equal score, each run is reordered to follow
/// `secondary` (tags secondary doesn't know keep their relative order after those), and the runs are
/// concatenated back in their original order.
pub fn merge_tags<S: AsRef<str>>(primary: &TagList, secondary: &[S]) -> TagList {
    let mut seen = HashSet::new();
    let secondary: Vec<&str> = secondary.iter().map(|s| s.as_ref()).filter(|s| seen.insert(*s)).collect();
    let secondary_rank: HashMap<&str, usize> = secondary.iter().enumerate().map(|(i, s)| (*s, i)).collect();

    let secondary_only: Vec<&str> = secondary.iter().copied().filter(|t| !primary.contains(t)).collect();
    let mut combined = primary.clone();
    for (tag, score) in TagList::from_ranked(&secondary_only).entries {
        combined.insert(tag, score);
    }

    let mut merged = TagList::new();
    for partition in combined.partitions() {
        let mut ranked: Vec<&(String, i64)> = partition.iter().filter(|(t, _)| secondary_rank.contains_key(t.as_str())).collect();
        ranked.sort_by_key(|(t, _)| secondary_rank[t.as_str()]);
        for (tag, score) in ranked {
            merged.insert(tag.clone(), *score);
        }
        for (tag, score) in partition.iter().filter(|(t, _)| !secondary_rank.contains_key(t.as_str())) {
            merged.insert(tag.clone(), *score);
        }
    }
    merged
}
