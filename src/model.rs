//! Episode records and the displayed set.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identity key of a remote item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a listing backend produces for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    pub id: EntryId,
    pub title: String,
    pub download_url: String,
}

/// Supplementary data fetched per entry after it is listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Enrichment {
    Poster,
    Subtitle,
}

impl fmt::Display for Enrichment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Enrichment::Poster => f.write_str("poster"),
            Enrichment::Subtitle => f.write_str("subtitle"),
        }
    }
}

/// A displayed episode. Each enrichment field is owned by one worker kind and
/// changes from `None` to `Some` as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub title: String,
    pub download_url: String,
    pub poster: Option<PathBuf>,
    pub subtitle: Option<PathBuf>,
    pub progress: Option<f32>,
    pub file: Option<PathBuf>,
}

impl From<EntryPayload> for Entry {
    fn from(p: EntryPayload) -> Self {
        Self {
            id: p.id,
            title: p.title,
            download_url: p.download_url,
            poster: None,
            subtitle: None,
            progress: None,
            file: None,
        }
    }
}

impl Entry {
    pub fn enrichment(&self, kind: Enrichment) -> Option<&PathBuf> {
        match kind {
            Enrichment::Poster => self.poster.as_ref(),
            Enrichment::Subtitle => self.subtitle.as_ref(),
        }
    }

    /// Store an enrichment result. Returns false if the field already held
    /// the same value, so loading twice is observably a no-op.
    pub fn set_enrichment(&mut self, kind: Enrichment, path: PathBuf) -> bool {
        let slot = match kind {
            Enrichment::Poster => &mut self.poster,
            Enrichment::Subtitle => &mut self.subtitle,
        };
        if slot.as_ref() == Some(&path) {
            return false;
        }
        *slot = Some(path);
        true
    }

    /// Record download progress; never moves backwards.
    pub fn set_progress(&mut self, value: f32) -> f32 {
        let value = value.clamp(0.0, 1.0);
        let next = self.progress.map_or(value, |p| p.max(value));
        self.progress = Some(next);
        next
    }
}

/// Entries in arrival order with upsert by identity key.
#[derive(Debug, Default)]
pub struct EntrySet {
    entries: Vec<Entry>,
    index: HashMap<EntryId, usize>,
}

impl EntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry` unless one with the same id exists. Returns true if inserted.
    pub fn upsert(&mut self, entry: Entry) -> bool {
        if self.index.contains_key(&entry.id) {
            return false;
        }
        self.index.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, id: &EntryId) -> Option<&mut Entry> {
        self.index.get(id).map(|&i| &mut self.entries[i])
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> Entry {
        Entry::from(EntryPayload {
            id: id.into(),
            title: format!("Show {id}"),
            download_url: format!("https://example.invalid/{id}.torrent"),
        })
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut set = EntrySet::new();
        assert!(set.upsert(entry("a")));
        assert!(set.upsert(entry("b")));
        assert!(!set.upsert(entry("a")));
        assert_eq!(set.len(), 2);
        let ids: Vec<_> = set.iter().map(|e| e.id.0.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn clear_forgets_ids() {
        let mut set = EntrySet::new();
        set.upsert(entry("a"));
        set.clear();
        assert!(set.is_empty());
        assert!(set.get(&"a".into()).is_none());
        assert!(set.upsert(entry("a")));
    }

    #[test]
    fn enrichment_set_twice_is_noop() {
        let mut e = entry("a");
        assert!(e.set_enrichment(Enrichment::Poster, "/tmp/a.jpg".into()));
        assert!(!e.set_enrichment(Enrichment::Poster, "/tmp/a.jpg".into()));
        assert_eq!(e.enrichment(Enrichment::Poster), Some(&PathBuf::from("/tmp/a.jpg")));
        assert!(e.enrichment(Enrichment::Subtitle).is_none());
    }

    #[test]
    fn progress_never_decreases() {
        let mut e = entry("a");
        assert_eq!(e.set_progress(0.5), 0.5);
        assert_eq!(e.set_progress(0.2), 0.5);
        assert_eq!(e.set_progress(1.7), 1.0);
    }
}
