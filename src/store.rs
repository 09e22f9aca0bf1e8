use std::collections::{HashMap, HashSet};

use crate::item::{self, MediaItem, MediaKind};
use crate::source::RawRecord;

/// Randomly-addressable window of pages over a forward-only cursor feed.
///
/// The cursor chain (`cursors[k]` opens page `k`) is the piece that turns
/// the sequential protocol into an indexable one: it is never evicted, so
/// any page at or below the fetch frontier stays reachable with a single
/// request even after its items were dropped from the cache window.
pub struct PageStore {
    kind: MediaKind,
    cursors: Vec<Option<String>>,
    cache: HashMap<usize, Vec<MediaItem>>,
    seen: HashSet<String>,
    exhausted: bool,
    total_loaded: usize,
    highest_page_fetched: Option<usize>,
}

impl PageStore {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            cursors: vec![None],
            cache: HashMap::new(),
            seen: HashSet::new(),
            exhausted: false,
            total_loaded: 0,
            highest_page_fetched: None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Ingest one fetched page. Candidates already seen on another page
    /// are skipped outright; duplicates inside this batch are reconciled
    /// in place. Must not be called for a page that is still cached (the
    /// pagination controller guarantees this).
    pub fn ingest_page(
        &mut self,
        page_index: usize,
        records: &[RawRecord],
        next_cursor: Option<String>,
    ) {
        let mut items: Vec<MediaItem> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for record in records {
            for candidate in item::candidates_from_record(record, self.kind) {
                if let Some(&slot) = slots.get(&candidate.identity) {
                    let current = items[slot].clone();
                    items[slot] = item::reconcile(Some(current), candidate);
                    continue;
                }
                if self.seen.contains(&candidate.identity) {
                    // Cross-page duplicate from upstream reordering.
                    continue;
                }
                self.seen.insert(candidate.identity.clone());
                slots.insert(candidate.identity.clone(), items.len());
                items.push(candidate);
                self.total_loaded += 1;
            }
        }

        let next_index = page_index + 1;
        if self.cursors.len() <= next_index {
            self.cursors.resize(next_index + 1, None);
        }
        match next_cursor {
            Some(cursor) if !cursor.is_empty() => {
                if self.cursors[next_index].is_none() {
                    self.cursors[next_index] = Some(cursor);
                }
            }
            _ => self.exhausted = true,
        }

        self.highest_page_fetched = Some(
            self.highest_page_fetched
                .map_or(page_index, |highest| highest.max(page_index)),
        );
        self.cache.insert(page_index, items);
    }

    /// Drop every cached page outside `[current-1, current+1]`. The
    /// evicted pages' identities are released so an idempotent re-fetch
    /// reproduces them; identities of deleted items are not on any page
    /// and therefore stay blocked.
    pub fn evict_around(&mut self, current: usize) {
        let low = current.saturating_sub(1);
        let high = current + 1;
        let dropped: Vec<usize> = self
            .cache
            .keys()
            .copied()
            .filter(|&index| index < low || index > high)
            .collect();
        for index in dropped {
            if let Some(items) = self.cache.remove(&index) {
                for item in items {
                    self.seen.remove(&item.identity);
                    self.total_loaded = self.total_loaded.saturating_sub(1);
                }
            }
        }
    }

    pub fn is_cached(&self, page_index: usize) -> bool {
        self.cache.contains_key(&page_index)
    }

    pub fn items_of(&self, page_index: usize) -> &[MediaItem] {
        self.cache
            .get(&page_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Known page count; while the feed is not exhausted one extra page
    /// stands in for "probably more".
    pub fn page_count(&self) -> usize {
        match self.highest_page_fetched {
            None => 1,
            Some(highest) if self.exhausted => highest + 1,
            Some(highest) => highest + 2,
        }
    }

    /// `Some(cursor)` when the page is fetchable right now. Page 0 needs
    /// no cursor; any later page needs the cursor recorded when its
    /// predecessor was fetched.
    pub fn cursor_for(&self, page_index: usize) -> Option<Option<&str>> {
        if page_index == 0 {
            return Some(None);
        }
        match self.cursors.get(page_index) {
            Some(Some(cursor)) => Some(Some(cursor.as_str())),
            _ => None,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn total_loaded(&self) -> usize {
        self.total_loaded
    }

    pub fn highest_page_fetched(&self) -> Option<usize> {
        self.highest_page_fetched
    }

    pub fn item(&self, identity: &str) -> Option<&MediaItem> {
        self.cache
            .values()
            .flat_map(|items| items.iter())
            .find(|item| item.identity == identity)
    }

    /// Strip a deleted item from whichever cached page holds it. Its
    /// identity intentionally stays in the seen set so an eventually-
    /// consistent re-appearance does not resurface it this session.
    pub fn remove_item(&mut self, identity: &str) -> bool {
        for items in self.cache.values_mut() {
            if let Some(position) = items.iter().position(|item| item.identity == identity) {
                items.remove(position);
                self.total_loaded = self.total_loaded.saturating_sub(1);
                return true;
            }
        }
        false
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.kind);
    }
}
