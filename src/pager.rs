use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};

use crate::data::{PageService, RecordService};
use crate::item::MediaItem;
use crate::source::Collection;
use crate::store::PageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Loading,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum PagerError {
    #[error("a fetch is already in flight for this collection")]
    Busy,
    #[error("forward walk exceeded the configured cap of {0} pages")]
    WalkCapExceeded(usize),
    #[error(transparent)]
    Fetch(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct PagerOptions {
    /// Hard bound on how many pages a single forward walk may fetch.
    /// The cursor protocol offers no shortcut to a far page, so jumps
    /// and `go_to_last` are O(pages); this keeps them finite.
    pub walk_cap: usize,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self { walk_cap: 512 }
    }
}

/// Drives one collection's page store against the sequential feed.
/// Exactly one fetch runs at a time; requests arriving while one is in
/// flight are dropped, not queued.
pub struct Pager {
    service: Arc<dyn PageService>,
    store: PageStore,
    collection: Collection,
    phase: FetchPhase,
    current_page: usize,
    walk_cap: usize,
}

impl Pager {
    pub fn new(service: Arc<dyn PageService>, collection: Collection, options: PagerOptions) -> Self {
        Self {
            service,
            store: PageStore::new(collection.kind()),
            collection,
            phase: FetchPhase::Idle,
            current_page: 0,
            walk_cap: options.walk_cap.max(1),
        }
    }

    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PageStore {
        &mut self.store
    }

    /// Clamp a requested page to what is currently known. Until the feed
    /// is exhausted only the lower bound applies; afterwards the page
    /// count is authoritative.
    pub fn clamp_page(&self, requested: usize) -> usize {
        if self.store.exhausted() {
            requested.min(self.store.page_count() - 1)
        } else {
            requested
        }
    }

    /// Make the requested page current, fetching whatever the cursor
    /// chain needs on the way. Returns the page actually landed on.
    pub fn ensure_page(&mut self, requested: usize) -> Result<usize, PagerError> {
        if self.phase == FetchPhase::Loading {
            return Err(PagerError::Busy);
        }
        let target = self.clamp_page(requested);
        if self.store.is_cached(target) {
            self.current_page = target;
            return Ok(target);
        }
        self.phase = FetchPhase::Loading;
        match self.fetch_until(requested) {
            Ok(landed) => {
                self.phase = FetchPhase::Idle;
                self.current_page = landed;
                self.store.evict_around(landed);
                Ok(landed)
            }
            Err(err) => {
                self.phase = FetchPhase::Error;
                Err(err)
            }
        }
    }

    /// Walk forward to exhaustion and land on the final page.
    pub fn go_to_last(&mut self) -> Result<usize, PagerError> {
        if self.phase == FetchPhase::Loading {
            return Err(PagerError::Busy);
        }
        self.phase = FetchPhase::Loading;
        match self.walk_to_end() {
            Ok(landed) => {
                self.phase = FetchPhase::Idle;
                self.current_page = landed;
                self.store.evict_around(landed);
                Ok(landed)
            }
            Err(err) => {
                self.phase = FetchPhase::Error;
                Err(err)
            }
        }
    }

    pub fn reset(&mut self) {
        self.store.reset();
        self.phase = FetchPhase::Idle;
        self.current_page = 0;
    }

    fn fetch_until(&mut self, requested: usize) -> Result<usize, PagerError> {
        let mut steps = 0usize;
        loop {
            let target = self.clamp_page(requested);
            if self.store.is_cached(target) {
                return Ok(target);
            }
            if let Some(cursor) = self.cursor_owned(target) {
                self.fetch_one(target, cursor)?;
                return Ok(target);
            }
            if self.store.exhausted() {
                // Exhaustion was discovered mid-walk; the clamped target
                // now falls inside the known range and the next pass
                // resolves it from the cursor chain.
                continue;
            }
            if steps >= self.walk_cap {
                return Err(PagerError::WalkCapExceeded(self.walk_cap));
            }
            let frontier = self.store.highest_page_fetched().map_or(0, |h| h + 1);
            let cursor = self.cursor_owned(frontier).ok_or_else(|| {
                PagerError::Fetch(anyhow!("cursor chain broken at page {}", frontier))
            })?;
            self.fetch_one(frontier, cursor)?;
            steps += 1;
        }
    }

    fn walk_to_end(&mut self) -> Result<usize, PagerError> {
        let mut steps = 0usize;
        while !self.store.exhausted() {
            if steps >= self.walk_cap {
                return Err(PagerError::WalkCapExceeded(self.walk_cap));
            }
            let frontier = self.store.highest_page_fetched().map_or(0, |h| h + 1);
            let cursor = self.cursor_owned(frontier).ok_or_else(|| {
                PagerError::Fetch(anyhow!("cursor chain broken at page {}", frontier))
            })?;
            self.fetch_one(frontier, cursor)?;
            steps += 1;
        }
        let last = self.store.page_count() - 1;
        if !self.store.is_cached(last) {
            if let Some(cursor) = self.cursor_owned(last) {
                self.fetch_one(last, cursor)?;
            }
        }
        Ok(last)
    }

    fn cursor_owned(&self, page: usize) -> Option<Option<String>> {
        self.store
            .cursor_for(page)
            .map(|cursor| cursor.map(str::to_string))
    }

    fn fetch_one(&mut self, page: usize, cursor: Option<String>) -> Result<(), PagerError> {
        let fetched = self
            .service
            .fetch_page(self.collection, cursor.as_deref())
            .map_err(PagerError::Fetch)?;
        self.store.ingest_page(page, &fetched.records, fetched.next_cursor);
        Ok(())
    }
}

/// The surface the UI layer talks to: one pager per collection plus the
/// delete collaborator. Collections are independent; videos and images
/// never share cursors, caches, or busy state.
pub struct Library {
    pagers: HashMap<Collection, Pager>,
    records: Arc<dyn RecordService>,
}

impl Library {
    pub fn new(
        pages: Arc<dyn PageService>,
        records: Arc<dyn RecordService>,
        options: PagerOptions,
    ) -> Self {
        let mut pagers = HashMap::new();
        for collection in [Collection::Videos, Collection::Images] {
            pagers.insert(collection, Pager::new(pages.clone(), collection, options));
        }
        Self { pagers, records }
    }

    pub fn pager(&self, collection: Collection) -> &Pager {
        &self.pagers[&collection]
    }

    fn pager_mut(&mut self, collection: Collection) -> &mut Pager {
        self.pagers
            .get_mut(&collection)
            .expect("pager exists for every collection")
    }

    pub fn ensure_page(
        &mut self,
        collection: Collection,
        page: usize,
    ) -> Result<usize, PagerError> {
        self.pager_mut(collection).ensure_page(page)
    }

    pub fn go_to_last(&mut self, collection: Collection) -> Result<usize, PagerError> {
        self.pager_mut(collection).go_to_last()
    }

    pub fn items_of(&self, collection: Collection, page: usize) -> &[MediaItem] {
        self.pager(collection).store().items_of(page)
    }

    pub fn page_count(&self, collection: Collection) -> usize {
        self.pager(collection).store().page_count()
    }

    pub fn reset(&mut self, collection: Collection) {
        self.pager_mut(collection).reset();
    }

    /// Delete an item at the server, then drop it from the cache. The
    /// cache is only touched once the server acknowledged; a refused
    /// delete leaves the item visible, matching actual server state.
    pub fn delete_item(&mut self, collection: Collection, identity: &str) -> Result<()> {
        let record_id = self
            .pager(collection)
            .store()
            .item(identity)
            .and_then(|item| item.record_id.clone())
            .ok_or_else(|| anyhow!("no deletable record for {}", identity))?;
        let outcome = self.records.delete_record(&record_id)?;
        if !outcome.ok {
            bail!("delete rejected with status {}", outcome.status);
        }
        self.pager_mut(collection).store_mut().remove_item(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockPageService, MockRecordService};
    use crate::source::{DeleteOutcome, FetchedPage};
    use parking_lot::RwLock;

    fn library(pages: Arc<dyn PageService>) -> Library {
        Library::new(pages, Arc::new(MockRecordService), PagerOptions::default())
    }

    #[test]
    fn ensure_page_zero_fetches_once() {
        let service = Arc::new(MockPageService::sample(3, 2));
        let mut pager = Pager::new(service.clone(), Collection::Videos, PagerOptions::default());
        let landed = pager.ensure_page(0).unwrap();
        assert_eq!(landed, 0);
        assert_eq!(pager.store().items_of(0).len(), 2);
        assert_eq!(service.call_count(), 1);
        assert_eq!(pager.phase(), FetchPhase::Idle);

        // Already cached: no further fetch.
        pager.ensure_page(0).unwrap();
        assert_eq!(service.call_count(), 1);
    }

    #[test]
    fn jumping_ahead_walks_the_cursor_chain() {
        let service = Arc::new(MockPageService::sample(4, 1));
        let mut pager = Pager::new(service.clone(), Collection::Videos, PagerOptions::default());
        let landed = pager.ensure_page(2).unwrap();
        assert_eq!(landed, 2);
        // Pages 0, 1, 2 fetched in order; cursors recorded for each.
        assert_eq!(service.call_count(), 3);
        assert_eq!(
            service.calls()[2].1.as_deref(),
            Some("videos-cursor-2"),
            "third fetch presents page 1's cursor"
        );
    }

    #[test]
    fn jump_past_end_lands_on_last_page() {
        let service = Arc::new(MockPageService::sample(3, 1));
        let mut pager = Pager::new(service, Collection::Videos, PagerOptions::default());
        let landed = pager.ensure_page(99).unwrap();
        assert_eq!(landed, 2);
        assert!(pager.store().exhausted());
        assert_eq!(pager.store().page_count(), 3);
    }

    #[test]
    fn go_to_last_walks_to_exhaustion() {
        let service = Arc::new(MockPageService::sample(6, 2));
        let mut pager = Pager::new(service, Collection::Videos, PagerOptions::default());
        let landed = pager.go_to_last().unwrap();
        assert_eq!(landed, 5);
        assert_eq!(pager.current_page(), 5);
        assert!(!pager.store().items_of(5).is_empty());
        // Eviction bounded the window around the landing page.
        assert!(!pager.store().is_cached(0));
        assert!(pager.store().is_cached(4));
    }

    #[test]
    fn walk_cap_bounds_go_to_last() {
        let service = Arc::new(MockPageService::sample(10, 1));
        let mut pager = Pager::new(
            service,
            Collection::Videos,
            PagerOptions { walk_cap: 3 },
        );
        let err = pager.go_to_last().unwrap_err();
        assert!(matches!(err, PagerError::WalkCapExceeded(3)));
        assert_eq!(pager.phase(), FetchPhase::Error);
        // Pages fetched before the cap stay cached.
        assert!(pager.store().is_cached(2));
    }

    #[test]
    fn refetching_an_evicted_page_reproduces_identities() {
        let service = Arc::new(MockPageService::sample(6, 2));
        let mut pager = Pager::new(service, Collection::Videos, PagerOptions::default());
        pager.ensure_page(0).unwrap();
        let before: Vec<String> = pager
            .store()
            .items_of(0)
            .iter()
            .map(|item| item.identity.clone())
            .collect();

        pager.ensure_page(4).unwrap();
        assert!(!pager.store().is_cached(0), "page 0 evicted by the jump");

        pager.ensure_page(0).unwrap();
        let after: Vec<String> = pager
            .store()
            .items_of(0)
            .iter()
            .map(|item| item.identity.clone())
            .collect();
        assert_eq!(before, after);
    }

    struct FailingPageService;

    impl PageService for FailingPageService {
        fn fetch_page(&self, _: Collection, _: Option<&str>) -> anyhow::Result<FetchedPage> {
            anyhow::bail!("connection reset")
        }
    }

    struct FailAfter {
        inner: MockPageService,
        allowed: RwLock<usize>,
    }

    impl PageService for FailAfter {
        fn fetch_page(
            &self,
            collection: Collection,
            cursor: Option<&str>,
        ) -> anyhow::Result<FetchedPage> {
            let mut allowed = self.allowed.write();
            if *allowed == 0 {
                anyhow::bail!("connection reset")
            }
            *allowed -= 1;
            self.inner.fetch_page(collection, cursor)
        }
    }

    #[test]
    fn fetch_failure_leaves_cache_intact_and_is_retryable() {
        let service = Arc::new(FailAfter {
            inner: MockPageService::sample(4, 1),
            allowed: RwLock::new(2),
        });
        let mut pager = Pager::new(service.clone(), Collection::Videos, PagerOptions::default());

        // The walk to page 3 dies after two pages; both survive.
        let err = pager.ensure_page(3).unwrap_err();
        assert!(matches!(err, PagerError::Fetch(_)));
        assert_eq!(pager.phase(), FetchPhase::Error);
        assert!(pager.store().is_cached(0));
        assert!(pager.store().is_cached(1));

        // Retrying the same request succeeds from where the walk stopped.
        *service.allowed.write() = 10;
        let landed = pager.ensure_page(3).unwrap();
        assert_eq!(landed, 3);
        assert_eq!(pager.phase(), FetchPhase::Idle);
    }

    #[test]
    fn failed_first_fetch_mutates_nothing() {
        let mut pager = Pager::new(
            Arc::new(FailingPageService),
            Collection::Videos,
            PagerOptions::default(),
        );
        assert!(pager.ensure_page(0).is_err());
        assert_eq!(pager.store().total_loaded(), 0);
        assert_eq!(pager.store().page_count(), 1);
    }

    #[test]
    fn collections_do_not_share_state() {
        let service = Arc::new(MockPageService::sample(2, 2));
        let mut library = library(service);
        library.ensure_page(Collection::Videos, 0).unwrap();
        assert_eq!(library.items_of(Collection::Videos, 0).len(), 2);
        assert!(library.items_of(Collection::Images, 0).is_empty());
        assert_eq!(library.page_count(Collection::Images), 1);
    }

    struct RefusingRecordService;

    impl RecordService for RefusingRecordService {
        fn delete_record(&self, _: &str) -> anyhow::Result<DeleteOutcome> {
            Ok(DeleteOutcome {
                ok: false,
                status: 409,
            })
        }
    }

    #[test]
    fn refused_delete_keeps_the_item_visible() {
        let service = Arc::new(MockPageService::sample(1, 1));
        let mut library = Library::new(
            service,
            Arc::new(RefusingRecordService),
            PagerOptions::default(),
        );
        library.ensure_page(Collection::Videos, 0).unwrap();
        let identity = library.items_of(Collection::Videos, 0)[0].identity.clone();

        let err = library.delete_item(Collection::Videos, &identity).unwrap_err();
        assert!(err.to_string().contains("409"));
        assert_eq!(library.items_of(Collection::Videos, 0).len(), 1);
    }

    #[test]
    fn acknowledged_delete_removes_the_item() {
        let service = Arc::new(MockPageService::sample(1, 2));
        let mut library = library(service);
        library.ensure_page(Collection::Videos, 0).unwrap();
        let identity = library.items_of(Collection::Videos, 0)[0].identity.clone();

        library.delete_item(Collection::Videos, &identity).unwrap();
        assert_eq!(library.items_of(Collection::Videos, 0).len(), 1);
        assert_eq!(
            library.pager(Collection::Videos).store().total_loaded(),
            1
        );
    }

    #[test]
    fn reset_clears_one_collection_only() {
        let service = Arc::new(MockPageService::sample(2, 1));
        let mut library = library(service);
        library.ensure_page(Collection::Videos, 0).unwrap();
        library.ensure_page(Collection::Images, 0).unwrap();
        library.reset(Collection::Videos);
        assert!(library.items_of(Collection::Videos, 0).is_empty());
        assert_eq!(library.items_of(Collection::Images, 0).len(), 1);
    }
}
