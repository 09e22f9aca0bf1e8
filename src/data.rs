use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;

use crate::source::{self, Collection, DeleteOutcome, FetchedPage, RawAsset, RawRecord};

pub trait PageService: Send + Sync {
    fn fetch_page(&self, collection: Collection, cursor: Option<&str>) -> Result<FetchedPage>;
}

pub trait RecordService: Send + Sync {
    fn delete_record(&self, record_id: &str) -> Result<DeleteOutcome>;
}

pub trait DownloadService: Send + Sync {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpPageService {
    client: Arc<source::Client>,
}

impl HttpPageService {
    pub fn new(client: Arc<source::Client>) -> Self {
        Self { client }
    }
}

impl PageService for HttpPageService {
    fn fetch_page(&self, collection: Collection, cursor: Option<&str>) -> Result<FetchedPage> {
        self.client
            .feed_page(collection, cursor)
            .context("fetch feed page")
    }
}

pub struct HttpRecordService {
    client: Arc<source::Client>,
}

impl HttpRecordService {
    pub fn new(client: Arc<source::Client>) -> Self {
        Self { client }
    }
}

impl RecordService for HttpRecordService {
    fn delete_record(&self, record_id: &str) -> Result<DeleteOutcome> {
        self.client.delete_post(record_id).context("delete post")
    }
}

pub struct HttpDownloadService {
    client: Arc<source::Client>,
}

impl HttpDownloadService {
    pub fn new(client: Arc<source::Client>) -> Self {
        Self { client }
    }
}

impl DownloadService for HttpDownloadService {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.client.fetch_bytes(url).context("download media")
    }
}

/// In-memory page source used for offline browsing and tests. Pages are
/// addressed by chained cursors only, exactly like the remote feed: page
/// N+1 is reachable solely through the cursor page N returned.
pub struct MockPageService {
    pages: HashMap<Collection, Vec<FetchedPage>>,
    calls: RwLock<Vec<(Collection, Option<String>)>>,
}

impl MockPageService {
    pub fn new(pages: HashMap<Collection, Vec<FetchedPage>>) -> Self {
        Self {
            pages,
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Deterministic sample data: `page_count` pages of `per_page` posts
    /// for each collection.
    pub fn sample(page_count: usize, per_page: usize) -> Self {
        let mut pages = HashMap::new();
        for collection in [Collection::Videos, Collection::Images] {
            let mut feed = Vec::new();
            for page in 0..page_count {
                let records = (0..per_page)
                    .map(|slot| sample_record(collection, page * per_page + slot))
                    .collect();
                let next_cursor = if page + 1 < page_count {
                    Some(format!("{}-cursor-{}", collection.as_str(), page + 1))
                } else {
                    None
                };
                feed.push(FetchedPage {
                    records,
                    next_cursor,
                });
            }
            pages.insert(collection, feed);
        }
        Self::new(pages)
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    pub fn calls(&self) -> Vec<(Collection, Option<String>)> {
        self.calls.read().clone()
    }
}

impl PageService for MockPageService {
    fn fetch_page(&self, collection: Collection, cursor: Option<&str>) -> Result<FetchedPage> {
        self.calls
            .write()
            .push((collection, cursor.map(str::to_string)));
        let feed = self
            .pages
            .get(&collection)
            .ok_or_else(|| anyhow!("mock feed: no such collection"))?;
        let index = match cursor {
            None => 0,
            Some(cursor) => feed
                .iter()
                .position(|page| page.next_cursor.as_deref() == Some(cursor))
                .map(|found| found + 1)
                .ok_or_else(|| anyhow!("mock feed: unknown cursor {}", cursor))?,
        };
        feed.get(index)
            .cloned()
            .ok_or_else(|| anyhow!("mock feed: page {} out of range", index))
    }
}

fn sample_record(collection: Collection, serial: usize) -> RawRecord {
    let content_id = format!("00000000-0000-4000-8000-{:012x}", serial + 1);
    let (url, poster) = match collection {
        Collection::Videos => (
            format!("https://media.example/{}/source.mp4", content_id),
            Some(format!("https://media.example/{}/poster.jpg", content_id)),
        ),
        Collection::Images => (
            format!("https://media.example/{}/source.jpg", content_id),
            None,
        ),
    };
    let asset = RawAsset {
        id: None,
        url: Some(url),
        poster_url: poster,
    };
    RawRecord {
        id: Some(format!("{}-{}", collection.as_str(), serial)),
        created_at: Some(format!("2024-06-{:02}T12:00:00Z", (serial % 28) + 1)),
        prompt: Some(format!("sample prompt {}", serial)),
        has_metadata: None,
        videos: match collection {
            Collection::Videos => vec![asset.clone()],
            Collection::Images => Vec::new(),
        },
        images: match collection {
            Collection::Images => vec![asset],
            Collection::Videos => Vec::new(),
        },
        child_posts: Vec::new(),
        original_post: None,
    }
}

#[derive(Default)]
pub struct MockRecordService;

impl RecordService for MockRecordService {
    fn delete_record(&self, _record_id: &str) -> Result<DeleteOutcome> {
        Ok(DeleteOutcome {
            ok: true,
            status: 204,
        })
    }
}

/// Serves the URL's own bytes back as content; handy for archive tests.
#[derive(Default)]
pub struct MockDownloadService;

impl DownloadService for MockDownloadService {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        Ok(url.as_bytes().to_vec())
    }
}
