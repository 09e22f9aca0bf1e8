use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Which remote feed a request targets. The service keeps videos and
/// images as independent collections with independent cursor chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Videos,
    Images,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Videos => "videos",
            Collection::Images => "images",
        }
    }

    pub fn kind(&self) -> crate::item::MediaKind {
        match self {
            Collection::Videos => crate::item::MediaKind::Video,
            Collection::Images => crate::item::MediaKind::Image,
        }
    }
}

/// One post as the feed endpoint returns it. Posts nest freely: a post
/// carries its own renditions plus child posts and a possible original
/// post, and any of those may describe the same playable media. Every
/// field is optional; ingestion drops what it cannot use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRecord {
    pub id: Option<String>,
    pub created_at: Option<String>,
    pub prompt: Option<String>,
    pub has_metadata: Option<bool>,
    pub videos: Vec<RawAsset>,
    pub images: Vec<RawAsset>,
    pub child_posts: Vec<RawRecord>,
    pub original_post: Option<Box<RawRecord>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawAsset {
    pub id: Option<String>,
    pub url: Option<String>,
    pub poster_url: Option<String>,
}

/// One fetched page: the raw records plus the opaque cursor for the page
/// after it. The cursor is round-tripped unmodified.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchedPage {
    #[serde(rename = "items")]
    pub records: Vec<RawRecord>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteOutcome {
    pub ok: bool,
    pub status: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub page_size: usize,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    page_size: usize,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("feed client user agent required");
        }
        if config.base_url.trim().is_empty() {
            bail!("feed client base url required");
        }
        let base_url = Url::parse(&config.base_url)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            page_size: if config.page_size == 0 {
                40
            } else {
                config.page_size
            },
        })
    }

    pub fn feed_page(&self, collection: Collection, cursor: Option<&str>) -> Result<FetchedPage> {
        let mut url = self.base_url.join("v1/feed")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("kind", collection.as_str());
            pairs.append_pair("limit", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        let resp = self.request(Method::GET, url)?;
        let page: FetchedPage = resp.json()?;
        Ok(page)
    }

    /// Deletion reports the server's verdict rather than failing on a
    /// non-2xx status; the caller decides what to do with a refusal.
    pub fn delete_post(&self, record_id: &str) -> Result<DeleteOutcome> {
        if record_id.trim().is_empty() {
            bail!("feed: delete requires a record id");
        }
        let url = self.base_url.join(&format!("v1/posts/{}", record_id))?;
        let resp = self
            .http
            .request(Method::DELETE, url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()?;
        let status = resp.status();
        Ok(DeleteOutcome {
            ok: status.is_success(),
            status: status.as_u16(),
        })
    }

    pub fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url)?;
        let resp = self.request(Method::GET, parsed)?;
        Ok(resp.bytes()?.to_vec())
    }

    fn request(&self, method: Method, url: Url) -> Result<Response> {
        let resp = self
            .http
            .request(method, url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                401 => Err(anyhow!("feed: unauthorized")),
                403 => Err(anyhow!("feed: forbidden")),
                429 => Err(anyhow!("feed: rate limited: {}", body)),
                _ => Err(anyhow!("feed: api error {}: {}", status, body)),
            }
        }
    }
}
