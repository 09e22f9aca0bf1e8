use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::source::{RawAsset, RawRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Image,
}

/// One playable/viewable media object after ingestion. Two items with the
/// same `identity` describe the same real-world asset and never coexist
/// on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub identity: String,
    pub media_url: String,
    pub poster_url: Option<String>,
    pub record_id: Option<String>,
    pub lineage_id: Option<String>,
    pub prompt: Option<String>,
    pub has_metadata: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub kind: MediaKind,
}

// The CDN names renditions with a fixed filename after a UUID path
// segment; that UUID is the stable content id shared by every URL shape
// the same asset shows up under.
static VIDEO_CONTENT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})/(?:source|video|md)\.mp4",
    )
    .expect("video content id pattern")
});

static IMAGE_CONTENT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})/(?:source|image|md)\.(?:jpe?g|png|webp)",
    )
    .expect("image content id pattern")
});

/// Canonical deduplication key for a media candidate, from the strongest
/// signal available: record id, then a content id embedded in the URL,
/// then the normalized URL itself. `None` means the candidate carries no
/// usable signal and should be dropped.
pub fn identity_of(item: &MediaItem) -> Option<String> {
    if let Some(id) = item.record_id.as_deref() {
        if !id.trim().is_empty() {
            return Some(format!("record:{}", id));
        }
    }
    if item.media_url.is_empty() {
        return None;
    }
    let pattern = match item.kind {
        MediaKind::Video => &*VIDEO_CONTENT_ID,
        MediaKind::Image => &*IMAGE_CONTENT_ID,
    };
    if let Some(caps) = pattern.captures(&item.media_url) {
        if let Some(id) = caps.get(1) {
            return Some(format!("content:{}", id.as_str().to_lowercase()));
        }
    }
    Some(format!("url:{}", normalized_url(&item.media_url)))
}

fn normalized_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string().to_lowercase()
        }
        Err(_) => {
            let trimmed = raw.split(['?', '#']).next().unwrap_or(raw);
            trimmed.to_lowercase()
        }
    }
}

/// Merge two representations of the same identity. One side is chosen as
/// primary (better URL, then newer, then poster, then lineage), after
/// which the loser only fills gaps; a present field is never overwritten.
pub fn reconcile(existing: Option<MediaItem>, incoming: MediaItem) -> MediaItem {
    let Some(existing) = existing else {
        return incoming;
    };

    let incoming_wins = if existing.media_url.is_empty() != incoming.media_url.is_empty() {
        existing.media_url.is_empty()
    } else if existing.created_at != incoming.created_at {
        incoming.created_at > existing.created_at
    } else if existing.poster_url.is_some() != incoming.poster_url.is_some() {
        incoming.poster_url.is_some()
    } else if existing.lineage_id.is_some() != incoming.lineage_id.is_some() {
        incoming.lineage_id.is_some()
    } else {
        false
    };

    let (mut primary, secondary) = if incoming_wins {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    if primary.poster_url.is_none() {
        primary.poster_url = secondary.poster_url;
    }
    if primary.prompt.is_none() {
        primary.prompt = secondary.prompt;
    }
    if primary.lineage_id.is_none() {
        primary.lineage_id = secondary.lineage_id;
    }
    if primary.has_metadata.is_none() {
        primary.has_metadata = secondary.has_metadata;
    }
    primary
}

/// Parse the service's RFC 3339 timestamps; anything unparsable sorts as
/// the epoch so ordering stays total.
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Flatten one raw post into media candidates of the wanted kind: the
/// post's own renditions, each child post's, and the original post's.
/// Candidates with no resolvable identity are dropped here.
pub fn candidates_from_record(record: &RawRecord, kind: MediaKind) -> Vec<MediaItem> {
    let mut out = Vec::new();
    let own_lineage = record
        .original_post
        .as_ref()
        .and_then(|original| original.id.clone())
        .or_else(|| record.id.clone());
    collect_assets(record, kind, own_lineage.as_deref(), &mut out);
    for child in &record.child_posts {
        let lineage = record.id.as_deref().or(own_lineage.as_deref());
        collect_assets(child, kind, lineage, &mut out);
    }
    if let Some(original) = &record.original_post {
        collect_assets(original, kind, original.id.as_deref(), &mut out);
    }
    out
}

fn collect_assets(
    record: &RawRecord,
    kind: MediaKind,
    lineage: Option<&str>,
    out: &mut Vec<MediaItem>,
) {
    let assets: &[RawAsset] = match kind {
        MediaKind::Video => &record.videos,
        MediaKind::Image => &record.images,
    };
    for asset in assets {
        let mut item = MediaItem {
            identity: String::new(),
            media_url: asset.url.clone().unwrap_or_default(),
            poster_url: asset.poster_url.clone(),
            record_id: asset.id.clone().or_else(|| record.id.clone()),
            lineage_id: lineage.map(str::to_string),
            prompt: record.prompt.clone(),
            has_metadata: record.has_metadata,
            created_at: parse_timestamp(record.created_at.as_deref()),
            kind,
        };
        if let Some(identity) = identity_of(&item) {
            item.identity = identity;
            out.push(item);
        }
    }
}
