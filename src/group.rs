use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::item::MediaItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    NewestFirst,
    OldestFirst,
}

/// Display-time aggregate of every variant descending from one origin
/// post. Rebuilt from scratch on every call, never cached.
#[derive(Debug, Clone)]
pub struct VariantGroup {
    pub group_key: String,
    pub variants: Vec<MediaItem>,
    pub active_index: usize,
    pub sort_key: DateTime<Utc>,
}

/// Bucket items by lineage (falling back to their own identity), order
/// variants inside each bucket by creation time, and order the buckets by
/// their representative's creation time under the same direction.
pub fn group_for_display(items: &[MediaItem], direction: SortDirection) -> Vec<VariantGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<MediaItem>> = HashMap::new();

    for item in items {
        let key = item
            .lineage_id
            .clone()
            .unwrap_or_else(|| item.identity.clone());
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(item.clone());
    }

    let mut groups: Vec<VariantGroup> = order
        .into_iter()
        .map(|key| {
            let mut variants = buckets.remove(&key).unwrap_or_default();
            variants.sort_by(|a, b| compare(a.created_at, b.created_at, direction));
            let sort_key = variants
                .first()
                .map(|item| item.created_at)
                .unwrap_or(DateTime::UNIX_EPOCH);
            VariantGroup {
                group_key: key,
                variants,
                active_index: 0,
                sort_key,
            }
        })
        .collect();

    groups.sort_by(|a, b| compare(a.sort_key, b.sort_key, direction));
    groups
}

fn compare(
    a: DateTime<Utc>,
    b: DateTime<Utc>,
    direction: SortDirection,
) -> std::cmp::Ordering {
    match direction {
        SortDirection::NewestFirst => b.cmp(&a),
        SortDirection::OldestFirst => a.cmp(&b),
    }
}
