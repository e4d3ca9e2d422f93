//! Reconciliation of the persisted snapshot against a fresh listing.
//!
//! Items are keyed by `link`. When a freshly observed item is already known,
//! the stored record wins in full: it carries the ticker and the attachment
//! download state that the bare listing row does not have, and that state
//! must never regress.
//!
//! Stories that have scrolled off the live listing are unioned back in after
//! the observed ones, so merging never drops a known story.

use crate::models::NewsItem;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

/// Merge `existing` (snapshot) with `observed` (fresh listing).
///
/// Output order: observed items in listing order (first occurrence of each
/// link only), then every existing item whose link was not observed, in
/// snapshot order. Observed items absent from the snapshot are flagged
/// `is_new`; everything else is not.
///
/// # Arguments
///
/// * `existing` - Items loaded from the snapshot, in stored order
/// * `observed` - Bare items built from this run's listing rows
///
/// # Returns
///
/// The reconciled working set. Its length is the number of distinct links
/// across both inputs.
///
/// # Examples
///
/// ```ignore
/// let merged = merge(stored, observed);
/// let new_links: Vec<_> = merged.iter().filter(|i| i.is_new).map(|i| &i.link).collect();
/// ```
#[instrument(level = "info", skip_all, fields(existing = existing.len(), observed = observed.len()))]
pub fn merge(existing: Vec<NewsItem>, observed: Vec<NewsItem>) -> Vec<NewsItem> {
    let mut known: HashMap<String, NewsItem> = HashMap::with_capacity(existing.len());
    let mut snapshot_order = Vec::with_capacity(existing.len());
    for item in existing {
        if !known.contains_key(&item.link) {
            snapshot_order.push(item.link.clone());
            known.insert(item.link.clone(), item);
        }
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(observed.len());
    let mut merged = Vec::with_capacity(known.len() + observed.len());

    for fresh in observed {
        if !seen.insert(fresh.link.clone()) {
            debug!(link = %fresh.link, "Duplicate link in listing; keeping first");
            continue;
        }
        let item = match known.remove(&fresh.link) {
            Some(stored) => NewsItem {
                is_new: false,
                ..stored
            },
            None => {
                info!(title = %fresh.title, date = %fresh.date, "New item");
                NewsItem {
                    is_new: true,
                    ..fresh
                }
            }
        };
        merged.push(item);
    }

    let new_count = merged.iter().filter(|i| i.is_new).count();
    let observed_count = merged.len();

    // Orphans: known stories no longer on the listing.
    for link in snapshot_order {
        if let Some(stored) = known.remove(&link) {
            merged.push(NewsItem {
                is_new: false,
                ..stored
            });
        }
    }

    info!(
        total = merged.len(),
        new = new_count,
        retained = merged.len() - observed_count,
        "Merged listing into snapshot"
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;

    fn item(link: &str) -> NewsItem {
        NewsItem {
            title: format!("title {link}"),
            link: link.to_string(),
            date: "01/01/2025 10:00".to_string(),
            ..NewsItem::default()
        }
    }

    fn enriched(link: &str) -> NewsItem {
        NewsItem {
            ticker: "BBOB".to_string(),
            attachments: vec![Attachment {
                url: format!("/isxportal/files/story{link}_1.pdf"),
                filename: format!("story{link}_1.pdf"),
                is_loaded: true,
            }],
            ..item(link)
        }
    }

    fn links(items: &[NewsItem]) -> Vec<&str> {
        items.iter().map(|i| i.link.as_str()).collect()
    }

    #[test]
    fn test_known_item_stays_and_unknown_is_new() {
        let merged = merge(vec![item("/a")], vec![item("/a"), item("/b")]);
        assert_eq!(links(&merged), vec!["/a", "/b"]);
        assert!(!merged[0].is_new);
        assert!(merged[1].is_new);
    }

    #[test]
    fn test_existing_record_wins_over_fresh_stub() {
        let mut fresh = item("/a");
        fresh.title = "retitled upstream".to_string();
        let merged = merge(vec![enriched("/a")], vec![fresh]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "title /a");
        assert_eq!(merged[0].ticker, "BBOB");
        assert!(merged[0].attachments[0].is_loaded);
    }

    #[test]
    fn test_orphans_are_retained_after_observed_items() {
        let merged = merge(
            vec![enriched("/c"), item("/a"), item("/d")],
            vec![item("/b"), item("/a")],
        );
        assert_eq!(links(&merged), vec!["/b", "/a", "/c", "/d"]);
        let c = &merged[2];
        assert!(!c.is_new);
        assert!(c.attachments[0].is_loaded);
    }

    #[test]
    fn test_no_existing_link_is_ever_lost() {
        let existing: Vec<NewsItem> = (0..20).map(|i| item(&format!("/s{i}"))).collect();
        let observed: Vec<NewsItem> = (15..30).step_by(2).map(|i| item(&format!("/s{i}"))).collect();
        let merged = merge(existing.clone(), observed);
        for e in &existing {
            assert!(merged.iter().any(|m| m.link == e.link), "lost {}", e.link);
        }
    }

    #[test]
    fn test_links_are_unique_in_output() {
        let merged = merge(
            vec![item("/a"), item("/a")],
            vec![item("/b"), item("/b"), item("/a")],
        );
        assert_eq!(links(&merged), vec!["/b", "/a"]);
        assert!(merged[0].is_new);
        assert!(!merged[1].is_new);
    }

    #[test]
    fn test_stale_is_new_flag_from_storage_is_cleared() {
        let mut stored = item("/a");
        stored.is_new = true;
        let merged = merge(vec![stored.clone()], vec![]);
        assert!(!merged[0].is_new);
        let merged = merge(vec![stored], vec![item("/a")]);
        assert!(!merged[0].is_new);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(vec![], vec![]).is_empty());
        let merged = merge(vec![], vec![item("/x")]);
        assert!(merged[0].is_new);
        let merged = merge(vec![item("/x")], vec![]);
        assert!(!merged[0].is_new);
    }
}
