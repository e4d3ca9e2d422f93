//! Data models for market news items and their attachments.
//!
//! - [`ListingRow`]: a raw row as observed on a listing page
//! - [`NewsItem`]: a story as kept in the snapshot
//! - [`Attachment`]: a PDF referenced from a story's detail page
//! - [`RunSummary`]: what a pipeline run reports back to its trigger

use crate::error::ParseError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source format of the portal's timestamps, e.g. `31/12/2024 10:14`.
pub const NEWS_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

/// A row scraped from a listing page, before any detail enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub title: String,
    pub date: String,
    /// Portal-relative reference to the detail page.
    pub link: String,
}

/// One observed news story.
///
/// `link` is the identity key: two items with the same link are the same
/// story. `is_new` is transient and recomputed on every run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    pub date: String,
    pub ticker: String,
    pub is_new: bool,
    pub attachments: Vec<Attachment>,
}

impl From<ListingRow> for NewsItem {
    fn from(row: ListingRow) -> Self {
        Self {
            title: row.title,
            link: row.link,
            date: row.date,
            ..Self::default()
        }
    }
}

impl NewsItem {
    /// Parsed publication time, if the date string is well formed.
    pub fn published_at(&self) -> Option<NaiveDateTime> {
        parse_news_date(&self.date).ok()
    }
}

/// A binary file referenced by a [`NewsItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Remote path, relative to the portal's base URL.
    pub url: String,
    /// On-disk key inside the attachment directory.
    pub filename: String,
    /// Set once the file has been written locally; never reset.
    pub is_loaded: bool,
}

impl Attachment {
    /// Build an attachment from its remote path, deriving the filename by
    /// stripping `prefix`. Paths outside `prefix` fall back to their last
    /// segment.
    pub fn from_url(url: &str, prefix: &str) -> Self {
        let filename = match url.strip_prefix(prefix) {
            Some(rest) if !rest.is_empty() => rest.to_string(),
            _ => url.rsplit('/').next().unwrap_or(url).to_string(),
        };
        Self {
            url: url.to_string(),
            filename,
            is_loaded: false,
        }
    }
}

/// Result of one pipeline run, as returned to the scheduler or a manual trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub item_count: usize,
    pub new_count: usize,
    /// Attachments written to disk during this run.
    pub downloaded: usize,
    /// Story title to filenames absent from the attachment directory.
    pub missing_attachments: BTreeMap<String, Vec<String>>,
}

/// Parse a portal timestamp in `day/month/year hour:minute` form.
pub fn parse_news_date(value: &str) -> Result<NaiveDateTime, ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), NEWS_DATE_FORMAT).map_err(|source| {
        ParseError::Date {
            value: value.to_string(),
            source,
        }
    })
}

/// Split a timestamp into its date and time parts at the first space.
///
/// ```ignore
/// assert_eq!(split_date_time("31/12/2024 10:14"), ("31/12/2024", "10:14"));
/// assert_eq!(split_date_time("31/12/2024"), ("31/12/2024", ""));
/// ```
pub fn split_date_time(value: &str) -> (&str, &str) {
    value.split_once(' ').unwrap_or((value, ""))
}

/// Inverse of [`split_date_time`].
pub fn join_date_time(date: &str, time: &str) -> String {
    if time.is_empty() {
        date.to_string()
    } else {
        format!("{date} {time}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_attachment_from_url_strips_prefix() {
        let att = Attachment::from_url("/isxportal/files/story123_4_5.pdf", "/isxportal/files/");
        assert_eq!(att.filename, "story123_4_5.pdf");
        assert_eq!(att.url, "/isxportal/files/story123_4_5.pdf");
        assert!(!att.is_loaded);
    }

    #[test]
    fn test_attachment_from_url_without_prefix_uses_last_segment() {
        let att = Attachment::from_url("/other/place/report.pdf", "/isxportal/files/");
        assert_eq!(att.filename, "report.pdf");
    }

    #[test]
    fn test_parse_news_date() {
        let dt = parse_news_date("31/12/2024 10:14").unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 12);
        assert_eq!(dt.day(), 31);
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 14);
    }

    #[test]
    fn test_parse_news_date_rejects_other_formats() {
        assert!(parse_news_date("2024-12-31 10:14").is_err());
        assert!(parse_news_date("").is_err());
        assert!(parse_news_date("31/12/2024").is_err());
    }

    #[test]
    fn test_split_and_join_date_time() {
        assert_eq!(split_date_time("31/12/2024 10:14"), ("31/12/2024", "10:14"));
        assert_eq!(split_date_time("31/12/2024"), ("31/12/2024", ""));
        assert_eq!(split_date_time("a b c"), ("a", "b c"));
        assert_eq!(join_date_time("a", "b c"), "a b c");
        assert_eq!(join_date_time("31/12/2024", ""), "31/12/2024");
    }

    #[test]
    fn test_news_item_from_listing_row() {
        let item = NewsItem::from(ListingRow {
            title: "Board meeting".to_string(),
            date: "01/02/2025 09:30".to_string(),
            link: "storyDetails.html?id=1".to_string(),
        });
        assert_eq!(item.title, "Board meeting");
        assert!(item.ticker.is_empty());
        assert!(item.attachments.is_empty());
        assert!(!item.is_new);
        assert!(item.published_at().is_some());
    }

    #[test]
    fn test_news_item_json_field_names() {
        let item = NewsItem {
            title: "t".to_string(),
            link: "l".to_string(),
            date: "d".to_string(),
            ticker: "BBOB".to_string(),
            is_new: true,
            attachments: vec![],
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"is_new\":true"));
        assert!(json.contains("\"ticker\":\"BBOB\""));
    }
}
