//! Durable snapshot of every known news item.
//!
//! The snapshot is a BOM-prefixed CSV file with a fixed header:
//!
//! ```text
//! Date,Time,Description,Link,Ticker,IsNew,Attachments
//! 31/12/2024,10:14,<title>,<portal_url><link>,BBOB,false,<url>|<file>|true;<url>|<file>|false
//! ```
//!
//! Saves always rewrite the whole file through a sibling temp file and an
//! atomic rename, so a reader (or a crash) only ever sees the previous or the
//! next complete snapshot.
//!
//! Writers must hold a [`StoreLock`], an advisory lock on `<snapshot>.lock`.
//! It is shared by every process pointed at the same file, so a scheduled run
//! and a manual `isx_news run` queue behind each other instead of both
//! merging against the same stale snapshot.

pub mod csv;

use crate::error::PersistenceError;
use crate::models::{Attachment, NewsItem, join_date_time, split_date_time};
use std::fs::{File, TryLockError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

pub const HEADER: [&str; 7] = [
    "Date",
    "Time",
    "Description",
    "Link",
    "Ticker",
    "IsNew",
    "Attachments",
];

const ATTACHMENT_SEPARATOR: char = ';';
const ATTACHMENT_FIELD_SEPARATOR: char = '|';

/// How often a blocked [`RecordStore::lock`] retries.
const LOCK_POLL: Duration = Duration::from_millis(100);

/// Reads and writes the snapshot file.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    /// Absolute prefix stored in front of each relative link.
    portal_url: String,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, portal_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            portal_url: portal_url.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every item from the snapshot.
    ///
    /// A missing file is the normal first-run state and yields an empty set.
    /// Rows with fewer than six columns are skipped, as are malformed
    /// attachment entries within an otherwise valid row. The stored `IsNew`
    /// column is ignored; loaded items are never new.
    ///
    /// # Returns
    ///
    /// Items in file order, links relative to the portal again.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Read`] for any read failure other than a missing file.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Vec<NewsItem>, PersistenceError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No snapshot yet; starting empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let items: Vec<NewsItem> = csv::parse_rows(&text)
            .into_iter()
            .skip(1)
            .enumerate()
            .filter_map(|(i, record)| {
                let item = self.decode_row(&record);
                if item.is_none() {
                    warn!(row = i + 1, columns = record.len(), "Skipping short snapshot row");
                }
                item
            })
            .collect();

        info!(count = items.len(), "Loaded snapshot");
        Ok(items)
    }

    /// Take the exclusive snapshot lock, waiting while another run holds it.
    ///
    /// Creates the snapshot's directory if needed. Waiting polls without
    /// blocking the runtime, so a caller that is cancelled while queued just
    /// drops out of the queue.
    ///
    /// # Returns
    ///
    /// A [`StoreLock`] that releases the lock when dropped.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Lock`] if the lock file cannot be created or locked.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn lock(&self) -> Result<StoreLock<'_>, PersistenceError> {
        let path = self.lock_path();
        let lock_err = |source| PersistenceError::Lock {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(lock_err)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .await
            .map_err(lock_err)?
            .into_std()
            .await;

        let mut waited = false;
        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    if !waited {
                        info!("Snapshot locked by another run; waiting");
                        waited = true;
                    }
                    sleep(LOCK_POLL).await;
                }
                Err(TryLockError::Error(source)) => return Err(lock_err(source)),
            }
        }

        debug!(waited, "Acquired snapshot lock");
        Ok(StoreLock {
            store: self,
            _file: file,
        })
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling_path(".lock")
    }

    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), count = items.len()))]
    async fn write_snapshot(&self, items: &[NewsItem]) -> Result<(), PersistenceError> {
        let body = self.encode(items);
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, body.as_bytes()).await.map_err(write_err)?;
        if let Err(source) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(source));
        }

        info!(bytes = body.len(), "Saved snapshot");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling_path(".tmp")
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn encode(&self, items: &[NewsItem]) -> String {
        let mut out = String::from(csv::BOM);
        csv::write_row(&mut out, &HEADER);

        for item in items {
            let (date, time) = split_date_time(&item.date);
            let link = format!("{}{}", self.portal_url, item.link);
            let is_new = item.is_new.to_string();
            let attachments = encode_attachments(&item.attachments);
            csv::write_row(
                &mut out,
                &[
                    date,
                    time,
                    item.title.as_str(),
                    link.as_str(),
                    item.ticker.as_str(),
                    is_new.as_str(),
                    attachments.as_str(),
                ],
            );
        }
        out
    }

    fn decode_row(&self, record: &[String]) -> Option<NewsItem> {
        if record.len() < 6 {
            return None;
        }
        let link = record[3]
            .strip_prefix(self.portal_url.as_str())
            .unwrap_or(&record[3])
            .to_string();

        Some(NewsItem {
            title: record[2].clone(),
            link,
            date: join_date_time(&record[0], &record[1]),
            ticker: record[4].clone(),
            is_new: false,
            attachments: record
                .get(6)
                .map(|cell| decode_attachments(cell))
                .unwrap_or_default(),
        })
    }
}

/// Exclusive hold on a snapshot file; the only way to write it.
///
/// Released when dropped, including when the run holding it is abandoned.
#[derive(Debug)]
pub struct StoreLock<'a> {
    store: &'a RecordStore,
    _file: File,
}

impl StoreLock<'_> {
    /// Replace the snapshot with `items`, in the given order.
    ///
    /// The file is fully rewritten: BOM, header, then one row per item. The
    /// new content is written to `<snapshot>.tmp` and renamed over the old
    /// file, so the previous snapshot survives any failure.
    ///
    /// # Arguments
    ///
    /// * `items` - Every item to keep, already in the order to persist
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Write`] if the directory, temp file or rename fails.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let lock = store.lock().await?;
    /// let mut items = store.load().await?;
    /// items.push(fresh);
    /// lock.save(&items).await?;
    /// ```
    pub async fn save(&self, items: &[NewsItem]) -> Result<(), PersistenceError> {
        self.store.write_snapshot(items).await
    }
}

fn encode_attachments(attachments: &[Attachment]) -> String {
    attachments
        .iter()
        .map(|a| format!("{}|{}|{}", a.url, a.filename, a.is_loaded))
        .collect::<Vec<_>>()
        .join(";")
}

fn decode_attachments(cell: &str) -> Vec<Attachment> {
    cell.split(ATTACHMENT_SEPARATOR)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.split(ATTACHMENT_FIELD_SEPARATOR).collect();
            let decoded = match parts.as_slice() {
                [url, filename, flag] if !url.is_empty() && !filename.is_empty() => flag
                    .parse::<bool>()
                    .ok()
                    .map(|is_loaded| Attachment {
                        url: url.to_string(),
                        filename: filename.to_string(),
                        is_loaded,
                    }),
                _ => None,
            };
            if decoded.is_none() {
                debug!(%entry, "Skipping malformed attachment entry");
            }
            decoded
        })
        .collect()
}
