//! Local mirror of story PDF attachments.
//!
//! Files are written to `<dir>/<filename>`. A file already present on disk
//! counts as downloaded, which makes [`AttachmentManager::ensure_downloaded`]
//! idempotent under crash-and-retry: a run that wrote the file but died
//! before persisting the flag does not fetch it again.
//!
//! Transfers land in `<filename>.part` first and are renamed into place only
//! once complete, so a truncated transfer is never mistaken for a finished one.

use crate::error::DownloadError;
use crate::models::{Attachment, NewsItem};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

/// Downloads and verifies attachments against a base URL and a directory.
#[derive(Debug, Clone)]
pub struct AttachmentManager {
    client: Client,
    base_url: String,
    dir: PathBuf,
}

/// Outcome of processing one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    AlreadyLoaded,
    FoundOnDisk,
    Downloaded,
}

impl AttachmentManager {
    pub fn new(client: Client, base_url: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dir: dir.into(),
        }
    }

    /// Download every attachment of `item` not yet flagged as loaded.
    ///
    /// A file already present under the attachment directory is accepted
    /// without a transfer. Downloads land in `<name>.part` and are renamed
    /// into place once complete. A failed attachment is logged and keeps
    /// `is_loaded = false` for the next run; it never stops its siblings.
    ///
    /// # Arguments
    ///
    /// * `item` - Story whose attachments should be on disk
    ///
    /// # Returns
    ///
    /// The item with updated flags and the number of files actually
    /// transferred.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let (item, downloaded) = manager.ensure_downloaded(item).await;
    /// if item.attachments.iter().any(|a| !a.is_loaded) {
    ///     // retried on the next run
    /// }
    /// ```
    #[instrument(level = "info", skip_all, fields(title = %item.title, count = item.attachments.len()))]
    pub async fn ensure_downloaded(&self, item: NewsItem) -> (NewsItem, usize) {
        let total = item.attachments.len();
        let mut downloaded = 0;
        let mut attachments = Vec::with_capacity(total);

        for (i, att) in item.attachments.into_iter().enumerate() {
            let is_loaded = match self.ensure_one(&att).await {
                Ok(outcome) => {
                    debug!(index = i + 1, total, file = %att.filename, ?outcome, "Attachment present");
                    if outcome == Outcome::Downloaded {
                        downloaded += 1;
                    }
                    true
                }
                Err(e) => {
                    error!(index = i + 1, total, url = %att.url, error = %e, "Attachment download failed");
                    false
                }
            };
            attachments.push(Attachment { is_loaded, ..att });
        }

        (
            NewsItem {
                attachments,
                ..item
            },
            downloaded,
        )
    }

    async fn ensure_one(&self, att: &Attachment) -> Result<Outcome, DownloadError> {
        if att.is_loaded {
            return Ok(Outcome::AlreadyLoaded);
        }
        let target = self.target_path(&att.filename)?;
        if fs::try_exists(&target).await.unwrap_or(false) {
            info!(path = %target.display(), "Attachment already on disk");
            return Ok(Outcome::FoundOnDisk);
        }
        self.download(&att.url, &target).await?;
        Ok(Outcome::Downloaded)
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), DownloadError> {
        let full_url = format!("{}{}", self.base_url, url);
        info!(url = %full_url, "Downloading attachment");

        let http_err = |source| DownloadError::Http {
            url: full_url.clone(),
            source,
        };
        let resp = self.client.get(&full_url).send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: full_url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await.map_err(http_err)?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DownloadError::Io { path, source }
        };
        fs::create_dir_all(&self.dir).await.map_err(io_err(self.dir.as_path()))?;

        let part = part_path(target);
        fs::write(&part, &bytes).await.map_err(io_err(part.as_path()))?;
        if let Err(source) = fs::rename(&part, target).await {
            let _ = fs::remove_file(&part).await;
            return Err(io_err(target)(source));
        }

        info!(path = %target.display(), bytes = bytes.len(), "Saved attachment");
        Ok(())
    }

    fn target_path(&self, filename: &str) -> Result<PathBuf, DownloadError> {
        let unsafe_name = filename.is_empty()
            || filename == "."
            || filename.contains("..")
            || filename.contains(['/', '\\']);
        if unsafe_name {
            return Err(DownloadError::InvalidFilename(filename.to_string()));
        }
        Ok(self.dir.join(filename))
    }

    /// Report attachments missing from disk, keyed by story title.
    ///
    /// Presence on disk is checked regardless of the stored flag. Items with
    /// nothing missing are omitted. Diagnostic only; nothing is mutated.
    ///
    /// # Returns
    ///
    /// Story title to the filenames missing for it, in attachment order.
    #[instrument(level = "info", skip_all, fields(items = items.len()))]
    pub async fn verify_all(&self, items: &[NewsItem]) -> BTreeMap<String, Vec<String>> {
        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut checked = 0usize;

        for item in items {
            for att in &item.attachments {
                checked += 1;
                let present = match self.target_path(&att.filename) {
                    Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
                    Err(_) => false,
                };
                if !present {
                    warn!(title = %item.title, file = %att.filename, flagged = att.is_loaded, "Attachment missing");
                    missing
                        .entry(item.title.clone())
                        .or_default()
                        .push(att.filename.clone());
                }
            }
        }

        let missing_count: usize = missing.values().map(Vec::len).sum();
        info!(checked, missing = missing_count, "Verified attachments");
        missing
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}
