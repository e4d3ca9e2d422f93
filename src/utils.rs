//! Small helpers for log previews and startup filesystem checks.

use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes on a character boundary,
/// with the number of dropped bytes appended. Portal pages are Arabic, so
/// cutting at an arbitrary byte would split a code point.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a marker file.
/// Used at startup so a read-only volume is reported before the first run
/// rather than after a full crawl.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    let marker = path.join(".isx_news_write_check");
    fs::write(&marker, b"").await?;
    let _ = fs::remove_file(&marker).await;
    info!("Directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.ends_with("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        // Each Arabic letter is two bytes in UTF-8.
        let s = "سوق العراق";
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with("س"));
        assert!(result.ends_with(&format!("(+{} bytes)", s.len() - 2)));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("data/pdfs");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join(".isx_news_write_check").exists());
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_fails_on_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        assert!(ensure_writable_dir(&file).await.is_err());
    }
}
