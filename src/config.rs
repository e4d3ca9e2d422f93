//! Runtime configuration.
//!
//! Everything has a default matching the production deployment, so the
//! YAML file only needs the keys that differ:
//!
//! ```yaml
//! snapshot_path: /app/data/market_news.csv
//! attachment_dir: /app/data/pdfs
//! schedule:
//!   interval_secs: 300
//!   closed_days: [Fri, Sat]
//!   open_hour: 9
//!   close_hour: 15
//! fetch:
//!   max_retries: 2
//! ```

use crate::error::ConfigError;
use crate::scheduler::BusinessHours;
use chrono::{FixedOffset, Weekday};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// CSV snapshot of every known story.
    pub snapshot_path: PathBuf,
    /// Directory holding downloaded PDF attachments.
    pub attachment_dir: PathBuf,
    /// Scheme and host of the portal; attachment paths are appended to it.
    pub base_url: String,
    /// Path under `base_url` that story links are relative to.
    pub portal_path: String,
    /// Path prefix stripped from attachment URLs to name files on disk.
    pub attachment_prefix: String,
    /// Listing pages crawled on every run.
    pub source_pages: Vec<String>,
    pub user_agent: String,
    pub schedule: ScheduleConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    /// Market zone name, used in logs.
    pub timezone: String,
    /// Market zone offset from UTC, in hours.
    pub utc_offset_hours: i32,
    pub closed_days: Vec<Weekday>,
    pub open_hour: u32,
    pub close_hour: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub detail_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("/app/data/market_news.csv"),
            attachment_dir: PathBuf::from("/app/data/pdfs"),
            base_url: "http://www.isx-iq.net".to_string(),
            portal_path: "/isxportal/portal/".to_string(),
            attachment_prefix: "/isxportal/files/".to_string(),
            source_pages: vec![
                "http://www.isx-iq.net/isxportal/portal/storyList.html?currLanguage=ar&activeTab=0"
                    .to_string(),
                "http://www.isx-iq.net/isxportal/portal/storyList.html?currLanguage=ar&activeTab=1"
                    .to_string(),
            ],
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            schedule: ScheduleConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            timezone: "Asia/Baghdad".to_string(),
            utc_offset_hours: 3,
            closed_days: vec![Weekday::Fri, Weekday::Sat],
            open_hour: 9,
            close_hour: 15,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
            detail_concurrency: 4,
        }
    }
}

impl Config {
    /// Load from a YAML file, or defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config: Self =
                    serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
                        path: path.to_path_buf(),
                        source,
                    })?;
                info!(path = %path.display(), "Loaded configuration");
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.schedule;
        if s.close_hour > 24 || s.open_hour >= s.close_hour {
            return Err(ConfigError::Invalid(format!(
                "business hours [{}, {}) are not a valid window",
                s.open_hour, s.close_hour
            )));
        }
        if s.interval_secs == 0 {
            return Err(ConfigError::Invalid("schedule.interval_secs must be > 0".into()));
        }
        if !(-14..=14).contains(&s.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "schedule.utc_offset_hours {} is out of range",
                s.utc_offset_hours
            )));
        }
        if self.fetch.detail_concurrency == 0 {
            return Err(ConfigError::Invalid("fetch.detail_concurrency must be > 0".into()));
        }
        if !self.attachment_prefix.starts_with('/') || !self.attachment_prefix.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "attachment_prefix {:?} must start and end with '/'",
                self.attachment_prefix
            )));
        }
        url::Url::parse(&self.portal_url())
            .map_err(|e| ConfigError::Invalid(format!("portal URL: {e}")))?;
        Ok(())
    }

    /// Absolute base that story links are relative to.
    pub fn portal_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.portal_path)
    }

    pub fn business_hours(&self) -> Result<BusinessHours, ConfigError> {
        let s = &self.schedule;
        let offset = FixedOffset::east_opt(s.utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::Invalid(format!("utc offset {}h", s.utc_offset_hours))
        })?;
        Ok(BusinessHours {
            zone: s.timezone.clone(),
            offset,
            closed_days: s.closed_days.clone(),
            open_hour: s.open_hour,
            close_hour: s.close_hour,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.schedule.closed_days, vec![Weekday::Fri, Weekday::Sat]);
        assert_eq!(config.portal_url(), "http://www.isx-iq.net/isxportal/portal/");
        assert_eq!(config.source_pages.len(), 2);
    }

    #[test]
    fn test_partial_yaml_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "snapshot_path: /tmp/news.csv\nschedule:\n  closed_days: [Fri]\n  open_hour: 10\nfetch:\n  max_retries: 0"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.snapshot_path, PathBuf::from("/tmp/news.csv"));
        assert_eq!(config.schedule.closed_days, vec![Weekday::Fri]);
        assert_eq!(config.schedule.open_hour, 10);
        assert_eq!(config.schedule.close_hour, 15);
        assert_eq!(config.fetch.max_retries, 0);
        assert_eq!(config.attachment_dir, PathBuf::from("/app/data/pdfs"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "snapshot_pth: /tmp/typo.csv").unwrap();
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn test_invalid_window_is_rejected() {
        let mut config = Config::default();
        config.schedule.open_hour = 15;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.schedule.close_hour = 25;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_attachment_prefix_must_be_a_directory_path() {
        for prefix in ["", "/", "files/", "/files"] {
            let config = Config {
                attachment_prefix: prefix.to_string(),
                ..Config::default()
            };
            assert_eq!(config.validate().is_ok(), prefix == "/", "{prefix:?}");
        }
    }

    #[test]
    fn test_business_hours_from_config() {
        let hours = Config::default().business_hours().unwrap();
        assert_eq!(hours.offset, FixedOffset::east_opt(3 * 3600).unwrap());
        assert_eq!(hours.open_hour, 9);
        assert_eq!(hours.close_hour, 15);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load(Some(Path::new("/nonexistent/isx_news.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
