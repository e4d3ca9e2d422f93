//! Command-line interface definitions.
//!
//! Paths can be given as flags or environment variables; either overrides
//! the value from the YAML configuration file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Market news ingestion for the Iraq Stock Exchange portal.
///
/// # Examples
///
/// ```sh
/// # One ingestion run, summary printed as JSON
/// isx_news run
///
/// # Keep running on the business-hours schedule until Ctrl-C
/// isx_news --config /etc/isx_news.yaml serve
///
/// # Report attachments missing from disk
/// ISX_NEWS_ATTACHMENT_DIR=/data/pdfs isx_news verify
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, env = "ISX_NEWS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// CSV snapshot path (overrides the config file)
    #[arg(long, env = "ISX_NEWS_SNAPSHOT_PATH", global = true)]
    pub snapshot_path: Option<PathBuf>,

    /// Attachment directory (overrides the config file)
    #[arg(long, env = "ISX_NEWS_ATTACHMENT_DIR", global = true)]
    pub attachment_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the ingestion pipeline once and print its summary
    Run,
    /// Run on the business-hours schedule until interrupted
    Serve,
    /// Print attachments of the stored snapshot that are missing on disk
    Verify,
    /// Print the stored snapshot
    List,
}
