//! JSON Lines output log
//!
//! One line per successfully fetched non-binary page, appended as soon as the
//! page is folded into the frontier.

use crate::state::{LinkRecord, ScrapeParams, Timing};
use crate::storage::file_stem_for_domain;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Metadata block of an output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub crawled_at: Option<DateTime<Utc>>,
    pub proxy_country: Option<String>,
    pub render_js: Option<bool>,
    pub timing: Option<Timing>,
    #[serde(default)]
    pub scrape_params: ScrapeParams,
    #[serde(default)]
    pub redirect_chain: Vec<String>,
    #[serde(default)]
    pub is_redirected: bool,
}

/// One line of the output log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// The frontier key that was fetched
    pub url: String,

    /// URL after following redirects
    pub final_url: String,

    /// Raw response body
    pub html: String,

    pub metadata: OutputMetadata,
}

impl OutputRecord {
    /// Builds an output record from the frontier record of a fetched page
    pub fn from_link_record(record: &LinkRecord, html: String) -> Self {
        Self {
            url: record.url.clone(),
            final_url: record.final_url.clone().unwrap_or_else(|| record.url.clone()),
            html,
            metadata: OutputMetadata {
                status_code: record.status_code,
                content_type: record.content_type.clone(),
                crawled_at: record.crawled_at,
                proxy_country: record.proxy_country.clone(),
                render_js: record.render_js,
                timing: record.timing,
                scrape_params: record.scrape_params.clone(),
                redirect_chain: record.redirect_chain.clone(),
                is_redirected: record.is_redirected,
            },
        }
    }
}

/// Returns the output log path for a crawl started now
///
/// Format: `{output_dir}/{domain}_{YYYYmmdd_HHMMSS}.jsonl`
pub fn output_file_path(output_dir: &Path, domain: &str) -> PathBuf {
    let date_str = Local::now().format("%Y%m%d_%H%M%S");
    output_dir.join(format!("{}_{}.jsonl", file_stem_for_domain(domain), date_str))
}

/// Append-mode JSON Lines writer
///
/// Every record is flushed as it is written so an interrupted crawl keeps all
/// pages it already recorded as completed.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlWriter {
    /// Opens (or creates) `path` for appending
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::with_capacity(64 * 1024, file),
            written: 0,
        })
    }

    /// Appends one record as a single line
    pub fn append(&mut self, record: &OutputRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Number of records appended through this writer
    pub fn written(&self) -> usize {
        self.written
    }

    /// Path of the output log
    pub fn path(&self) -> &Path {
        &self.path
    }
}
