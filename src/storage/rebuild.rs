//! Rebuilds crawl snapshots from JSON Lines output logs
//!
//! Useful when a snapshot was lost or predates state persistence: every page
//! in the logs becomes a completed frontier key, and same-domain redirect
//! targets that were never logged become pending keys.

use crate::output::OutputRecord;
use crate::state::{LinkRecord, LinkStatus};
use crate::storage::{state_file_path, CrawlSnapshot, JsonStateStore, StateStore, StorageResult};
use crate::url::domain_of;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Scans `output_dir` for `*.jsonl` logs and writes one snapshot per domain
///
/// # Returns
///
/// The paths of the snapshot files written, in domain order
pub fn rebuild_state_files(output_dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let by_domain = read_output_logs(output_dir)?;
    let mut written = Vec::new();

    for (domain, records) in by_domain {
        let snapshot = snapshot_from_records(&domain, &records);
        let path = state_file_path(output_dir, &domain);
        let mut store = JsonStateStore::new(&path);
        store.save(&snapshot)?;

        tracing::info!(
            "Rebuilt {} with {} links from output logs",
            path.display(),
            snapshot.links.len()
        );
        written.push(path);
    }

    Ok(written)
}

/// Reads every log in the directory, grouping records by domain of their URL
fn read_output_logs(output_dir: &Path) -> StorageResult<BTreeMap<String, Vec<OutputRecord>>> {
    let mut files: Vec<PathBuf> = fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    let mut by_domain: BTreeMap<String, Vec<OutputRecord>> = BTreeMap::new();

    for file in files {
        let reader = BufReader::new(File::open(&file)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let record: OutputRecord = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Skipping {}:{}: {}", file.display(), line_no + 1, e);
                    continue;
                }
            };

            match domain_of(&record.url) {
                Some(domain) => by_domain.entry(domain).or_default().push(record),
                None => tracing::warn!("Skipping record with invalid URL {}", record.url),
            }
        }
    }

    Ok(by_domain)
}

/// Builds a snapshot where every logged page is completed
fn snapshot_from_records(domain: &str, records: &[OutputRecord]) -> CrawlSnapshot {
    let base_url = records.first().map(|r| r.url.clone()).unwrap_or_default();
    let mut snapshot = CrawlSnapshot::new(base_url, domain);

    for entry in records {
        let meta = &entry.metadata;
        let crawled_at = meta.crawled_at.unwrap_or_else(Utc::now);

        let mut record = LinkRecord::new(entry.url.clone(), meta.scrape_params.clone());
        record.status_code = meta.status_code;
        record.content_type = meta.content_type.clone();
        record.crawled_at = Some(crawled_at);
        record.proxy_country = meta.proxy_country.clone();
        record.render_js = meta.render_js;
        record.timing = meta.timing;
        record.final_url = Some(entry.final_url.clone());
        record.redirect_chain = meta.redirect_chain.clone();
        record.is_redirected = meta.is_redirected;

        snapshot.links.insert(entry.url.clone(), record);
        snapshot.status.insert(entry.url.clone(), LinkStatus::Completed);
        snapshot.discovered_at.entry(entry.url.clone()).or_insert(crawled_at);
    }

    for entry in records {
        if !entry.metadata.is_redirected || entry.final_url == entry.url {
            continue;
        }
        if domain_of(&entry.final_url).as_deref() != Some(domain) {
            continue;
        }
        if snapshot.links.contains_key(&entry.final_url) {
            continue;
        }

        snapshot.links.insert(
            entry.final_url.clone(),
            LinkRecord::new(entry.final_url.clone(), entry.metadata.scrape_params.clone()),
        );
        snapshot.status.insert(entry.final_url.clone(), LinkStatus::Pending);
        snapshot.discovered_at.insert(entry.final_url.clone(), Utc::now());
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::JsonlWriter;
    use crate::state::ScrapeParams;
    use tempfile::TempDir;

    fn page(url: &str, final_url: &str) -> OutputRecord {
        let mut record = LinkRecord::new(url, ScrapeParams::default());
        record.status_code = Some(200);
        record.content_type = Some("text/html".to_string());
        record.crawled_at = Some(Utc::now());
        if url != final_url {
            record.final_url = Some(final_url.to_string());
            record.redirect_chain = vec![url.to_string(), final_url.to_string()];
            record.is_redirected = true;
        }
        OutputRecord::from_link_record(&record, "<html></html>".to_string())
    }

    #[test]
    fn test_rebuild_groups_by_domain() {
        let dir = TempDir::new().unwrap();

        let mut log = JsonlWriter::open(dir.path().join("a.com_20240101_000000.jsonl")).unwrap();
        log.append(&page("https://a.com/", "https://a.com/")).unwrap();
        log.append(&page("https://a.com/old", "https://a.com/new")).unwrap();
        log.append(&page("https://b.com/x", "https://b.com/x")).unwrap();
        drop(log);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let written = rebuild_state_files(dir.path()).unwrap();
        assert_eq!(written.len(), 2);

        let a = JsonStateStore::new(dir.path().join("a.com.state.json"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(a.domain, "a.com");
        assert_eq!(a.base_url, "https://a.com/");
        assert_eq!(a.count(LinkStatus::Completed), 2);
        assert_eq!(a.status.get("https://a.com/new"), Some(&LinkStatus::Pending));

        let b = JsonStateStore::new(dir.path().join("b.com.state.json"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(b.count(LinkStatus::Completed), 1);
    }

    #[test]
    fn test_cross_domain_redirect_target_is_not_added() {
        let records = vec![page("https://a.com/go", "https://elsewhere.com/")];
        let snapshot = snapshot_from_records("a.com", &records);
        assert_eq!(snapshot.links.len(), 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let good = serde_json::to_string(&page("https://a.com/", "https://a.com/")).unwrap();
        std::fs::write(
            dir.path().join("a.jsonl"),
            format!("{{broken\n\n{}\n", good),
        )
        .unwrap();

        let written = rebuild_state_files(dir.path()).unwrap();
        assert_eq!(written.len(), 1);
    }
}
