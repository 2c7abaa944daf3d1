use crate::storage::{CrawlSnapshot, StateStore, StorageResult};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Snapshot persistence to a single JSON file
///
/// Saves go to a sibling temporary file which is then renamed over the
/// snapshot, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Creates a store writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether a snapshot file exists
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> StorageResult<Option<CrawlSnapshot>> {
        if !self.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let snapshot = serde_json::from_reader(reader)?;
        Ok(Some(snapshot))
    }

    fn save(&mut self, snapshot: &CrawlSnapshot) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        {
            let mut writer = BufWriter::new(File::create(&temp)?);
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        tracing::trace!(
            "Saved snapshot with {} links to {}",
            snapshot.links.len(),
            self.path.display()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
