use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;

use radflow_descriptor::DataTypeDescriptor;
use radflow_types::{FieldMap, FlowError, Result, Volume};

use crate::config::TimeWindow;
use crate::source::VolumeSource;
use crate::timeline::TimelineEntry;

const DEFAULT_PATTERN: &str = "*.json";

/// On-disk snapshot file.
#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    fields: FieldMap,
}

/// Files of one auxiliary category directory keyed by timestamp.
type CategoryIndex = Arc<BTreeMap<DateTime<Utc>, PathBuf>>;

/// JSON snapshots laid out as `<root>/<scan>/<CATEGORY>/<...YYYYmmddHHMMSS...>.json`.
///
/// Auxiliary category directories are listed once and indexed for the
/// lifetime of the source.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    files: GlobSet,
    stamp: Regex,
    aux_index: Arc<Mutex<HashMap<PathBuf, CategoryIndex>>>,
}

fn build_globset(pattern: &str) -> Result<GlobSet> {
    let glob = Glob::new(pattern)
        .map_err(|e| FlowError::Config(format!("invalid file pattern '{pattern}': {e}")))?;
    let mut builder = GlobSetBuilder::new();
    builder.add(glob);
    builder
        .build()
        .map_err(|e| FlowError::Config(format!("invalid file pattern '{pattern}': {e}")))
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let stamp = Regex::new(r"(\d{14})").map_err(|e| FlowError::Other(e.to_string()))?;
        Ok(Self {
            root: root.into(),
            files: build_globset(DEFAULT_PATTERN)?,
            stamp,
            aux_index: Arc::default(),
        })
    }

    /// Replace the file-name pattern (default `*.json`).
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.files = build_globset(pattern)?;
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn category_dir(&self, scan: Option<&str>, category: &str) -> PathBuf {
        match scan {
            Some(scan) => self.root.join(scan).join(category),
            None => self.root.join(category),
        }
    }

    fn file_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        let digits = self.stamp.captures(name)?.get(1)?.as_str();
        NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
            .ok()
            .map(|t| t.and_utc())
    }

    /// Matching files of one category directory with their timestamps.
    /// A missing directory yields nothing.
    async fn scan_dir(&self, dir: &Path) -> Result<Vec<(DateTime<Utc>, PathBuf)>> {
        if !tokio::fs::try_exists(dir).await? {
            tracing::debug!(dir = %dir.display(), "Category directory does not exist");
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.files.is_match(name) {
                continue;
            }
            match self.file_timestamp(name) {
                Some(ts) => found.push((ts, entry.path())),
                None => tracing::debug!(file = %name, "No timestamp in file name, ignoring"),
            }
        }
        Ok(found)
    }

    /// Timestamp index of an auxiliary category directory, listed on first use.
    async fn aux_index(&self, dir: &Path) -> Result<CategoryIndex> {
        if let Some(index) = self.cached_index(dir) {
            return Ok(index);
        }
        let mut index = BTreeMap::new();
        for (ts, path) in self.scan_dir(dir).await? {
            index.entry(ts).or_insert(path);
        }
        let index = Arc::new(index);
        if let Ok(mut cache) = self.aux_index.lock() {
            cache.insert(dir.to_path_buf(), Arc::clone(&index));
        }
        Ok(index)
    }

    fn cached_index(&self, dir: &Path) -> Option<CategoryIndex> {
        self.aux_index.lock().ok()?.get(dir).cloned()
    }

    async fn read_snapshot(path: &Path) -> std::result::Result<FieldMap, String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
        Ok(snapshot.fields)
    }
}

#[async_trait]
impl VolumeSource for DirectorySource {
    async fn list_timestamps(
        &self,
        scan: Option<&str>,
        clock: &DataTypeDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<TimelineEntry>> {
        let dir = self.category_dir(scan, &clock.category);
        let entries = self
            .scan_dir(&dir)
            .await?
            .into_iter()
            .filter(|(ts, _)| window.contains(*ts))
            .map(|(ts, path)| TimelineEntry::new(ts, path.to_string_lossy()))
            .collect::<Vec<_>>();
        tracing::debug!(dir = %dir.display(), count = entries.len(), "Listed clock files");
        Ok(entries)
    }

    async fn fetch_volume(
        &self,
        entry: &TimelineEntry,
        required: &[DataTypeDescriptor],
    ) -> Result<Volume> {
        let clock_path = PathBuf::from(&entry.locator);
        let fields = Self::read_snapshot(&clock_path)
            .await
            .map_err(|message| FlowError::VolumeNotFound {
                locator: entry.locator.clone(),
                message,
            })?;
        let mut volume = Volume {
            time: entry.timestamp,
            locator: entry.locator.clone(),
            fields,
        };

        // Sibling categories live next to the clock category directory.
        let clock_category = clock_path.parent();
        let Some(scan_dir) = clock_category.and_then(Path::parent) else {
            return Ok(volume);
        };

        let clock_name = clock_category.and_then(Path::file_name);
        let mut wanted: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for d in required.iter().filter(|d| !d.is_internal()) {
            if clock_name == Some(OsStr::new(&d.category)) {
                continue;
            }
            wanted.entry(d.category.as_str()).or_default().push(d.field.as_str());
        }

        for (category, names) in wanted {
            let dir = scan_dir.join(category);
            let index = match self.aux_index(&dir).await {
                Ok(index) => index,
                Err(e) => {
                    tracing::debug!(
                        dir = %dir.display(),
                        error = %e,
                        "Unreadable auxiliary directory"
                    );
                    continue;
                }
            };
            let Some(path) = index.get(&entry.timestamp) else {
                tracing::debug!(
                    category,
                    timestamp = %entry.timestamp,
                    "No auxiliary file for step"
                );
                continue;
            };
            match Self::read_snapshot(path).await {
                Ok(mut aux) => {
                    for name in names {
                        if let Some(value) = aux.remove(name) {
                            volume.set_field(name, value);
                        }
                    }
                }
                Err(message) => {
                    tracing::debug!(path = %path.display(), %message, "Unreadable auxiliary file")
                }
            }
        }

        Ok(volume)
    }
}
