use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use radflow_descriptor::DataTypeDescriptor;
use radflow_types::{FlowError, Result, Volume};

use crate::config::TimeWindow;
use crate::source::VolumeSource;
use crate::timeline::TimelineEntry;

/// Volumes held in memory, keyed by time. Fetches can be made to fail at
/// chosen timestamps.
#[derive(Debug, Default)]
pub struct MemorySource {
    volumes: BTreeMap<DateTime<Utc>, Volume>,
    failures: HashSet<DateTime<Utc>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volumes.insert(volume.time, volume);
        self
    }

    /// Make `fetch_volume` fail for the step at `time`. The step is still listed.
    pub fn fail_at(mut self, time: DateTime<Utc>) -> Self {
        self.failures.insert(time);
        self
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

#[async_trait]
impl VolumeSource for MemorySource {
    async fn list_timestamps(
        &self,
        _scan: Option<&str>,
        _clock: &DataTypeDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<TimelineEntry>> {
        Ok(self
            .volumes
            .values()
            .filter(|v| window.contains(v.time))
            .map(|v| TimelineEntry::new(v.time, v.locator.clone()))
            .collect())
    }

    async fn fetch_volume(
        &self,
        entry: &TimelineEntry,
        _required: &[DataTypeDescriptor],
    ) -> Result<Volume> {
        if self.failures.contains(&entry.timestamp) {
            return Err(FlowError::VolumeNotFound {
                locator: entry.locator.clone(),
                message: "injected failure".into(),
            });
        }
        self.volumes
            .get(&entry.timestamp)
            .cloned()
            .ok_or_else(|| FlowError::VolumeNotFound {
                locator: entry.locator.clone(),
                message: "no volume at this time".into(),
            })
    }
}
