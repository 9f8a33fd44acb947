//! Clock selection and timeline enumeration.
//!
//! The clock is the input category whose files define the steps of a run.
//! [`resolve_clock`] picks it, [`resolve_timeline`] asks a
//! [`VolumeSource`] for the matching timestamps inside the run window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use radflow_descriptor::{parse_datatype, DataTypeDescriptor};
use radflow_types::{FlowError, Result};

use crate::config::{ClockFallback, TimeWindow};
use crate::source::VolumeSource;

/// One step of the run: a volume time and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub locator: String,
}

impl TimelineEntry {
    pub fn new(timestamp: DateTime<Utc>, locator: impl Into<String>) -> Self {
        Self {
            timestamp,
            locator: locator.into(),
        }
    }
}

/// The resolved clock and its ordered steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub clock: DataTypeDescriptor,
    pub entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimelineEntry> {
        self.entries.iter()
    }
}

/// Select the clock descriptor.
///
/// 0. `designated`, when the configuration names one;
/// 1. the first required descriptor whose category is not in the fallback table;
/// 2. the fallback clock of the first required descriptor whose category is;
/// 3. otherwise [`FlowError::NoClockAvailable`].
pub fn resolve_clock(
    required: &[DataTypeDescriptor],
    designated: Option<&DataTypeDescriptor>,
    fallback: &[ClockFallback],
) -> Result<DataTypeDescriptor> {
    if let Some(clock) = designated {
        tracing::debug!(clock = %clock, "Using designated clock");
        return Ok(clock.clone());
    }

    let is_auxiliary = |d: &DataTypeDescriptor| fallback.iter().any(|f| f.category == d.category);

    if let Some(primary) = required.iter().find(|d| !is_auxiliary(d)) {
        tracing::debug!(clock = %primary, "Using primary clock");
        return Ok(primary.clone());
    }

    for descriptor in required {
        if let Some(entry) = fallback.iter().find(|f| f.category == descriptor.category) {
            let clock = parse_datatype(&entry.clock)?;
            tracing::info!(
                category = %descriptor.category,
                clock = %clock,
                "Only auxiliary data required, falling back to default clock"
            );
            return Ok(clock);
        }
    }

    Err(FlowError::NoClockAvailable)
}

/// Enumerate the steps of `clock` within `window`, sorted by time.
///
/// Entries the source returns outside the window are dropped. An empty result
/// is [`FlowError::EmptyTimeline`].
pub async fn resolve_timeline(
    source: &dyn VolumeSource,
    scan: Option<&str>,
    clock: DataTypeDescriptor,
    window: &TimeWindow,
) -> Result<Timeline> {
    let mut entries = source.list_timestamps(scan, &clock, window).await?;
    entries.retain(|e| window.contains(e.timestamp));
    entries.sort_by_key(|e| e.timestamp);

    if entries.is_empty() {
        return Err(FlowError::EmptyTimeline {
            clock: clock.to_string(),
            start: window.start,
            end: window.end,
        });
    }

    tracing::info!(clock = %clock, steps = entries.len(), "Resolved timeline");
    Ok(Timeline { clock, entries })
}
